use serde::{Deserialize, Serialize};

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

impl BoundingBox {
    /// A box without landmarks at full confidence.
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
            confidence: 1.0,
            landmarks: None,
        }
    }

    /// Scale coordinates (and landmarks) by `factor`.
    ///
    /// Used to map detections on a downscaled frame back to the original.
    pub fn scaled(&self, factor: f32) -> Self {
        Self {
            x: self.x * factor,
            y: self.y * factor,
            width: self.width * factor,
            height: self.height * factor,
            confidence: self.confidence,
            landmarks: self
                .landmarks
                .map(|lms| lms.map(|(lx, ly)| (lx * factor, ly * factor))),
        }
    }

    /// Integer pixel rectangle `(x, y, w, h)` clamped to an image of the given size.
    ///
    /// Width or height may be zero when the box lies outside the image.
    pub fn clamp_to(&self, width: u32, height: u32) -> (u32, u32, u32, u32) {
        let x0 = self.x.floor().clamp(0.0, width as f32) as u32;
        let y0 = self.y.floor().clamp(0.0, height as f32) as u32;
        let x1 = (self.x + self.width).ceil().clamp(0.0, width as f32) as u32;
        let y1 = (self.y + self.height).ceil().clamp(0.0, height as f32) as u32;
        (x0, y0, x1.saturating_sub(x0), y1.saturating_sub(y0))
    }
}

/// Face embedding vector (512-dimensional for ArcFace).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding (e.g., "w600k_r50").
    pub model_version: Option<String>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self {
            values,
            model_version: None,
        }
    }

    /// Cosine similarity in [-1, 1]. Higher = more similar.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 {
            dot / denom
        } else {
            0.0
        }
    }

    /// Euclidean distance between two embeddings.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// How two embeddings are compared, and the largest distance still accepted as
/// the same person.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DistanceMetric {
    /// Straight-line distance between raw vectors.
    Euclidean { tolerance: f32 },
    /// `1 - cosine_similarity`, in [0, 2].
    Cosine { tolerance: f32 },
}

impl DistanceMetric {
    pub fn distance(&self, a: &Embedding, b: &Embedding) -> f32 {
        match self {
            DistanceMetric::Euclidean { .. } => a.euclidean_distance(b),
            DistanceMetric::Cosine { .. } => 1.0 - a.similarity(b),
        }
    }

    /// Distance from `query` to each of `known`, in order.
    pub fn distances<'a, I>(&self, known: I, query: &Embedding) -> Vec<f32>
    where
        I: IntoIterator<Item = &'a Embedding>,
    {
        known.into_iter().map(|k| self.distance(k, query)).collect()
    }

    pub fn tolerance(&self) -> f32 {
        match self {
            DistanceMetric::Euclidean { tolerance } | DistanceMetric::Cosine { tolerance } => {
                *tolerance
            }
        }
    }

    /// Binary match predicate: is `distance` within tolerance?
    pub fn accepts(&self, distance: f32) -> bool {
        distance <= self.tolerance()
    }
}

impl Default for DistanceMetric {
    fn default() -> Self {
        DistanceMetric::Euclidean { tolerance: 0.6 }
    }
}

/// An enrolled person: a unique name and its reference embedding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    pub name: String,
    pub embedding: Embedding,
}

/// Ordered gallery of enrolled identities.
///
/// Order is significant: it is the tie-break order used by the matcher.
#[derive(Debug, Clone, Default)]
pub struct KnownFaces {
    identities: Vec<Identity>,
}

impl KnownFaces {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the identity stored under `name`.
    ///
    /// Replacing keeps the original position.
    pub fn insert(&mut self, name: impl Into<String>, embedding: Embedding) {
        let name = name.into();
        match self.identities.iter_mut().find(|i| i.name == name) {
            Some(existing) => existing.embedding = embedding,
            None => self.identities.push(Identity { name, embedding }),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Embedding> {
        self.identities
            .iter()
            .find(|i| i.name == name)
            .map(|i| &i.embedding)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.identities.iter().map(|i| i.name.as_str())
    }

    pub fn embeddings(&self) -> impl Iterator<Item = &Embedding> {
        self.identities.iter().map(|i| &i.embedding)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Identity> {
        self.identities.iter()
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }
}

impl FromIterator<(String, Embedding)> for KnownFaces {
    fn from_iter<T: IntoIterator<Item = (String, Embedding)>>(iter: T) -> Self {
        let mut faces = KnownFaces::new();
        for (name, embedding) in iter {
            faces.insert(name, embedding);
        }
        faces
    }
}

/// Result of matching a live embedding against the known faces.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub matched: bool,
    /// Distance to the nearest known identity (`f32::INFINITY` for an empty gallery).
    pub distance: f32,
    /// Name of the nearest identity, set only when `matched`.
    pub name: Option<String>,
}

impl MatchResult {
    pub fn unknown() -> Self {
        Self {
            matched: false,
            distance: f32::INFINITY,
            name: None,
        }
    }

    /// Display label: the matched name, or `"Unknown"`.
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(UNKNOWN_LABEL)
    }
}

/// Label drawn for faces that match no enrolled identity.
pub const UNKNOWN_LABEL: &str = "Unknown";
