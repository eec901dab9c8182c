//! Embedding provider: face detection and embedding extraction.
//!
//! The session and identity store only talk to [`EmbeddingProvider`]; the ONNX
//! implementation pairs an SCRFD detector with an ArcFace recognizer.

use crate::detector::{DetectorError, FaceDetector};
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::types::{BoundingBox, DistanceMetric, Embedding};
use image::GrayImage;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] RecognizerError),
    #[error("{0}")]
    Other(String),
}

/// Detects faces and turns face regions into comparable embeddings.
pub trait EmbeddingProvider {
    /// Locate all face regions in `image`, most confident first.
    fn detect_face_regions(&mut self, image: &GrayImage) -> Result<Vec<BoundingBox>, ProviderError>;

    /// Compute one embedding per region, in the same order as `regions`.
    fn compute_embeddings(
        &mut self,
        image: &GrayImage,
        regions: &[BoundingBox],
    ) -> Result<Vec<Embedding>, ProviderError>;

    /// Metric (and acceptance tolerance) appropriate for this provider's embeddings.
    fn metric(&self) -> DistanceMetric;

    /// Distance from `query` to each of `known`.
    fn distance(&self, known: &[Embedding], query: &Embedding) -> Vec<f32> {
        self.metric().distances(known, query)
    }
}

impl<P: EmbeddingProvider + ?Sized> EmbeddingProvider for &mut P {
    fn detect_face_regions(&mut self, image: &GrayImage) -> Result<Vec<BoundingBox>, ProviderError> {
        (**self).detect_face_regions(image)
    }

    fn compute_embeddings(
        &mut self,
        image: &GrayImage,
        regions: &[BoundingBox],
    ) -> Result<Vec<Embedding>, ProviderError> {
        (**self).compute_embeddings(image, regions)
    }

    fn metric(&self) -> DistanceMetric {
        (**self).metric()
    }

    fn distance(&self, known: &[Embedding], query: &Embedding) -> Vec<f32> {
        (**self).distance(known, query)
    }
}

/// Detection model file name inside the model directory.
pub const DETECTOR_MODEL_FILE: &str = "det_10g.onnx";
/// Recognition model file name inside the model directory.
pub const RECOGNIZER_MODEL_FILE: &str = "w600k_r50.onnx";

/// SCRFD + ArcFace over ONNX Runtime.
pub struct OnnxProvider {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
    tolerance: f32,
}

impl OnnxProvider {
    /// Load both models from `model_dir`.
    ///
    /// `tolerance` is the largest cosine distance (`1 - similarity`) accepted
    /// as the same person.
    pub fn load(model_dir: &Path, tolerance: f32) -> Result<Self, ProviderError> {
        let det_path = model_dir.join(DETECTOR_MODEL_FILE);
        let rec_path = model_dir.join(RECOGNIZER_MODEL_FILE);

        let detector = FaceDetector::load(&det_path)?;
        tracing::info!(path = %det_path.display(), "SCRFD detector loaded");

        let recognizer = FaceRecognizer::load(&rec_path)?;
        tracing::info!(path = %rec_path.display(), "ArcFace recognizer loaded");

        Ok(Self {
            detector,
            recognizer,
            tolerance,
        })
    }
}

impl EmbeddingProvider for OnnxProvider {
    fn detect_face_regions(&mut self, image: &GrayImage) -> Result<Vec<BoundingBox>, ProviderError> {
        Ok(self.detector.detect(image)?)
    }

    fn compute_embeddings(
        &mut self,
        image: &GrayImage,
        regions: &[BoundingBox],
    ) -> Result<Vec<Embedding>, ProviderError> {
        regions
            .iter()
            .map(|r| self.recognizer.extract(image, r).map_err(ProviderError::from))
            .collect()
    }

    fn metric(&self) -> DistanceMetric {
        DistanceMetric::Cosine {
            tolerance: self.tolerance,
        }
    }
}
