//! Capture sessions: bounded-duration camera loops for recognition and
//! enrollment.
//!
//! A session runs synchronously to completion. The camera is acquired when
//! the loop starts and released when the frame source is dropped, on every
//! exit path.

use image::GrayImage;
use rollcall_core::{
    AttendanceLedger, BoundingBox, Embedding, EmbeddingProvider, IdentityStore, LedgerError, Matcher,
    NearestMatcher, ProviderError, StoreError,
};
use rollcall_hw::frame;
use rollcall_hw::{CameraError, FrameSource, OpenCamera};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Outline thickness of annotation boxes, in pixels.
const BOX_THICKNESS: u32 = 2;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("camera error: {0}")]
    Camera(#[from] CameraError),
    #[error("embedding provider error: {0}")]
    Provider(#[from] ProviderError),
    #[error("identity store error: {0}")]
    Store(#[from] StoreError),
    #[error("attendance ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

/// A face drawn on a preview frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
    /// Region in full-resolution frame coordinates.
    pub region: BoundingBox,
    /// Matched name, or `"Unknown"`.
    pub label: String,
}

/// Receives each recognition frame with its face annotations. Display only.
pub trait Preview {
    fn show(&mut self, frame: &GrayImage, faces: &[Annotation]);
}

/// Copy of `frame` with a box and a name tag drawn for every face.
pub fn render_annotations(frame: &GrayImage, faces: &[Annotation]) -> GrayImage {
    let mut canvas = frame.clone();
    for face in faces {
        frame::draw_box(&mut canvas, &face.region, BOX_THICKNESS, u8::MAX);
        frame::draw_label(&mut canvas, &face.region, &face.label, u8::MAX);
    }
    canvas
}

/// Discards every frame.
pub struct NoPreview;

impl Preview for NoPreview {
    fn show(&mut self, _frame: &GrayImage, _faces: &[Annotation]) {}
}

/// Keeps overwriting one JPEG file with the latest frame, annotations drawn in.
pub struct SnapshotPreview {
    path: PathBuf,
}

impl SnapshotPreview {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Preview for SnapshotPreview {
    fn show(&mut self, frame: &GrayImage, faces: &[Annotation]) {
        let canvas = render_annotations(frame, faces);
        if let Err(e) = canvas.save_with_format(&self.path, image::ImageFormat::Jpeg) {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to write preview frame");
        }
    }
}

/// What a recognition session did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecognitionSummary {
    pub frames: usize,
    /// Faces detected across all frames.
    pub faces: usize,
    /// Distinct names recognized, in first-seen order.
    pub recognized: Vec<String>,
    /// Names for which a new attendance record was written.
    pub checked_in: Vec<String>,
    /// Set when a frame read failure ended the loop early.
    pub interrupted: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RecognitionOutcome {
    /// Nobody is enrolled; the camera was never opened.
    NoIdentities,
    Completed(RecognitionSummary),
}

#[derive(Debug, Clone, PartialEq)]
pub enum EnrollOutcome {
    Saved { name: String, path: PathBuf },
    /// The time budget ran out without a usable face crop.
    NoFaceDetected { frames: usize, read_failures: usize },
}

/// Runs capture loops against one embedding provider.
pub struct CaptureSession<'a, P: EmbeddingProvider + ?Sized> {
    provider: &'a mut P,
    budget: Duration,
    detection_scale: u32,
}

impl<'a, P: EmbeddingProvider + ?Sized> CaptureSession<'a, P> {
    pub fn new(provider: &'a mut P, budget: Duration, detection_scale: u32) -> Self {
        Self {
            provider,
            budget,
            detection_scale: detection_scale.max(1),
        }
    }

    /// Recognize faces for the session budget and record attendance for each
    /// match.
    ///
    /// A frame read failure ends the loop immediately.
    pub fn recognize<C: OpenCamera>(
        &mut self,
        store: &mut IdentityStore,
        ledger: &AttendanceLedger,
        camera: &mut C,
        preview: &mut dyn Preview,
    ) -> Result<RecognitionOutcome, SessionError> {
        let known = store.load_all(&mut *self.provider)?;
        if known.is_empty() {
            tracing::info!("no identities enrolled; skipping camera");
            return Ok(RecognitionOutcome::NoIdentities);
        }
        ledger.ensure_table()?;

        let matcher = NearestMatcher::new(self.provider.metric());
        let gallery: Vec<Embedding> = known.embeddings().cloned().collect();
        let mut source = camera.open()?;
        let mut summary = RecognitionSummary::default();
        let scale = self.detection_scale as f32;
        let started = Instant::now();

        tracing::info!(
            identities = ?known.names().collect::<Vec<_>>(),
            budget = ?self.budget,
            "recognition started"
        );

        while started.elapsed() < self.budget {
            let frame = match source.read_frame() {
                Ok(f) => f,
                Err(e) => {
                    tracing::warn!(error = %e, "frame read failed; ending recognition");
                    summary.interrupted = Some(e.to_string());
                    break;
                }
            };
            let Some(full) = frame.to_image() else {
                tracing::warn!(seq = frame.sequence, "malformed frame; ending recognition");
                summary.interrupted = Some(format!("malformed frame {}", frame.sequence));
                break;
            };
            summary.frames += 1;

            let small = frame::downscale(&full, self.detection_scale);
            let regions = self.provider.detect_face_regions(&small)?;
            if regions.is_empty() {
                preview.show(&full, &[]);
                continue;
            }
            let embeddings = self.provider.compute_embeddings(&small, &regions)?;

            let mut annotations = Vec::with_capacity(regions.len());
            for (region, embedding) in regions.iter().zip(&embeddings) {
                summary.faces += 1;
                let distances = self.provider.distance(&gallery, embedding);
                let result = matcher.identify(&known, &distances);

                if let Some(name) = &result.name {
                    if ledger.record(name)? {
                        summary.checked_in.push(name.clone());
                    }
                    if !summary.recognized.contains(name) {
                        summary.recognized.push(name.clone());
                    }
                }

                tracing::debug!(label = result.label(), distance = result.distance, "face classified");
                annotations.push(Annotation {
                    region: region.scaled(scale),
                    label: result.label().to_string(),
                });
            }

            preview.show(&full, &annotations);
        }

        drop(source);
        tracing::info!(
            frames = summary.frames,
            faces = summary.faces,
            checked_in = ?summary.checked_in,
            "recognition finished"
        );
        Ok(RecognitionOutcome::Completed(summary))
    }

    /// Capture frames until a face crop is saved under `name` or the budget
    /// runs out.
    ///
    /// Frame read failures are skipped; the loop keeps going.
    pub fn enroll<C: OpenCamera>(
        &mut self,
        store: &IdentityStore,
        name: &str,
        camera: &mut C,
    ) -> Result<EnrollOutcome, SessionError> {
        rollcall_core::store::validate_name(name)?;

        let mut source = camera.open()?;
        let mut frames = 0usize;
        let mut read_failures = 0usize;
        let started = Instant::now();

        tracing::info!(name, budget = ?self.budget, "enrollment started");

        while started.elapsed() < self.budget {
            let frame = match source.read_frame() {
                Ok(f) => f,
                Err(e) => {
                    read_failures += 1;
                    tracing::debug!(error = %e, "frame read failed; retrying");
                    continue;
                }
            };
            let Some(image) = frame.to_image() else {
                read_failures += 1;
                continue;
            };
            frames += 1;

            let regions = self.provider.detect_face_regions(&image)?;
            let Some(face) = regions.first() else {
                tracing::trace!(seq = frame.sequence, brightness = frame.avg_brightness(), "no face in frame");
                continue;
            };

            let crop = frame::crop(&image, face);
            if store.save(name, &crop)? {
                tracing::info!(name, frames, "enrollment saved");
                return Ok(EnrollOutcome::Saved {
                    name: name.to_string(),
                    path: store.image_path(name),
                });
            }
            tracing::debug!(name, "degenerate face crop; continuing");
        }

        tracing::info!(name, frames, read_failures, "enrollment timed out without a face");
        Ok(EnrollOutcome::NoFaceDetected {
            frames,
            read_failures,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollcall_core::DistanceMetric;
    use rollcall_hw::Frame;
    use std::cell::Cell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    /// Finds a face in any frame whose top-left pixel is non-zero and embeds
    /// it as that pixel's value.
    struct PixelProvider;

    impl EmbeddingProvider for PixelProvider {
        fn detect_face_regions(&mut self, image: &GrayImage) -> Result<Vec<BoundingBox>, ProviderError> {
            if image.get_pixel(0, 0).0[0] == 0 {
                return Ok(Vec::new());
            }
            Ok(vec![BoundingBox::new(0.0, 0.0, image.width() as f32, image.height() as f32)])
        }

        fn compute_embeddings(
            &mut self,
            image: &GrayImage,
            regions: &[BoundingBox],
        ) -> Result<Vec<Embedding>, ProviderError> {
            let v = image.get_pixel(0, 0).0[0] as f32 / 255.0;
            Ok(regions.iter().map(|_| Embedding::new(vec![v])).collect())
        }

        fn metric(&self) -> DistanceMetric {
            DistanceMetric::Euclidean { tolerance: 0.1 }
        }
    }

    /// Replays a script of frame results, then repeats the last one.
    struct Scripted {
        script: VecDeque<Result<u8, ()>>,
        last: Result<u8, ()>,
        reads: usize,
        released: Rc<Cell<usize>>,
    }

    impl Drop for Scripted {
        fn drop(&mut self) {
            self.released.set(self.released.get() + 1);
        }
    }

    impl FrameSource for Scripted {
        fn read_frame(&mut self) -> Result<Frame, CameraError> {
            self.reads += 1;
            let next = self.script.pop_front().unwrap_or(self.last);
            self.last = next;
            match next {
                Ok(level) => Ok(Frame::from_image(
                    GrayImage::from_pixel(16, 16, image::Luma([level])),
                    self.reads as u32,
                )),
                Err(()) => Err(CameraError::CaptureFailed("scripted".into())),
            }
        }
    }

    struct ScriptedCamera {
        script: Vec<Result<u8, ()>>,
        opened: usize,
        released: Rc<Cell<usize>>,
    }

    impl ScriptedCamera {
        fn new(script: Vec<Result<u8, ()>>) -> Self {
            Self {
                script,
                opened: 0,
                released: Rc::new(Cell::new(0)),
            }
        }

        /// Every opened source has been dropped.
        fn all_released(&self) -> bool {
            self.released.get() == self.opened
        }
    }

    impl OpenCamera for ScriptedCamera {
        type Source = Scripted;

        fn open(&mut self) -> Result<Scripted, CameraError> {
            self.opened += 1;
            Ok(Scripted {
                script: self.script.iter().copied().collect(),
                last: Err(()),
                reads: 0,
                released: Rc::clone(&self.released),
            })
        }
    }

    struct Recorder(Vec<Vec<Annotation>>);

    impl Preview for Recorder {
        fn show(&mut self, _frame: &GrayImage, faces: &[Annotation]) {
            self.0.push(faces.to_vec());
        }
    }

    const BUDGET: Duration = Duration::from_millis(150);

    #[test]
    fn test_recognition_without_identities_never_opens_camera() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = IdentityStore::open(dir.path().join("faces")).unwrap();
        let ledger = AttendanceLedger::at(dir.path().join("attendance.csv"));
        let mut camera = ScriptedCamera::new(vec![Ok(200)]);

        let mut provider = PixelProvider;
        let outcome = CaptureSession::new(&mut provider, BUDGET, 1)
            .recognize(&mut store, &ledger, &mut camera, &mut NoPreview)
            .unwrap();

        assert_eq!(outcome, RecognitionOutcome::NoIdentities);
        assert_eq!(camera.opened, 0);
        assert!(!ledger.exists());
    }

    #[test]
    fn test_recognition_stops_on_read_failure() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = IdentityStore::open(dir.path().join("faces")).unwrap();
        store.save("alice", &GrayImage::from_pixel(16, 16, image::Luma([200]))).unwrap();
        let ledger = AttendanceLedger::at(dir.path().join("attendance.csv"));
        // Two good frames, then a failure; the scripted source would keep failing.
        let mut camera = ScriptedCamera::new(vec![Ok(200), Ok(200), Err(())]);

        let mut provider = PixelProvider;
        let mut preview = Recorder(Vec::new());
        let outcome = CaptureSession::new(&mut provider, Duration::from_secs(10), 2)
            .recognize(&mut store, &ledger, &mut camera, &mut preview)
            .unwrap();

        let RecognitionOutcome::Completed(summary) = outcome else {
            panic!("expected a completed session");
        };
        assert_eq!(summary.frames, 2);
        assert_eq!(summary.recognized, vec!["alice"]);
        assert_eq!(summary.checked_in, vec!["alice"]);
        assert!(summary.interrupted.is_some());
        assert_eq!(ledger.records().unwrap().len(), 1);
        assert_eq!(camera.opened, 1);
        assert!(camera.all_released());

        // Boxes are mapped back to full resolution.
        assert_eq!(preview.0.len(), 2);
        assert_eq!(preview.0[0][0].label, "alice");
        assert_eq!(preview.0[0][0].region.width, 16.0);
    }

    #[test]
    fn test_unknown_faces_are_labelled_and_not_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = IdentityStore::open(dir.path().join("faces")).unwrap();
        store.save("alice", &GrayImage::from_pixel(16, 16, image::Luma([200]))).unwrap();
        let ledger = AttendanceLedger::at(dir.path().join("attendance.csv"));
        let mut camera = ScriptedCamera::new(vec![Ok(40), Err(())]);

        let mut provider = PixelProvider;
        let mut preview = Recorder(Vec::new());
        let outcome = CaptureSession::new(&mut provider, BUDGET, 1)
            .recognize(&mut store, &ledger, &mut camera, &mut preview)
            .unwrap();

        let RecognitionOutcome::Completed(summary) = outcome else {
            panic!("expected a completed session");
        };
        assert_eq!(summary.faces, 1);
        assert!(summary.recognized.is_empty());
        assert_eq!(preview.0[0][0].label, "Unknown");
        assert!(ledger.records().unwrap().is_empty());
    }

    #[test]
    fn test_enrollment_tolerates_read_failures() {
        let dir = tempfile::tempdir().unwrap();
        let store = IdentityStore::open(dir.path()).unwrap();
        let mut camera = ScriptedCamera::new(vec![Err(()), Err(()), Ok(0), Ok(180)]);

        let mut provider = PixelProvider;
        let outcome = CaptureSession::new(&mut provider, Duration::from_secs(10), 4)
            .enroll(&store, "bob", &mut camera)
            .unwrap();

        assert_eq!(
            outcome,
            EnrollOutcome::Saved {
                name: "bob".into(),
                path: store.image_path("bob"),
            }
        );
        assert!(store.image_path("bob").is_file());
        assert!(camera.all_released());
    }

    #[test]
    fn test_enrollment_times_out_without_face() {
        let dir = tempfile::tempdir().unwrap();
        let store = IdentityStore::open(dir.path()).unwrap();
        let mut camera = ScriptedCamera::new(vec![Ok(0)]);

        let mut provider = PixelProvider;
        let outcome = CaptureSession::new(&mut provider, BUDGET, 4)
            .enroll(&store, "bob", &mut camera)
            .unwrap();

        assert!(matches!(outcome, EnrollOutcome::NoFaceDetected { frames, .. } if frames > 0));
        assert!(!store.image_path("bob").exists());
        assert_eq!(camera.opened, 1);
        assert!(camera.all_released());
    }

    #[test]
    fn test_enrollment_rejects_bad_name_before_camera() {
        let dir = tempfile::tempdir().unwrap();
        let store = IdentityStore::open(dir.path()).unwrap();
        let mut camera = ScriptedCamera::new(vec![Ok(180)]);

        let mut provider = PixelProvider;
        let result = CaptureSession::new(&mut provider, BUDGET, 4).enroll(&store, "../x", &mut camera);
        assert!(matches!(result, Err(SessionError::Store(StoreError::InvalidName(_)))));
        assert_eq!(camera.opened, 0);
    }

    /// First reports a face entirely off-frame, then the whole frame.
    struct DriftingProvider {
        calls: usize,
    }

    impl EmbeddingProvider for DriftingProvider {
        fn detect_face_regions(&mut self, image: &GrayImage) -> Result<Vec<BoundingBox>, ProviderError> {
            self.calls += 1;
            let (w, h) = (image.width() as f32, image.height() as f32);
            if self.calls == 1 {
                Ok(vec![BoundingBox::new(w + 10.0, h + 10.0, w, h)])
            } else {
                Ok(vec![BoundingBox::new(0.0, 0.0, w, h)])
            }
        }

        fn compute_embeddings(
            &mut self,
            _image: &GrayImage,
            regions: &[BoundingBox],
        ) -> Result<Vec<Embedding>, ProviderError> {
            Ok(regions.iter().map(|_| Embedding::new(vec![0.0])).collect())
        }

        fn metric(&self) -> DistanceMetric {
            DistanceMetric::default()
        }
    }

    #[test]
    fn test_enrollment_skips_degenerate_crop() {
        let dir = tempfile::tempdir().unwrap();
        let store = IdentityStore::open(dir.path()).unwrap();
        let mut camera = ScriptedCamera::new(vec![Ok(90), Ok(90)]);

        let mut provider = DriftingProvider { calls: 0 };
        let outcome = CaptureSession::new(&mut provider, Duration::from_secs(10), 4)
            .enroll(&store, "carol", &mut camera)
            .unwrap();

        assert!(matches!(outcome, EnrollOutcome::Saved { .. }));
        assert_eq!(provider.calls, 2);
        let saved = image::open(store.image_path("carol")).unwrap();
        assert_eq!((saved.width(), saved.height()), (16, 16));
    }

    #[test]
    fn test_camera_released_when_provider_fails() {
        struct Broken;

        impl EmbeddingProvider for Broken {
            fn detect_face_regions(&mut self, _image: &GrayImage) -> Result<Vec<BoundingBox>, ProviderError> {
                Err(ProviderError::Other("model crashed".into()))
            }

            fn compute_embeddings(
                &mut self,
                _image: &GrayImage,
                _regions: &[BoundingBox],
            ) -> Result<Vec<Embedding>, ProviderError> {
                Err(ProviderError::Other("model crashed".into()))
            }

            fn metric(&self) -> DistanceMetric {
                DistanceMetric::default()
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let store = IdentityStore::open(dir.path()).unwrap();
        let mut camera = ScriptedCamera::new(vec![Ok(180)]);

        let result = CaptureSession::new(&mut Broken, BUDGET, 1).enroll(&store, "dave", &mut camera);
        assert!(matches!(result, Err(SessionError::Provider(_))));
        assert_eq!(camera.opened, 1);
        assert!(camera.all_released());
    }

    #[test]
    fn test_snapshot_draws_labels() {
        let dir = tempfile::tempdir().unwrap();
        let frame = GrayImage::from_pixel(64, 64, image::Luma([40]));
        let region = BoundingBox::new(8.0, 24.0, 40.0, 32.0);
        let faces = |label: &str| {
            vec![Annotation {
                region: region.clone(),
                label: label.to_string(),
            }]
        };

        let alice_path = dir.path().join("alice.jpg");
        let unknown_path = dir.path().join("unknown.jpg");
        SnapshotPreview::new(&alice_path).show(&frame, &faces("alice"));
        SnapshotPreview::new(&unknown_path).show(&frame, &faces("Unknown"));

        let alice = std::fs::read(&alice_path).unwrap();
        let unknown = std::fs::read(&unknown_path).unwrap();
        assert_ne!(alice, unknown);

        let rendered = render_annotations(&frame, &faces("alice"));
        assert_ne!(rendered, render_annotations(&frame, &faces("Unknown")));
        assert_ne!(rendered, frame);
        // The interior of the box is left alone.
        assert_eq!(rendered.get_pixel(28, 40).0[0], 40);
    }
}
