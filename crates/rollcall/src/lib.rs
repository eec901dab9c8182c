//! rollcall: face-recognition attendance.
//!
//! Wires the core identity store, matcher and ledger to a camera through
//! bounded capture sessions, and exposes the Home/Admin actions as plain
//! request/response handlers.

pub mod config;
pub mod handlers;
pub mod session;

pub use config::Config;
pub use handlers::{AdminDesk, AdminSession, Attendance, Credentials, ExportResponse, FixedCredentials, Level, Notice};
pub use session::{
    render_annotations, Annotation, CaptureSession, EnrollOutcome, NoPreview, Preview, RecognitionOutcome, RecognitionSummary,
    SessionError, SnapshotPreview,
};
