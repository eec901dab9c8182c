//! rollcall-core: identities, matching and the attendance ledger.
//!
//! Face detection (SCRFD) and embedding (ArcFace) run through ONNX Runtime
//! behind the [`EmbeddingProvider`] trait; everything else is plain file I/O.

pub mod detector;
pub mod ledger;
pub mod matcher;
pub mod provider;
pub mod recognizer;
pub mod store;
pub mod types;

pub use ledger::{AttendanceLedger, AttendanceRecord, LedgerError, Month, MonthExport};
pub use matcher::{Matcher, NearestMatcher};
pub use provider::{EmbeddingProvider, OnnxProvider, ProviderError};
pub use store::{IdentityStore, StoreError};
pub use types::{BoundingBox, DistanceMetric, Embedding, Identity, KnownFaces, MatchResult, UNKNOWN_LABEL};
