//! Request/response handlers behind the Home and Admin views.
//!
//! Every user-facing outcome is a [`Notice`]. Only persistence failures
//! (identity images, attendance table) escape as errors.
//!
//! [`AdminDesk`] covers login and export and never touches the camera or the
//! face models. [`Attendance`] owns those and runs capture sessions.

use crate::config::Config;
use crate::session::{CaptureSession, EnrollOutcome, Preview, RecognitionOutcome, SessionError};
use anyhow::{Context, Result};
use rollcall_core::{AttendanceLedger, EmbeddingProvider, IdentityStore, LedgerError, Month, MonthExport, StoreError};
use rollcall_hw::OpenCamera;
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Info,
    Success,
    Warning,
    Error,
}

/// A status message for the operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: Level,
    pub message: String,
}

impl Notice {
    pub fn info(message: impl Into<String>) -> Self {
        Self { level: Level::Info, message: message.into() }
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self { level: Level::Success, message: message.into() }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self { level: Level::Warning, message: message.into() }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self { level: Level::Error, message: message.into() }
    }

    pub fn is_success(&self) -> bool {
        self.level == Level::Success
    }

    /// The requested action did not happen. Info notices such as "no data"
    /// are expected states and never count as failures.
    pub fn is_failure(&self) -> bool {
        matches!(self.level, Level::Warning | Level::Error)
    }
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.level {
            Level::Info => "info",
            Level::Success => "ok",
            Level::Warning => "warning",
            Level::Error => "error",
        };
        write!(f, "[{tag}] {}", self.message)
    }
}

/// Checks admin credentials.
pub trait Credentials {
    fn verify(&self, username: &str, password: &str) -> bool;
}

/// Fixed username/password pair from configuration.
///
/// Plain-text comparison; stands in until a real credential store exists.
#[derive(Debug, Clone)]
pub struct FixedCredentials {
    username: String,
    password: String,
}

impl FixedCredentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl Credentials for FixedCredentials {
    fn verify(&self, username: &str, password: &str) -> bool {
        username == self.username && password == self.password
    }
}

/// Proof of a successful admin login; required by admin operations.
#[derive(Debug)]
pub struct AdminSession {
    username: String,
}

impl AdminSession {
    pub fn username(&self) -> &str {
        &self.username
    }
}

/// Response to an export request.
#[derive(Debug)]
pub struct ExportResponse {
    pub notice: Notice,
    /// Present whenever the month is valid, even with zero rows.
    pub export: Option<MonthExport>,
}

/// Admin login and attendance export. Needs no camera and no models.
pub struct AdminDesk {
    ledger: AttendanceLedger,
    credentials: Box<dyn Credentials>,
}

impl AdminDesk {
    pub fn new(config: &Config) -> Self {
        Self {
            ledger: AttendanceLedger::at(&config.ledger_path),
            credentials: Box::new(FixedCredentials::new(
                &config.admin_username,
                &config.admin_password,
            )),
        }
    }

    /// Swap the credential check.
    pub fn with_credentials(mut self, credentials: impl Credentials + 'static) -> Self {
        self.credentials = Box::new(credentials);
        self
    }

    pub fn ledger(&self) -> &AttendanceLedger {
        &self.ledger
    }

    /// Admin view: check credentials.
    pub fn login(&self, username: &str, password: &str) -> std::result::Result<AdminSession, Notice> {
        if self.credentials.verify(username, password) {
            tracing::info!(username, "admin login");
            Ok(AdminSession {
                username: username.to_string(),
            })
        } else {
            tracing::warn!(username, "rejected admin login");
            Err(Notice::error("Invalid login credentials."))
        }
    }

    /// Admin view: attendance rows for `month` (`YYYY-MM`).
    pub fn export_attendance(&self, admin: &AdminSession, month: &str) -> Result<ExportResponse> {
        tracing::info!(admin = admin.username(), month, "export requested");
        let month = match Month::parse(month.trim()) {
            Ok(month) => month,
            Err(LedgerError::InvalidMonth(m)) => {
                return Ok(ExportResponse {
                    notice: Notice::warning(format!("{m:?} is not a month; use YYYY-MM.")),
                    export: None,
                })
            }
            Err(e) => return Err(e).context("parsing month"),
        };

        if !self.ledger.exists() {
            return Ok(ExportResponse {
                notice: Notice::info("Attendance file not found."),
                export: Some(MonthExport {
                    month,
                    records: Vec::new(),
                }),
            });
        }

        let export = self
            .ledger
            .export_month(&month.to_string())
            .context("reading attendance table")?;
        let notice = if export.is_empty() {
            Notice::info("No records found for this month.")
        } else {
            Notice::success(format!(
                "{} record(s) ready as {}",
                export.records.len(),
                export.file_name()
            ))
        };
        Ok(ExportResponse {
            notice,
            export: Some(export),
        })
    }
}

/// The attendance application: one provider, one camera, one store, one ledger.
pub struct Attendance<P, C> {
    provider: P,
    camera: C,
    store: IdentityStore,
    ledger: AttendanceLedger,
    budget: Duration,
    detection_scale: u32,
}

impl<P: EmbeddingProvider, C: OpenCamera> Attendance<P, C> {
    /// Wire up the application from configuration.
    pub fn new(config: &Config, provider: P, camera: C) -> Result<Self> {
        let store = IdentityStore::open(&config.faces_dir)
            .with_context(|| format!("opening identity store at {}", config.faces_dir.display()))?;
        Ok(Self {
            provider,
            camera,
            store,
            ledger: AttendanceLedger::at(&config.ledger_path),
            budget: config.session_budget(),
            detection_scale: config.detection_scale,
        })
    }

    pub fn store(&self) -> &IdentityStore {
        &self.store
    }

    pub fn ledger(&self) -> &AttendanceLedger {
        &self.ledger
    }

    /// Home view: run one recognition session.
    pub fn start_attendance(&mut self, preview: &mut dyn Preview) -> Result<Notice> {
        let mut session = CaptureSession::new(&mut self.provider, self.budget, self.detection_scale);
        let outcome = session.recognize(&mut self.store, &self.ledger, &mut self.camera, preview);

        let summary = match outcome {
            Ok(RecognitionOutcome::NoIdentities) => {
                return Ok(Notice::info(
                    "No registered faces found. Please register a face.",
                ))
            }
            Ok(RecognitionOutcome::Completed(summary)) => summary,
            Err(e) => return user_notice(e),
        };

        let mut message = String::from("Face recognition completed.");
        if !summary.checked_in.is_empty() {
            message.push_str(&format!(" Checked in: {}.", summary.checked_in.join(", ")));
        }
        let already: Vec<&str> = summary
            .recognized
            .iter()
            .filter(|n| !summary.checked_in.contains(*n))
            .map(String::as_str)
            .collect();
        if !already.is_empty() {
            message.push_str(&format!(" Already checked in today: {}.", already.join(", ")));
        }
        if let Some(reason) = &summary.interrupted {
            message.push_str(&format!(" Camera stopped early: {reason}."));
        }
        Ok(Notice::success(message))
    }

    /// Admin view: enroll a new face under `name`.
    pub fn register_face(&mut self, admin: &AdminSession, name: &str) -> Result<Notice> {
        let name = name.trim();
        if name.is_empty() {
            return Ok(Notice::warning("Please enter a name."));
        }
        tracing::info!(admin = admin.username(), name, "register face requested");

        let mut session = CaptureSession::new(&mut self.provider, self.budget, self.detection_scale);
        match session.enroll(&self.store, name, &mut self.camera) {
            Ok(EnrollOutcome::Saved { name, .. }) => {
                Ok(Notice::success(format!("Face registered for {name}")))
            }
            Ok(EnrollOutcome::NoFaceDetected { .. }) => {
                Ok(Notice::warning("Face not detected. Try again."))
            }
            Err(SessionError::Store(StoreError::InvalidName(n))) => Ok(Notice::warning(format!(
                "{n:?} cannot be used as a name."
            ))),
            Err(e) => user_notice(e),
        }
    }
}

/// Camera and provider failures become notices; persistence failures propagate.
fn user_notice(e: SessionError) -> Result<Notice> {
    match e {
        SessionError::Camera(e) => Ok(Notice::error(format!("Camera unavailable: {e}"))),
        SessionError::Provider(e) => Ok(Notice::error(format!("Face processing failed: {e}"))),
        SessionError::Store(e) => Err(e).context("identity store"),
        SessionError::Ledger(e) => Err(e).context("attendance ledger"),
    }
}
