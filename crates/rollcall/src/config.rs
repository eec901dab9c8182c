use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Process-wide configuration, built once at startup and handed to the
/// components that need it.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// V4L2 device path.
    pub camera_device: String,
    /// Directory containing the ONNX model files.
    pub model_dir: PathBuf,
    /// Directory holding one `<name>.jpg` reference image per identity.
    pub faces_dir: PathBuf,
    /// Attendance CSV table.
    pub ledger_path: PathBuf,
    /// Largest embedding distance accepted as a match.
    pub match_tolerance: f32,
    /// Wall-clock budget of one capture session, in seconds.
    pub session_secs: u64,
    /// Recognition frames are shrunk by this factor before detection.
    pub detection_scale: u32,
    pub admin_username: String,
    pub admin_password: String,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = default_data_dir();
        Self {
            camera_device: "/dev/video0".to_string(),
            model_dir: data_dir.join("models"),
            faces_dir: data_dir.join("faces"),
            ledger_path: data_dir.join("attendance.csv"),
            match_tolerance: 0.6,
            session_secs: 5,
            detection_scale: 4,
            admin_username: "admin".to_string(),
            admin_password: "123".to_string(),
        }
    }
}

impl Config {
    /// Load from the TOML file named by `ROLLCALL_CONFIG` (if set), then apply
    /// `ROLLCALL_*` environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let base = match std::env::var_os("ROLLCALL_CONFIG") {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => Self::default(),
        };
        Ok(base.with_env_overrides())
    }

    /// Parse a TOML config file; missing keys take their defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Override fields from `ROLLCALL_*` environment variables.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(v) = std::env::var("ROLLCALL_CAMERA_DEVICE") {
            self.camera_device = v;
        }
        if let Some(v) = env_path("ROLLCALL_MODEL_DIR") {
            self.model_dir = v;
        }
        if let Some(v) = env_path("ROLLCALL_FACES_DIR") {
            self.faces_dir = v;
        }
        if let Some(v) = env_path("ROLLCALL_LEDGER_PATH") {
            self.ledger_path = v;
        }
        self.match_tolerance = env_parse("ROLLCALL_MATCH_TOLERANCE", self.match_tolerance);
        self.session_secs = env_parse("ROLLCALL_SESSION_SECS", self.session_secs);
        self.detection_scale = env_parse("ROLLCALL_DETECTION_SCALE", self.detection_scale);
        if let Ok(v) = std::env::var("ROLLCALL_ADMIN_USERNAME") {
            self.admin_username = v;
        }
        if let Ok(v) = std::env::var("ROLLCALL_ADMIN_PASSWORD") {
            self.admin_password = v;
        }
        self
    }

    pub fn session_budget(&self) -> Duration {
        Duration::from_secs(self.session_secs)
    }
}

fn default_data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("rollcall")
}

fn env_path(key: &str) -> Option<PathBuf> {
    std::env::var_os(key).map(PathBuf::from)
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let c = Config::default();
        assert_eq!(c.camera_device, "/dev/video0");
        assert_eq!(c.session_budget(), Duration::from_secs(5));
        assert_eq!(c.detection_scale, 4);
        assert!((c.match_tolerance - 0.6).abs() < 1e-6);
        assert!(c.faces_dir.ends_with("rollcall/faces"));
        assert!(c.ledger_path.ends_with("rollcall/attendance.csv"));
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rollcall.toml");
        std::fs::write(
            &path,
            "camera_device = \"/dev/video4\"\nsession_secs = 8\nfaces_dir = \"/srv/faces\"\n",
        )
        .unwrap();

        let c = Config::from_file(&path).unwrap();
        assert_eq!(c.camera_device, "/dev/video4");
        assert_eq!(c.session_secs, 8);
        assert_eq!(c.faces_dir, PathBuf::from("/srv/faces"));
        assert_eq!(c.admin_username, "admin");
    }

    #[test]
    fn test_bad_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rollcall.toml");
        std::fs::write(&path, "session_secs = \"soon\"").unwrap();
        assert!(matches!(Config::from_file(&path), Err(ConfigError::Parse { .. })));
        assert!(matches!(
            Config::from_file(&dir.path().join("missing.toml")),
            Err(ConfigError::Read { .. })
        ));
    }

    #[test]
    fn test_env_parse_fallback() {
        assert_eq!(env_parse("ROLLCALL_TEST_UNSET_VARIABLE", 7u64), 7);
    }
}
