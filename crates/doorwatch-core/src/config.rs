use chrono::TimeDelta;
use secrecy::SecretString;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::cooldown::DEFAULT_COOLDOWN_SECS;
use crate::gallery::DEFAULT_ENCODING_DIM;
use crate::matcher::DEFAULT_MATCH_THRESHOLD;
use crate::reconcile::DEFAULT_WINDOW_MINS;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("{key}: cannot parse {value:?}")]
    Unparsable { key: &'static str, value: String },
    #[error("{key}: {reason}")]
    OutOfRange { key: &'static str, reason: String },
}

/// Connection settings for the directory / event log / ledger server.
#[derive(Debug)]
pub struct ServerSettings {
    pub url: String,
    pub database: String,
    pub username: String,
    pub password: SecretString,
    pub request_timeout: Duration,
}

/// Operator configuration, loaded from `DOORWATCH_*` environment variables
/// on top of an optional TOML file named by `DOORWATCH_CONFIG`.
#[derive(Debug)]
pub struct Settings {
    pub server: ServerSettings,
    /// Video source (V4L2 device path).
    pub camera_device: String,
    /// Camera display name sent with each detection.
    pub camera_name: String,
    /// Maximum accepted match distance, in [0, 1].
    pub match_threshold: f32,
    pub cooldown: TimeDelta,
    /// Process every Kth frame.
    pub frame_skip: u32,
    /// Scale applied before localization, in (0, 1].
    pub downscale: f32,
    /// Context pixels around a snapshot crop.
    pub snapshot_padding: u32,
    pub encoding_dim: usize,
    /// Base URL of the face localizer/encoder service.
    pub encoder_url: String,
    pub reconcile_window: TimeDelta,
    /// SQLite file holding the latest mismatch report.
    pub report_db: PathBuf,
}

/// TOML file layout; every key optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileSettings {
    server_url: Option<String>,
    database: Option<String>,
    username: Option<String>,
    password: Option<String>,
    request_timeout_secs: Option<u64>,
    camera_device: Option<String>,
    camera_name: Option<String>,
    match_threshold: Option<f32>,
    cooldown_secs: Option<i64>,
    frame_skip: Option<u32>,
    downscale: Option<f32>,
    snapshot_padding: Option<u32>,
    encoding_dim: Option<usize>,
    encoder_url: Option<String>,
    reconcile_window_mins: Option<i64>,
    report_db: Option<PathBuf>,
}

impl Settings {
    /// Load from the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        let file = match std::env::var("DOORWATCH_CONFIG") {
            Ok(path) => read_file(Path::new(&path))?,
            Err(_) => FileSettings::default(),
        };
        Self::resolve(file, |key| std::env::var(key).ok())
    }

    fn resolve(
        file: FileSettings,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let text = |key: &str, file_val: Option<String>, default: &str| {
            env(key).or(file_val).unwrap_or_else(|| default.to_string())
        };

        let request_timeout_secs = parsed(
            &env,
            "DOORWATCH_REQUEST_TIMEOUT_SECS",
            file.request_timeout_secs,
            10,
        )?;
        let cooldown_secs = parsed(
            &env,
            "DOORWATCH_COOLDOWN_SECS",
            file.cooldown_secs,
            DEFAULT_COOLDOWN_SECS,
        )?;
        let window_mins = parsed(
            &env,
            "DOORWATCH_RECONCILE_WINDOW_MINS",
            file.reconcile_window_mins,
            DEFAULT_WINDOW_MINS,
        )?;

        let cooldown = TimeDelta::try_seconds(cooldown_secs).ok_or(ConfigError::OutOfRange {
            key: "cooldown_secs",
            reason: "too large".into(),
        })?;
        let reconcile_window =
            TimeDelta::try_minutes(window_mins).ok_or(ConfigError::OutOfRange {
                key: "reconcile_window_mins",
                reason: "too large".into(),
            })?;

        let report_db = env("DOORWATCH_REPORT_DB")
            .map(PathBuf::from)
            .or(file.report_db)
            .unwrap_or_else(|| default_data_dir().join("mismatches.db"));

        let settings = Self {
            server: ServerSettings {
                url: text("DOORWATCH_SERVER_URL", file.server_url, "http://localhost:8069"),
                database: text("DOORWATCH_DATABASE", file.database, "odoo"),
                username: text("DOORWATCH_USERNAME", file.username, "admin"),
                password: SecretString::from(text("DOORWATCH_PASSWORD", file.password, "")),
                request_timeout: Duration::from_secs(request_timeout_secs),
            },
            camera_device: text("DOORWATCH_CAMERA_DEVICE", file.camera_device, "/dev/video0"),
            camera_name: text("DOORWATCH_CAMERA_NAME", file.camera_name, "Main Door"),
            match_threshold: parsed(
                &env,
                "DOORWATCH_MATCH_THRESHOLD",
                file.match_threshold,
                DEFAULT_MATCH_THRESHOLD,
            )?,
            cooldown,
            frame_skip: parsed(&env, "DOORWATCH_FRAME_SKIP", file.frame_skip, 3)?,
            downscale: parsed(&env, "DOORWATCH_DOWNSCALE", file.downscale, 0.5)?,
            snapshot_padding: parsed(
                &env,
                "DOORWATCH_SNAPSHOT_PADDING",
                file.snapshot_padding,
                30,
            )?,
            encoding_dim: parsed(
                &env,
                "DOORWATCH_ENCODING_DIM",
                file.encoding_dim,
                DEFAULT_ENCODING_DIM,
            )?,
            encoder_url: text("DOORWATCH_ENCODER_URL", file.encoder_url, "http://localhost:8500"),
            reconcile_window,
            report_db,
        };
        settings.validate(cooldown_secs, window_mins)?;
        Ok(settings)
    }

    fn validate(&self, cooldown_secs: i64, window_mins: i64) -> Result<(), ConfigError> {
        let out = |key: &'static str, reason: &str| -> Result<(), ConfigError> {
            Err(ConfigError::OutOfRange {
                key,
                reason: reason.to_string(),
            })
        };
        if !(0.0..=1.0).contains(&self.match_threshold) {
            return out("match_threshold", "must be within [0, 1]");
        }
        if self.frame_skip == 0 {
            return out("frame_skip", "must be at least 1");
        }
        if !(self.downscale > 0.0 && self.downscale <= 1.0) {
            return out("downscale", "must be within (0, 1]");
        }
        if self.encoding_dim == 0 {
            return out("encoding_dim", "must be positive");
        }
        if cooldown_secs < 0 {
            return out("cooldown_secs", "must not be negative");
        }
        if window_mins < 0 {
            return out("reconcile_window_mins", "must not be negative");
        }
        Ok(())
    }
}

fn read_file(path: &Path) -> Result<FileSettings, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Environment wins over the file, the file over `default`.
fn parsed<T: std::str::FromStr>(
    env: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    file_val: Option<T>,
    default: T,
) -> Result<T, ConfigError> {
    match env(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Unparsable { key, value: raw }),
        None => Ok(file_val.unwrap_or(default)),
    }
}

fn default_data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("doorwatch")
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let s = Settings::resolve(FileSettings::default(), env_of(&[])).unwrap();
        assert_eq!(s.match_threshold, 0.6);
        assert_eq!(s.cooldown, TimeDelta::seconds(300));
        assert_eq!(s.frame_skip, 3);
        assert_eq!(s.downscale, 0.5);
        assert_eq!(s.snapshot_padding, 30);
        assert_eq!(s.encoding_dim, 128);
        assert_eq!(s.camera_name, "Main Door");
        assert_eq!(s.reconcile_window, TimeDelta::minutes(30));
        assert!(s.report_db.ends_with("doorwatch/mismatches.db"));
    }

    #[test]
    fn test_env_overrides_file() {
        let mut tmp = NamedTempFile::new().unwrap();
        tmp.write_all(
            concat!(
                "camera_name = \"Back Door\"\n",
                "frame_skip = 5\n",
                "match_threshold = 0.5\n",
                "password = \"hunter2\"\n",
            )
            .as_bytes(),
        )
        .unwrap();
        let file = read_file(tmp.path()).unwrap();

        let s = Settings::resolve(file, env_of(&[("DOORWATCH_FRAME_SKIP", "2")])).unwrap();
        assert_eq!(s.camera_name, "Back Door");
        assert_eq!(s.frame_skip, 2);
        assert_eq!(s.match_threshold, 0.5);
        assert_eq!(s.server.password.expose_secret(), "hunter2");
    }

    #[test]
    fn test_unknown_file_key_is_rejected() {
        let mut tmp = NamedTempFile::new().unwrap();
        tmp.write_all(b"treshold = 0.4\n").unwrap();
        assert!(matches!(read_file(tmp.path()), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_out_of_range_values() {
        for (key, value) in [
            ("DOORWATCH_MATCH_THRESHOLD", "1.5"),
            ("DOORWATCH_FRAME_SKIP", "0"),
            ("DOORWATCH_DOWNSCALE", "0"),
            ("DOORWATCH_DOWNSCALE", "1.2"),
            ("DOORWATCH_ENCODING_DIM", "0"),
            ("DOORWATCH_COOLDOWN_SECS", "-1"),
        ] {
            let err =
                Settings::resolve(FileSettings::default(), env_of(&[(key, value)])).unwrap_err();
            assert!(matches!(err, ConfigError::OutOfRange { .. }), "{key}={value}");
        }
    }

    #[test]
    fn test_unparsable_value() {
        let err = Settings::resolve(
            FileSettings::default(),
            env_of(&[("DOORWATCH_COOLDOWN_SECS", "five minutes")]),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Unparsable { key: "DOORWATCH_COOLDOWN_SECS", .. }));
    }

    #[test]
    fn test_password_not_in_debug_output() {
        let s = Settings::resolve(
            FileSettings::default(),
            env_of(&[("DOORWATCH_PASSWORD", "s3cret")]),
        )
        .unwrap();
        assert!(!format!("{s:?}").contains("s3cret"));
    }
}
