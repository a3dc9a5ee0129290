//! Runtime settings from `GLYCORISK_*` environment variables.
//!
//! Parsing is best-effort: an unparseable value falls back to the default
//! with a warning instead of aborting startup.

use std::path::PathBuf;
use std::time::Duration;

use crate::adapters::artifact::{load_verifying_key, ArtifactError, BundleOptions};

pub const LOG_MODE_ENV: &str = "GLYCORISK_LOG_MODE";
pub const LOG_FILE_ENV: &str = "GLYCORISK_LOG_FILE";
pub const SANITIZE_MAX_BYTES_ENV: &str = "GLYCORISK_SANITIZE_MAX_BYTES";
pub const MODEL_DIR_ENV: &str = "GLYCORISK_MODEL_DIR";
pub const AUDIT_LOG_ENV: &str = "GLYCORISK_AUDIT_LOG";
pub const MODEL_LOAD_TIMEOUT_ENV: &str = "GLYCORISK_MODEL_LOAD_TIMEOUT_SECS";
pub const REQUIRE_SIGNED_BUNDLE_ENV: &str = "GLYCORISK_REQUIRE_SIGNED_BUNDLE";
pub const BUNDLE_PUBKEY_FILE_ENV: &str = "GLYCORISK_BUNDLE_PUBKEY_B64_FILE";
pub const PREDICT_ROUTE_ENV: &str = "GLYCORISK_PREDICT_ROUTE";

pub const DEFAULT_PREDICT_ROUTE: &str = "/api/prediction/predict";

/// Where formatted logs go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogMode {
    /// stderr, keeping stdout free for command output
    Auto,
    Stdout,
    Stderr,
    File,
}

impl std::str::FromStr for LogMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "stdout" => Ok(Self::Stdout),
            "stderr" => Ok(Self::Stderr),
            "file" => Ok(Self::File),
            other => Err(format!("unknown log mode '{other}'")),
        }
    }
}

/// Process-wide settings, built once at startup and passed down explicitly.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub model_dir: PathBuf,
    pub audit_log: PathBuf,
    pub model_load_timeout: Duration,
    pub require_signed_bundle: bool,
    pub bundle_pubkey_file: Option<PathBuf>,
    /// Route name recorded in audit entries.
    pub predict_route: String,
    pub log_mode: LogMode,
    pub log_file: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            model_dir: PathBuf::from("models"),
            audit_log: PathBuf::from("data/audit/predictions.jsonl"),
            model_load_timeout: Duration::from_secs(30),
            require_signed_bundle: false,
            bundle_pubkey_file: None,
            predict_route: DEFAULT_PREDICT_ROUTE.to_string(),
            log_mode: LogMode::Auto,
            log_file: PathBuf::from("data/glycorisk.log"),
        }
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim() {
        "1" | "true" | "TRUE" | "yes" | "YES" => Some(true),
        "0" | "false" | "FALSE" | "no" | "NO" => Some(false),
        _ => None,
    }
}

impl Settings {
    /// Read settings from the process environment.
    ///
    /// Also returns one message per ignored value. Settings are read before
    /// logging is configured, so the caller logs these once it is.
    #[must_use]
    pub fn from_env() -> (Self, Vec<String>) {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read settings through `lookup` (used by tests instead of the real
    /// environment). See [`Settings::from_env`].
    pub fn from_lookup<F>(lookup: F) -> (Self, Vec<String>)
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = Self::default();
        let mut warnings = Vec::new();
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(dir) = get(MODEL_DIR_ENV) {
            settings.model_dir = PathBuf::from(dir.trim());
        }
        if let Some(path) = get(AUDIT_LOG_ENV) {
            settings.audit_log = PathBuf::from(path.trim());
        }
        if let Some(raw) = get(MODEL_LOAD_TIMEOUT_ENV) {
            match raw.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => settings.model_load_timeout = Duration::from_secs(secs),
                _ => warnings.push(format!("Ignoring invalid {MODEL_LOAD_TIMEOUT_ENV}={raw:?}, using default")),
            }
        }
        if let Some(raw) = get(REQUIRE_SIGNED_BUNDLE_ENV) {
            match parse_bool(&raw) {
                Some(v) => settings.require_signed_bundle = v,
                None => warnings.push(format!("Ignoring invalid {REQUIRE_SIGNED_BUNDLE_ENV}={raw:?}, using default")),
            }
        }
        if let Some(path) = get(BUNDLE_PUBKEY_FILE_ENV) {
            settings.bundle_pubkey_file = Some(PathBuf::from(path.trim()));
        }
        if let Some(route) = get(PREDICT_ROUTE_ENV) {
            settings.predict_route = route.trim().to_string();
        }
        if let Some(raw) = get(LOG_MODE_ENV) {
            match raw.parse() {
                Ok(mode) => settings.log_mode = mode,
                Err(e) => warnings.push(format!("Ignoring {LOG_MODE_ENV}: {e}")),
            }
        }
        if let Some(path) = get(LOG_FILE_ENV) {
            settings.log_file = PathBuf::from(path.trim());
        }

        (settings, warnings)
    }

    /// Bundle loading options, reading the verifying key if one is
    /// configured.
    ///
    /// # Errors
    /// Returns error if the configured key file is unreadable or invalid.
    pub fn bundle_options(&self) -> Result<BundleOptions, ArtifactError> {
        let verifying_key = self
            .bundle_pubkey_file
            .as_deref()
            .map(load_verifying_key)
            .transpose()?;
        Ok(BundleOptions {
            require_signed: self.require_signed_bundle,
            verifying_key,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let (settings, warnings) = Settings::from_lookup(lookup(&[]));
        assert!(warnings.is_empty());
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.model_dir, PathBuf::from("models"));
        assert_eq!(settings.audit_log, PathBuf::from("data/audit/predictions.jsonl"));
        assert_eq!(settings.model_load_timeout, Duration::from_secs(30));
        assert_eq!(settings.predict_route, "/api/prediction/predict");
    }

    #[test]
    fn test_overrides() {
        let (settings, _) = Settings::from_lookup(lookup(&[
            (MODEL_DIR_ENV, "/srv/model"),
            (AUDIT_LOG_ENV, "/var/log/audit.jsonl"),
            (MODEL_LOAD_TIMEOUT_ENV, "5"),
            (REQUIRE_SIGNED_BUNDLE_ENV, "yes"),
            (PREDICT_ROUTE_ENV, "/predict"),
            (LOG_MODE_ENV, "FILE"),
        ]));
        assert_eq!(settings.model_dir, PathBuf::from("/srv/model"));
        assert_eq!(settings.model_load_timeout, Duration::from_secs(5));
        assert!(settings.require_signed_bundle);
        assert_eq!(settings.predict_route, "/predict");
        assert_eq!(settings.log_mode, LogMode::File);
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let (settings, warnings) = Settings::from_lookup(lookup(&[
            (MODEL_LOAD_TIMEOUT_ENV, "soon"),
            (REQUIRE_SIGNED_BUNDLE_ENV, "maybe"),
            (LOG_MODE_ENV, "syslog"),
            (MODEL_DIR_ENV, "   "),
        ]));
        assert_eq!(settings, Settings::default());
        assert_eq!(warnings.len(), 3);
        assert!(warnings[0].contains(MODEL_LOAD_TIMEOUT_ENV) && warnings[0].contains("soon"));
        assert!(warnings[2].contains("syslog"));
    }

    #[test]
    fn test_bundle_options_without_key() {
        let options = Settings::default().bundle_options().expect("options");
        assert!(!options.require_signed);
        assert!(options.verifying_key.is_none());
    }
}
