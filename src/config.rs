//! Settings for the client registry.
//!
//! Settings are read from JSON files in the working directory:
//! `test-settings.json` when present, otherwise `appsettings.json`. Only the
//! `http_factory` section is used:
//!
//! ```json
//! {
//!   "http_factory": {
//!     "clients": {
//!       "orders": {
//!         "base_url": "https://orders.test",
//!         "use_cookie_jar": true,
//!         "default_headers": { "X-Tenant": "qa" },
//!         "timeout_ms": 30000
//!       }
//!     },
//!     "polling": { "max_attempts": 20, "interval_ms": 500 },
//!     "codec": { "case_insensitive_fields": true }
//!   }
//! }
//! ```
//!
//! When `SMARTHTTP_ENVIRONMENT` is set, `<stem>.<environment>.json` is merged
//! over the base file. `SMARTHTTP_POLL_MAX_ATTEMPTS` and
//! `SMARTHTTP_POLL_INTERVAL_MS` override the polling section last.

use crate::codec::{Codec, FieldMatching, JsonCodec};
use crate::retry::{RetryPolicy, DEFAULT_INTERVAL, DEFAULT_MAX_ATTEMPTS};
use crate::{Error, Result};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Settings file preferred by test runs.
pub const TEST_SETTINGS_FILE: &str = "test-settings.json";

/// Settings file used when no test settings exist.
pub const APP_SETTINGS_FILE: &str = "appsettings.json";

/// Section of the settings file holding client configuration.
pub const SECTION: &str = "http_factory";

/// Names the environment whose overlay file is merged.
pub const ENVIRONMENT_VAR: &str = "SMARTHTTP_ENVIRONMENT";

/// Overrides `polling.max_attempts`.
pub const POLL_MAX_ATTEMPTS_VAR: &str = "SMARTHTTP_POLL_MAX_ATTEMPTS";

/// Overrides `polling.interval_ms`.
pub const POLL_INTERVAL_MS_VAR: &str = "SMARTHTTP_POLL_INTERVAL_MS";

/// The `http_factory` section.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Clients to build, keyed by name.
    pub clients: BTreeMap<String, ClientSettings>,
    /// Default poll budget.
    pub polling: PollingSettings,
    /// Default codec behavior.
    pub codec: CodecSettings,
}

/// One configured client.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ClientSettings {
    /// Base address the client's endpoints are resolved against.
    pub base_url: String,
    /// Keep cookies between requests.
    #[serde(default)]
    pub use_cookie_jar: bool,
    /// Headers sent with every request.
    #[serde(default)]
    pub default_headers: BTreeMap<String, String>,
    /// Per-request timeout in milliseconds.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

/// Poll budget used when a request carries no policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PollingSettings {
    /// Total attempts, including the first.
    pub max_attempts: usize,
    /// Wait between attempts in milliseconds.
    pub interval_ms: u64,
}

impl Default for PollingSettings {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            interval_ms: DEFAULT_INTERVAL.as_millis() as u64,
        }
    }
}

/// Codec settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CodecSettings {
    /// Match JSON keys to field names ignoring ASCII case.
    pub case_insensitive_fields: bool,
}

impl Default for CodecSettings {
    fn default() -> Self {
        Self {
            case_insensitive_fields: true,
        }
    }
}

impl Settings {
    /// Parses a whole settings document and extracts the `http_factory`
    /// section. A document without the section yields defaults.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the document is not valid JSON or
    /// the section has the wrong shape.
    ///
    /// # Examples
    ///
    /// ```
    /// use smarthttp::Settings;
    ///
    /// let settings = Settings::from_json_str(r#"{
    ///     "http_factory": {
    ///         "clients": { "orders": { "base_url": "https://orders.test" } },
    ///         "polling": { "max_attempts": 5 }
    ///     }
    /// }"#).unwrap();
    ///
    /// assert!(settings.clients.contains_key("orders"));
    /// assert_eq!(settings.polling.max_attempts, 5);
    /// assert_eq!(settings.polling.interval_ms, 1000);
    /// ```
    pub fn from_json_str(json: &str) -> Result<Self> {
        let document: Value = serde_json::from_str(json)
            .map_err(|e| Error::Configuration(format!("Invalid settings JSON: {}", e)))?;
        Self::from_document(document)
    }

    /// Reads and parses a single settings file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the file cannot be read or parsed.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_document(read_document(path.as_ref())?)
    }

    /// Loads settings from the current working directory, using the process
    /// environment for the overlay and overrides.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if a settings file exists but is
    /// malformed, or an override is not a number.
    pub fn load() -> Result<Self> {
        let dir = std::env::current_dir()
            .map_err(|e| Error::Configuration(format!("Cannot resolve working directory: {}", e)))?;
        Self::load_from_dir(dir, |name| std::env::var(name).ok())
    }

    /// Loads settings from `dir`, reading variables through `lookup`.
    ///
    /// Missing files are not an error: defaults are used instead.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if a settings file exists but is
    /// malformed, or an override is not a number.
    pub fn load_from_dir<F>(dir: impl AsRef<Path>, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let dir = dir.as_ref();
        let Some(base) = locate_base_file(dir) else {
            tracing::debug!(dir = %dir.display(), "No settings file found, using defaults");
            let mut settings = Settings::default();
            settings.apply_overrides(&lookup)?;
            return Ok(settings);
        };

        tracing::debug!(path = %base.display(), "Loading settings");
        let mut document = read_document(&base)?;

        if let Some(environment) = lookup(ENVIRONMENT_VAR).filter(|env| !env.is_empty()) {
            let overlay = overlay_path(&base, &environment);
            if overlay.is_file() {
                tracing::debug!(path = %overlay.display(), environment = %environment, "Merging settings overlay");
                merge(&mut document, read_document(&overlay)?);
            } else {
                tracing::debug!(path = %overlay.display(), "No settings overlay for environment");
            }
        }

        let mut settings = Self::from_document(document)?;
        settings.apply_overrides(&lookup)?;
        Ok(settings)
    }

    /// Applies the polling overrides found through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if an override is not a number.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup(POLL_MAX_ATTEMPTS_VAR) {
            self.polling.max_attempts = parse_override(POLL_MAX_ATTEMPTS_VAR, &raw)?;
        }
        if let Some(raw) = lookup(POLL_INTERVAL_MS_VAR) {
            self.polling.interval_ms = parse_override(POLL_INTERVAL_MS_VAR, &raw)?;
        }
        Ok(())
    }

    /// The default retry policy described by the polling section.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if `max_attempts` is zero.
    pub fn retry_policy(&self) -> Result<RetryPolicy> {
        RetryPolicy::new(
            self.polling.max_attempts,
            Duration::from_millis(self.polling.interval_ms),
        )
    }

    /// The default codec described by the codec section.
    pub fn codec(&self) -> Arc<dyn Codec> {
        let field_matching = if self.codec.case_insensitive_fields {
            FieldMatching::CaseInsensitive
        } else {
            FieldMatching::Exact
        };
        Arc::new(JsonCodec::new().with_field_matching(field_matching))
    }

    fn from_document(mut document: Value) -> Result<Self> {
        match document.get_mut(SECTION).map(Value::take) {
            Some(section) => serde_json::from_value(section).map_err(|e| {
                Error::Configuration(format!("Invalid '{}' section: {}", SECTION, e))
            }),
            None => Ok(Self::default()),
        }
    }
}

impl ClientSettings {
    /// The configured timeout, if any.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

fn locate_base_file(dir: &Path) -> Option<PathBuf> {
    [TEST_SETTINGS_FILE, APP_SETTINGS_FILE]
        .iter()
        .map(|name| dir.join(name))
        .find(|path| path.is_file())
}

fn overlay_path(base: &Path, environment: &str) -> PathBuf {
    let stem = base
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("appsettings");
    base.with_file_name(format!("{stem}.{environment}.json"))
}

fn read_document(path: &Path) -> Result<Value> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        Error::Configuration(format!("Cannot read {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&text)
        .map_err(|e| Error::Configuration(format!("Invalid JSON in {}: {}", path.display(), e)))
}

/// Merges `overlay` into `base`. Objects merge key by key, anything else
/// replaces.
fn merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

fn parse_override<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| Error::Configuration(format!("{} must be a number, got '{}'", name, raw)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn env(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    fn write(dir: &TempDir, name: &str, contents: serde_json::Value) {
        std::fs::write(dir.path().join(name), contents.to_string()).unwrap();
    }

    #[test]
    fn defaults_when_nothing_is_configured() {
        let dir = TempDir::new().unwrap();
        let settings = Settings::load_from_dir(dir.path(), no_env).unwrap();

        assert!(settings.clients.is_empty());
        assert_eq!(settings.polling.max_attempts, 60);
        assert_eq!(settings.polling.interval_ms, 1000);
        assert!(settings.codec.case_insensitive_fields);
        assert_eq!(settings.retry_policy().unwrap(), RetryPolicy::default());
    }

    #[test]
    fn test_settings_win_over_app_settings() {
        let dir = TempDir::new().unwrap();
        write(
            &dir,
            APP_SETTINGS_FILE,
            json!({"http_factory": {"clients": {"app": {"base_url": "https://app.test"}}}}),
        );
        write(
            &dir,
            TEST_SETTINGS_FILE,
            json!({"http_factory": {"clients": {"test": {"base_url": "https://test.test"}}}}),
        );

        let settings = Settings::load_from_dir(dir.path(), no_env).unwrap();
        assert!(settings.clients.contains_key("test"));
        assert!(!settings.clients.contains_key("app"));
    }

    #[test]
    fn client_fields_are_read() {
        let settings = Settings::from_json_str(
            &json!({
                "http_factory": {
                    "clients": {
                        "orders": {
                            "base_url": "https://orders.test",
                            "use_cookie_jar": true,
                            "default_headers": {"X-Tenant": "qa"},
                            "timeout_ms": 2500
                        }
                    }
                },
                "unrelated": {"ignored": true}
            })
            .to_string(),
        )
        .unwrap();

        let orders = &settings.clients["orders"];
        assert_eq!(orders.base_url, "https://orders.test");
        assert!(orders.use_cookie_jar);
        assert_eq!(orders.default_headers["X-Tenant"], "qa");
        assert_eq!(orders.timeout(), Some(Duration::from_millis(2500)));
    }

    #[test]
    fn environment_overlay_merges_nested_keys() {
        let dir = TempDir::new().unwrap();
        write(
            &dir,
            APP_SETTINGS_FILE,
            json!({"http_factory": {
                "clients": {"orders": {"base_url": "https://orders.test", "use_cookie_jar": true}},
                "polling": {"max_attempts": 10, "interval_ms": 200}
            }}),
        );
        write(
            &dir,
            "appsettings.staging.json",
            json!({"http_factory": {
                "clients": {"orders": {"base_url": "https://orders.staging.test"}},
                "polling": {"interval_ms": 50}
            }}),
        );

        let settings =
            Settings::load_from_dir(dir.path(), env(&[(ENVIRONMENT_VAR, "staging")])).unwrap();
        let orders = &settings.clients["orders"];
        assert_eq!(orders.base_url, "https://orders.staging.test");
        assert!(orders.use_cookie_jar);
        assert_eq!(settings.polling.max_attempts, 10);
        assert_eq!(settings.polling.interval_ms, 50);
    }

    #[test]
    fn missing_overlay_is_ignored() {
        let dir = TempDir::new().unwrap();
        write(
            &dir,
            APP_SETTINGS_FILE,
            json!({"http_factory": {"polling": {"max_attempts": 7}}}),
        );
        let settings =
            Settings::load_from_dir(dir.path(), env(&[(ENVIRONMENT_VAR, "prod")])).unwrap();
        assert_eq!(settings.polling.max_attempts, 7);
    }

    #[test]
    fn variables_override_polling() {
        let dir = TempDir::new().unwrap();
        write(
            &dir,
            APP_SETTINGS_FILE,
            json!({"http_factory": {"polling": {"max_attempts": 7, "interval_ms": 300}}}),
        );
        let settings = Settings::load_from_dir(
            dir.path(),
            env(&[(POLL_MAX_ATTEMPTS_VAR, "3"), (POLL_INTERVAL_MS_VAR, " 50 ")]),
        )
        .unwrap();

        assert_eq!(
            settings.retry_policy().unwrap(),
            RetryPolicy::new(3, Duration::from_millis(50)).unwrap()
        );
    }

    #[test]
    fn bad_override_is_a_configuration_error() {
        let mut settings = Settings::default();
        let result = settings.apply_overrides(env(&[(POLL_MAX_ATTEMPTS_VAR, "lots")]));
        assert!(matches!(result, Err(Error::Configuration(_))));
    }

    #[test]
    fn malformed_file_is_a_configuration_error() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(APP_SETTINGS_FILE), "{ not json").unwrap();
        assert!(matches!(
            Settings::load_from_dir(dir.path(), no_env),
            Err(Error::Configuration(_))
        ));

        let wrong_shape = r#"{"http_factory": {"clients": {"x": {"use_cookie_jar": true}}}}"#;
        assert!(matches!(
            Settings::from_json_str(wrong_shape),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn zero_attempts_fail_policy_construction() {
        let settings =
            Settings::from_json_str(r#"{"http_factory": {"polling": {"max_attempts": 0}}}"#)
                .unwrap();
        assert!(matches!(
            settings.retry_policy(),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn codec_follows_settings() {
        let mut settings = Settings::default();
        assert_eq!(
            settings.codec().field_matching(),
            FieldMatching::CaseInsensitive
        );
        settings.codec.case_insensitive_fields = false;
        assert_eq!(settings.codec().field_matching(), FieldMatching::Exact);
    }

    #[test]
    fn merge_replaces_scalars_and_extends_objects() {
        let mut base = json!({"a": {"b": 1, "c": [1, 2]}, "d": "x"});
        merge(&mut base, json!({"a": {"c": [3], "e": true}, "d": null}));
        assert_eq!(base, json!({"a": {"b": 1, "c": [3], "e": true}, "d": null}));
    }
}
