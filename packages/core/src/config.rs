// KeyVault Demo Configuration Module
//
// This module merges the optional settings file with environment variables
// and resolves the run mode (local secrets vs. Azure Key Vault).

use crate::error::KeyVaultError;
use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// Settings file read when `--config` is not given.
pub const DEFAULT_SETTINGS_FILE: &str = "appsettings.json";

pub const DEFAULT_USERNAME_SECRET: &str = "rosina-username-dev";
pub const DEFAULT_PASSWORD_SECRET: &str = "rosina-password-dev";

pub const USE_LOCAL_KEY: &str = "USE_LOCAL";
pub const LOCAL_USERNAME_KEY: &str = "TEST_USERNAME";
pub const LOCAL_PASSWORD_KEY: &str = "TEST_PASSWORD";
pub const VAULT_URL_KEY: &str = "KeyVault:VaultUrl";
pub const VAULT_NAME_KEY: &str = "KEYVAULT_NAME";
pub const USERNAME_SECRET_NAME_KEY: &str = "USERNAME_SECRET_NAME";
pub const PASSWORD_SECRET_NAME_KEY: &str = "PASSWORD_SECRET_NAME";
pub const HTTP_TIMEOUT_KEY: &str = "KEYVAULT_HTTP_TIMEOUT_SECS";

const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

/// Where the two secrets come from, decided once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    /// Values supplied directly by configuration.
    Local { username: String, password: String },
    /// Values fetched from the Key Vault at `endpoint`.
    Remote { endpoint: Url },
}

/// Everything the fetcher needs for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    pub mode: Mode,
    /// Secret names in lookup order: username first, password second.
    pub secret_names: [String; 2],
    pub http_timeout: Duration,
}

/// Values for one case-folded key, by original spelling.
type Spellings = BTreeMap<String, String>;

/// Flattened, case-insensitive view over the settings file and environment.
///
/// Nested file keys are joined with `:` (`KeyVault:VaultUrl`). Environment
/// variables use `__` for nesting (`KeyVault__VaultUrl`) and override file
/// values.
///
/// When several spellings of one key are present in the same source, the
/// spelling that matches the lookup exactly wins. Otherwise the first spelling
/// in byte order wins, so upper case beats lower case regardless of the order
/// the environment lists them in.
#[derive(Debug, Clone, Default)]
pub struct Settings {
    values: BTreeMap<String, Spellings>,
}

impl Settings {
    /// Load the settings file (if readable) and overlay the process environment.
    pub fn load<P: AsRef<Path>>(path: P) -> Self {
        Self::from_file_or_empty(path).with_env(unicode_env(std::env::vars_os()))
    }

    /// Load a settings file, failing if it is missing or malformed.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read settings file: {:?}", path.as_ref()))?;

        let extension = path
            .as_ref()
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or("");

        let document: serde_json::Value = match extension {
            "json" => serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse JSON settings: {:?}", path.as_ref()))?,
            "yaml" | "yml" => serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse YAML settings: {:?}", path.as_ref()))?,
            _ => serde_json::from_str(&content)
                .or_else(|_| serde_yaml::from_str(&content))
                .with_context(|| {
                    format!("Settings file is neither JSON nor YAML: {:?}", path.as_ref())
                })?,
        };

        Ok(Self::from_document(&document))
    }

    /// Load a settings file, treating a missing or malformed file as empty.
    pub fn from_file_or_empty<P: AsRef<Path>>(path: P) -> Self {
        if !path.as_ref().exists() {
            debug!(path = %path.as_ref().display(), "settings file not found, using environment only");
            return Self::default();
        }

        match Self::from_file(path.as_ref()) {
            Ok(settings) => settings,
            Err(e) => {
                warn!(error = %format!("{:#}", e), "ignoring unreadable settings file");
                Self::default()
            }
        }
    }

    /// Build settings from an already-parsed document.
    pub fn from_document(document: &serde_json::Value) -> Self {
        let mut settings = Self::default();
        flatten(document, None, &mut settings.values);
        settings
    }

    /// Overlay environment-style pairs on top of the current values.
    pub fn with_env<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut overlay: BTreeMap<String, Spellings> = BTreeMap::new();
        for (key, value) in vars {
            let key = key.as_ref().replace("__", ":");
            overlay
                .entry(normalize_key(&key))
                .or_default()
                .insert(key, value.into());
        }

        // An environment key replaces every file spelling of the same key.
        self.values.extend(overlay);
        self
    }

    /// Look up a value by key, ignoring case.
    pub fn get(&self, key: &str) -> Option<&str> {
        let spellings = self.values.get(&normalize_key(key))?;
        spellings
            .get(key)
            .or_else(|| spellings.values().next())
            .map(String::as_str)
    }

    /// Look up a value, treating blank strings as absent.
    fn get_non_empty(&self, key: &str) -> Option<&str> {
        self.get(key)
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }

    /// `true` iff `USE_LOCAL` equals "true", ignoring case.
    pub fn use_local(&self) -> bool {
        self.get(USE_LOCAL_KEY)
            .map(|value| value.trim().eq_ignore_ascii_case("true"))
            .unwrap_or(false)
    }

    /// Vault endpoint from `KeyVault:VaultUrl`, or derived from `KEYVAULT_NAME`.
    pub fn vault_url(&self) -> Option<String> {
        if let Some(url) = self.get_non_empty(VAULT_URL_KEY) {
            return Some(url.trim_end_matches('/').to_string());
        }

        self.get_non_empty(VAULT_NAME_KEY)
            .map(|name| format!("https://{}.vault.azure.net", name))
    }

    /// The two secret names in lookup order.
    pub fn secret_names(&self) -> [String; 2] {
        [
            self.get_non_empty(USERNAME_SECRET_NAME_KEY)
                .unwrap_or(DEFAULT_USERNAME_SECRET)
                .to_string(),
            self.get_non_empty(PASSWORD_SECRET_NAME_KEY)
                .unwrap_or(DEFAULT_PASSWORD_SECRET)
                .to_string(),
        ]
    }

    pub fn http_timeout(&self) -> Duration {
        let secs = self
            .get_non_empty(HTTP_TIMEOUT_KEY)
            .and_then(|value| value.parse::<u64>().ok())
            .filter(|secs| *secs > 0)
            .unwrap_or(DEFAULT_HTTP_TIMEOUT_SECS);
        Duration::from_secs(secs)
    }

    /// Resolve the run mode, failing when the chosen mode lacks its inputs.
    pub fn resolve(&self) -> Result<RunConfig, KeyVaultError> {
        let mode = if self.use_local() {
            self.resolve_local()?
        } else {
            self.resolve_remote()?
        };

        Ok(RunConfig {
            mode,
            secret_names: self.secret_names(),
            http_timeout: self.http_timeout(),
        })
    }

    fn resolve_local(&self) -> Result<Mode, KeyVaultError> {
        // Local values keep surrounding whitespace; only blank counts as missing.
        let present = |key: &str| self.get(key).filter(|value| !value.trim().is_empty());
        let username = present(LOCAL_USERNAME_KEY);
        let password = present(LOCAL_PASSWORD_KEY);

        match (username, password) {
            (Some(username), Some(password)) => Ok(Mode::Local {
                username: username.to_string(),
                password: password.to_string(),
            }),
            (username, password) => {
                let missing: Vec<&str> = [
                    (username.is_none(), LOCAL_USERNAME_KEY),
                    (password.is_none(), LOCAL_PASSWORD_KEY),
                ]
                .into_iter()
                .filter(|(is_missing, _)| *is_missing)
                .map(|(_, key)| key)
                .collect();

                Err(KeyVaultError::Configuration(format!(
                    "{}=true but {} not set. Set {} and {}, or unset {} to use Azure Key Vault.",
                    USE_LOCAL_KEY,
                    missing.join(" and "),
                    LOCAL_USERNAME_KEY,
                    LOCAL_PASSWORD_KEY,
                    USE_LOCAL_KEY,
                )))
            }
        }
    }

    fn resolve_remote(&self) -> Result<Mode, KeyVaultError> {
        let endpoint = self.vault_url().ok_or_else(|| {
            KeyVaultError::Configuration(format!(
                "{} not found in configuration. Set it in {} (or {} in the environment), \
                 or set {}=true with {} and {} to use local secrets.",
                VAULT_URL_KEY,
                DEFAULT_SETTINGS_FILE,
                "KeyVault__VaultUrl",
                USE_LOCAL_KEY,
                LOCAL_USERNAME_KEY,
                LOCAL_PASSWORD_KEY,
            ))
        })?;

        Ok(Mode::Remote {
            endpoint: parse_endpoint(&endpoint)?,
        })
    }
}

/// Keep the environment pairs that are valid Unicode.
///
/// Variables this program never reads may hold arbitrary bytes, so they are
/// skipped rather than treated as an error.
pub fn unicode_env<I>(vars: I) -> impl Iterator<Item = (String, String)>
where
    I: IntoIterator<Item = (OsString, OsString)>,
{
    vars.into_iter()
        .filter_map(|(key, value)| match (key.into_string(), value.into_string()) {
            (Ok(key), Ok(value)) => Some((key, value)),
            (Ok(key), Err(_)) => {
                debug!(key = %key, "skipping environment variable with non-unicode value");
                None
            }
            (Err(key), _) => {
                debug!(key = ?key, "skipping environment variable with non-unicode name");
                None
            }
        })
}

fn parse_endpoint(endpoint: &str) -> Result<Url, KeyVaultError> {
    let parsed = Url::parse(endpoint).map_err(|e| {
        KeyVaultError::Configuration(format!(
            "{} is not a valid URL '{}': {}",
            VAULT_URL_KEY, endpoint, e
        ))
    })?;

    let is_web = matches!(parsed.scheme(), "https" | "http") && parsed.host_str().is_some();
    if !is_web {
        return Err(KeyVaultError::Configuration(format!(
            "{} must be an absolute http(s) URL, got '{}'",
            VAULT_URL_KEY, endpoint
        )));
    }

    Ok(parsed)
}

fn normalize_key(key: &str) -> String {
    key.to_ascii_lowercase()
}

/// Flatten a settings document into `Section:Key` pairs.
fn flatten(value: &serde_json::Value, prefix: Option<&str>, out: &mut BTreeMap<String, Spellings>) {
    let join = |segment: &str| match prefix {
        Some(prefix) => format!("{}:{}", prefix, segment),
        None => segment.to_string(),
    };

    match value {
        serde_json::Value::Object(map) => {
            for (key, child) in map {
                flatten(child, Some(join(key.as_str()).as_str()), out);
            }
        }
        serde_json::Value::Array(items) => {
            for (index, child) in items.iter().enumerate() {
                flatten(child, Some(join(index.to_string().as_str()).as_str()), out);
            }
        }
        serde_json::Value::Null => {}
        serde_json::Value::String(s) => {
            if let Some(key) = prefix {
                insert_spelling(out, key, s.clone());
            }
        }
        other => {
            if let Some(key) = prefix {
                insert_spelling(out, key, other.to_string());
            }
        }
    }
}

fn insert_spelling(out: &mut BTreeMap<String, Spellings>, key: &str, value: String) {
    out.entry(normalize_key(key))
        .or_default()
        .insert(key.to_string(), value);
}
