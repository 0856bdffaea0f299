//! Per-secret retrieval loop and console rendering.
//!
//! Each name is looked up once, in order. A failed lookup is reported and the
//! loop moves on; it never aborts the remaining lookups.

use crate::error::KeyVaultError;
use crate::mask::mask_secret;
use crate::vault::{Secret, SecretStore};
use chrono::{DateTime, Utc};
use std::io::Write;
use tracing::warn;

/// How secret values are rendered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DisplayOptions {
    /// Print raw values instead of masked ones.
    pub show_values: bool,
}

impl DisplayOptions {
    fn render(&self, value: &str) -> String {
        if self.show_values {
            value.to_string()
        } else {
            mask_secret(value)
        }
    }
}

/// Outcome of one pass over the secret names.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct FetchReport {
    pub retrieved: Vec<String>,
    pub not_found: Vec<String>,
    /// `(name, message)` for lookups that failed for any other reason.
    pub failed: Vec<(String, String)>,
}

impl FetchReport {
    pub fn attempted(&self) -> usize {
        self.retrieved.len() + self.not_found.len() + self.failed.len()
    }
}

/// Fetch every name from a remote store, printing full details per secret.
pub async fn fetch_remote<W: Write>(
    store: &dyn SecretStore,
    names: &[String],
    options: DisplayOptions,
    out: &mut W,
) -> Result<FetchReport, KeyVaultError> {
    let mut report = FetchReport::default();

    for name in names {
        writeln!(out, "Fetching secret: {}", name)?;

        match store.get_secret(name).await {
            Ok(secret) => {
                print_secret_details(&secret, options, out)?;
                report.retrieved.push(name.clone());
            }
            Err(KeyVaultError::SecretNotFound { .. }) => {
                writeln!(out, "  ✗ Secret '{}' not found in Key Vault", name)?;
                report.not_found.push(name.clone());
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!(secret = name.as_str(), error = %e, "secret lookup failed");
                writeln!(out, "  ✗ Error retrieving secret '{}': {}", name, e)?;
                report.failed.push((name.clone(), e.to_string()));
            }
        }
        writeln!(out)?;
    }

    Ok(report)
}

/// Fetch every name from a local store, printing name and value only.
pub async fn fetch_local<W: Write>(
    store: &dyn SecretStore,
    names: &[String],
    options: DisplayOptions,
    out: &mut W,
) -> Result<FetchReport, KeyVaultError> {
    let mut report = FetchReport::default();

    for name in names {
        match store.get_secret(name).await {
            Ok(secret) => {
                writeln!(out, "  ✓ Secret Name: {}", secret.name)?;
                writeln!(out, "  ✓ Secret Value: {}", options.render(&secret.value))?;
                report.retrieved.push(name.clone());
            }
            Err(KeyVaultError::SecretNotFound { .. }) => {
                writeln!(out, "  ✗ Secret '{}' not found in local configuration", name)?;
                report.not_found.push(name.clone());
            }
            Err(e) => return Err(e),
        }
        writeln!(out)?;
    }

    Ok(report)
}

fn print_secret_details<W: Write>(
    secret: &Secret,
    options: DisplayOptions,
    out: &mut W,
) -> std::io::Result<()> {
    let properties = secret.properties.clone().unwrap_or_default();

    writeln!(out, "  ✓ Secret Name: {}", secret.name)?;
    writeln!(out, "  ✓ Secret Value: {}", options.render(&secret.value))?;
    writeln!(
        out,
        "  ✓ Enabled: {}",
        properties
            .enabled
            .map(|enabled| enabled.to_string())
            .unwrap_or_else(|| "unknown".to_string())
    )?;
    writeln!(out, "  ✓ Created: {}", format_timestamp(properties.created))?;
    writeln!(out, "  ✓ Updated: {}", format_timestamp(properties.updated))?;
    Ok(())
}

fn format_timestamp(timestamp: Option<DateTime<Utc>>) -> String {
    timestamp
        .map(|ts| ts.to_rfc3339())
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vault::{LocalSecretStore, SecretProperties};
    use async_trait::async_trait;
    use chrono::TimeZone;

    struct Scripted;

    #[async_trait]
    impl SecretStore for Scripted {
        async fn get_secret(&self, name: &str) -> Result<Secret, KeyVaultError> {
            match name {
                "present" => Ok(Secret {
                    name: name.to_string(),
                    value: "abcdefgh".to_string(),
                    properties: Some(SecretProperties {
                        enabled: Some(true),
                        created: Utc.timestamp_opt(0, 0).single(),
                        updated: None,
                    }),
                }),
                "missing" => Err(KeyVaultError::SecretNotFound {
                    name: name.to_string(),
                }),
                _ => Err(KeyVaultError::Request("connection reset".to_string())),
            }
        }
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_remote_reports_each_outcome() {
        let mut out = Vec::new();
        let report = fetch_remote(
            &Scripted,
            &names(&["present", "missing", "broken"]),
            DisplayOptions::default(),
            &mut out,
        )
        .await
        .unwrap();
        let text = String::from_utf8(out).unwrap();

        assert_eq!(report.retrieved, vec!["present"]);
        assert_eq!(report.not_found, vec!["missing"]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.attempted(), 3);

        assert!(text.contains("  ✓ Secret Value: ab****gh"));
        assert!(text.contains("  ✓ Enabled: true"));
        assert!(text.contains("  ✓ Created: 1970-01-01T00:00:00+00:00"));
        assert!(text.contains("  ✓ Updated: unknown"));
        assert!(text.contains("  ✗ Secret 'missing' not found in Key Vault"));
        assert!(text.contains("  ✗ Error retrieving secret 'broken': connection reset"));
    }

    #[tokio::test]
    async fn test_show_values_prints_raw() {
        let mut out = Vec::new();
        fetch_remote(
            &Scripted,
            &names(&["present"]),
            DisplayOptions { show_values: true },
            &mut out,
        )
        .await
        .unwrap();

        assert!(String::from_utf8(out).unwrap().contains("Secret Value: abcdefgh"));
    }

    #[tokio::test]
    async fn test_local_prints_masked_values() {
        let store = LocalSecretStore::from_pairs([("user", "alice"), ("pass", "pw")]);
        let mut out = Vec::new();

        let report = fetch_local(
            &store,
            &names(&["user", "pass"]),
            DisplayOptions::default(),
            &mut out,
        )
        .await
        .unwrap();
        let text = String::from_utf8(out).unwrap();

        assert_eq!(report.retrieved, vec!["user", "pass"]);
        assert!(text.contains("  ✓ Secret Name: user\n  ✓ Secret Value: al****ce"));
        assert!(text.contains("  ✓ Secret Name: pass\n  ✓ Secret Value: ****"));
        assert!(!text.contains("Enabled"));
    }
}
