//! Program flow: banner, mode branch, fetch loop, summary.

use crate::config::{Mode, RunConfig};
use crate::credential::DefaultCredential;
use crate::error::KeyVaultError;
use crate::fetcher::{fetch_local, fetch_remote, DisplayOptions, FetchReport};
use crate::vault::{build_http_client, KeyVaultStore, LocalSecretStore, SecretStore};
use std::future::Future;
use std::io::Write;
use std::time::Duration;
use tracing::info;
use url::Url;

/// Run one pass over the configured secrets.
///
/// `connect` builds the remote store and is only invoked in remote mode.
/// Configuration and authentication failures are returned without printing;
/// use [`report_failure`] to render them.
pub async fn run<W, C, Fut>(
    config: &RunConfig,
    options: DisplayOptions,
    connect: C,
    out: &mut W,
) -> Result<FetchReport, KeyVaultError>
where
    W: Write,
    C: FnOnce(Url, Duration) -> Fut,
    Fut: Future<Output = Result<Box<dyn SecretStore>, KeyVaultError>>,
{
    let report = match &config.mode {
        Mode::Local { username, password } => {
            info!("using local secrets");
            writeln!(out, "=== Local Secrets Demo ===")?;
            writeln!(out, "Using local secrets (USE_LOCAL=true)")?;
            writeln!(out)?;

            let [username_name, password_name] = &config.secret_names;
            let store = LocalSecretStore::from_pairs([
                (username_name.clone(), username.clone()),
                (password_name.clone(), password.clone()),
            ]);

            fetch_local(&store, &config.secret_names, options, out).await?
        }
        Mode::Remote { endpoint } => {
            info!(vault = endpoint.as_str(), "using azure key vault");
            writeln!(out, "=== Azure Key Vault Demo ===")?;
            writeln!(out, "Key Vault URL: {}", endpoint.as_str().trim_end_matches('/'))?;
            writeln!(out)?;

            let store = connect(endpoint.clone(), config.http_timeout).await?;

            writeln!(out, "Retrieving secrets from Azure Key Vault...")?;
            writeln!(out)?;

            fetch_remote(store.as_ref(), &config.secret_names, options, out).await?
        }
    };

    writeln!(out, "=== Demo Complete ===")?;
    if !options.show_values {
        writeln!(out)?;
        writeln!(out, "Note: To see the actual secret values, run with --show.")?;
    }

    Ok(report)
}

/// Connect to the vault with the default credential chain.
pub async fn connect_default(
    endpoint: Url,
    timeout: Duration,
) -> Result<Box<dyn SecretStore>, KeyVaultError> {
    let client = build_http_client(timeout)?;
    let credential = DefaultCredential::from_env(client.clone());
    let store = KeyVaultStore::connect(client, endpoint, &credential).await?;
    Ok(Box::new(store))
}

/// Print a run-ending error in the user-facing format.
pub fn report_failure<W: Write>(err: &KeyVaultError, out: &mut W) -> std::io::Result<()> {
    match err {
        KeyVaultError::Configuration(message) => {
            writeln!(out, "Error: {}", message)?;
        }
        KeyVaultError::Authentication(message) => {
            writeln!(out, "Authentication failed!")?;
            writeln!(out, "Error: {}", message)?;
            writeln!(out)?;
            writeln!(out, "Authentication options:")?;
            writeln!(out, "1. Azure CLI: Run 'az login' in your terminal")?;
            writeln!(
                out,
                "2. Environment Variables: Set AZURE_CLIENT_ID, AZURE_TENANT_ID, AZURE_CLIENT_SECRET"
            )?;
            writeln!(
                out,
                "3. Managed Identity: When running in Azure (App Service, Function, etc.)"
            )?;
        }
        other => {
            writeln!(out, "An error occurred: {}", other)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vault::Secret;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Counting {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl SecretStore for Counting {
        async fn get_secret(&self, name: &str) -> Result<Secret, KeyVaultError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(KeyVaultError::SecretNotFound {
                name: name.to_string(),
            })
        }
    }

    fn run_config(mode: Mode) -> RunConfig {
        RunConfig {
            mode,
            secret_names: ["rosina-username-dev".to_string(), "rosina-password-dev".to_string()],
            http_timeout: Duration::from_secs(1),
        }
    }

    #[tokio::test]
    async fn test_local_mode_never_connects() {
        let connects = Arc::new(AtomicUsize::new(0));
        let config = run_config(Mode::Local {
            username: "alice-admin".to_string(),
            password: "hunter2hunter2".to_string(),
        });

        let counter = connects.clone();
        let mut out = Vec::new();
        let report = run(
            &config,
            DisplayOptions::default(),
            |_, _| async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<Box<dyn SecretStore>, _>(KeyVaultError::Client("unreachable".to_string()))
            },
            &mut out,
        )
        .await
        .unwrap();

        assert_eq!(connects.load(Ordering::SeqCst), 0);
        assert_eq!(report.retrieved.len(), 2);

        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("al****in"));
        assert!(text.contains("hu****r2"));
        assert!(text.contains("=== Demo Complete ==="));
    }

    #[tokio::test]
    async fn test_authentication_failure_skips_loop() {
        let config = run_config(Mode::Remote {
            endpoint: Url::parse("https://demo.vault.azure.net").unwrap(),
        });

        let mut out = Vec::new();
        let err = run(
            &config,
            DisplayOptions::default(),
            |_, _| async {
                Err::<Box<dyn SecretStore>, _>(KeyVaultError::Authentication(
                    "no credential".to_string(),
                ))
            },
            &mut out,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, KeyVaultError::Authentication(_)));
        let text = String::from_utf8(out).unwrap();
        assert!(!text.contains("Fetching secret"));
        assert!(!text.contains("Demo Complete"));
    }

    #[tokio::test]
    async fn test_remote_mode_looks_up_each_name_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let config = run_config(Mode::Remote {
            endpoint: Url::parse("https://demo.vault.azure.net").unwrap(),
        });

        let store_calls = calls.clone();
        let mut out = Vec::new();
        let report = run(
            &config,
            DisplayOptions::default(),
            |endpoint, _| async move {
                assert_eq!(endpoint.as_str(), "https://demo.vault.azure.net/");
                Ok::<_, KeyVaultError>(Box::new(Counting { calls: store_calls }) as Box<dyn SecretStore>)
            },
            &mut out,
        )
        .await
        .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(report.attempted(), 2);
        assert_eq!(report.not_found.len(), 2);
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("Key Vault URL: https://demo.vault.azure.net"));
        assert!(text.ends_with("Note: To see the actual secret values, run with --show.\n"));
    }

    #[test]
    fn test_report_authentication_failure_lists_options() {
        let mut out = Vec::new();
        report_failure(
            &KeyVaultError::Authentication("all credentials failed".to_string()),
            &mut out,
        )
        .unwrap();
        let text = String::from_utf8(out).unwrap();

        assert!(text.starts_with("Authentication failed!\nError: all credentials failed"));
        assert!(text.contains("az login"));
        assert!(text.contains("AZURE_CLIENT_SECRET"));
    }

    #[test]
    fn test_report_other_failure() {
        let mut out = Vec::new();
        report_failure(&KeyVaultError::Client("tls backend".to_string()), &mut out).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "An error occurred: failed to build http client: tls backend\n"
        );
    }
}
