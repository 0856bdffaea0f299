// KeyVault Demo - fetch and mask named secrets
//
// This is the main entry point for the application.

use anyhow::Result;
use clap::Parser;
use keyvault_demo::app::{connect_default, report_failure, run};
use keyvault_demo::config::{Settings, DEFAULT_SETTINGS_FILE};
use keyvault_demo::fetcher::DisplayOptions;
use keyvault_demo::KeyVaultError;
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// Fetch two named secrets from Azure Key Vault (or local configuration) and print them masked
#[derive(Parser, Debug)]
#[command(name = "keyvault-demo")]
#[command(version)]
#[command(about = "Fetch named secrets from Azure Key Vault or local configuration", long_about = None)]
#[command(after_help = r#"CONFIGURATION:
    KeyVault:VaultUrl     Vault URL (settings file, or KeyVault__VaultUrl in the environment)
    KEYVAULT_NAME         Vault name, expands to https://<name>.vault.azure.net
    USE_LOCAL=true        Read TEST_USERNAME and TEST_PASSWORD instead of calling Key Vault

AUTHENTICATION (tried in order):
    AZURE_KEYVAULT_BEARER_TOKEN
    AZURE_TENANT_ID + AZURE_CLIENT_ID + AZURE_CLIENT_SECRET
    Managed identity
    Azure CLI (az login)"#)]
struct Cli {
    /// Path to the settings file
    #[arg(short, long, default_value = DEFAULT_SETTINGS_FILE)]
    config: PathBuf,

    /// Print secret values unmasked (only for testing)
    #[arg(long, default_value = "false")]
    show: bool,

    /// Enable debug logging on stderr
    #[arg(short, long, default_value = "false")]
    verbose: bool,
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

async fn run_demo<W: Write>(cli: &Cli, out: &mut W) -> Result<(), KeyVaultError> {
    let settings = Settings::load(&cli.config);
    let config = settings.resolve()?;

    let options = DisplayOptions {
        show_values: cli.show,
    };
    let report = run(&config, options, connect_default, out).await?;

    tracing::debug!(
        attempted = report.attempted(),
        retrieved = report.retrieved.len(),
        not_found = report.not_found.len(),
        failed = report.failed.len(),
        "run complete"
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    match run_demo(&cli, &mut out).await {
        Ok(()) => Ok(ExitCode::SUCCESS),
        Err(e) => {
            report_failure(&e, &mut out)?;
            out.flush()?;
            Ok(ExitCode::FAILURE)
        }
    }
}
