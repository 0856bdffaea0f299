//! Common testing utilities for KeyVault Demo integration tests.

use std::fs;
use std::io::Write;
use std::path::PathBuf;
use tempfile::TempDir;

/// Test context that manages a temporary working directory.
#[allow(dead_code)]
pub struct TestContext {
    /// Path to temporary directory
    pub temp_path: PathBuf,
    /// The temporary directory (kept to prevent early deletion)
    _temp_dir: TempDir,
}

impl TestContext {
    /// Create a new test context with a temporary directory.
    #[allow(dead_code)]
    pub fn new() -> anyhow::Result<Self> {
        let temp_dir = TempDir::new()?;
        let temp_path = temp_dir.path().to_path_buf();

        Ok(Self {
            temp_path,
            _temp_dir: temp_dir,
        })
    }

    /// Create a test file with content.
    #[allow(dead_code)]
    pub fn create_file(&self, name: &str, content: &str) -> anyhow::Result<PathBuf> {
        let file_path = self.temp_path.join(name);
        let mut file = fs::File::create(&file_path)?;
        file.write_all(content.as_bytes())?;
        Ok(file_path)
    }

    /// Create an `appsettings.json` pointing at a vault URL.
    #[allow(dead_code)]
    pub fn create_appsettings(&self, vault_url: &str) -> anyhow::Result<PathBuf> {
        let content = serde_json::to_string_pretty(&serde_json::json!({
            "KeyVault": { "VaultUrl": vault_url }
        }))?;
        self.create_file("appsettings.json", &content)
    }

    /// Binary command running inside the temp directory with a clean environment.
    #[allow(dead_code)]
    pub fn command(&self) -> assert_cmd::Command {
        let mut cmd = assert_cmd::cargo_bin_cmd!("keyvault-demo");
        cmd.env_clear()
            .env("RUST_LOG", "off")
            .current_dir(&self.temp_path);
        cmd
    }
}

/// Key Vault REST payloads for mock servers.
#[allow(dead_code)]
pub struct MockVault;

#[allow(dead_code)]
impl MockVault {
    /// A `SecretBundle` body as returned by `GET /secrets/{name}`.
    pub fn secret_bundle(vault_url: &str, name: &str, value: &str) -> serde_json::Value {
        serde_json::json!({
            "value": value,
            "id": format!("{}/secrets/{}/0123456789abcdef", vault_url, name),
            "attributes": {
                "enabled": true,
                "created": 1700000000,
                "updated": 1700003600,
                "recoveryLevel": "Recoverable+Purgeable"
            }
        })
    }

    /// The error envelope Key Vault sends for a missing secret.
    pub fn not_found(name: &str) -> serde_json::Value {
        serde_json::json!({
            "error": {
                "code": "SecretNotFound",
                "message": format!("A secret with (name/id) {} was not found in this key vault.", name)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_test_context_create_file() {
        let ctx = TestContext::new().unwrap();
        let file_path = ctx.create_file("test.txt", "Hello, World!").unwrap();

        assert!(file_path.exists());
        assert_eq!(fs::read_to_string(&file_path).unwrap(), "Hello, World!");
    }

    #[test]
    fn test_mock_vault_secret_bundle() {
        let bundle = MockVault::secret_bundle("https://demo", "api-key", "value");

        assert_eq!(bundle["value"], "value");
        assert_eq!(bundle["attributes"]["enabled"], true);
    }
}
