//! KeyVault Demo - fetch and mask named secrets.
//!
//! Secrets come either from local configuration (`USE_LOCAL=true`) or from
//! Azure Key Vault using a chained credential. Values are masked before they
//! are printed.

pub mod app;
pub mod config;
pub mod credential;
pub mod error;
pub mod fetcher;
pub mod mask;
pub mod vault;

pub use error::KeyVaultError;
