//! Key Vault provisioning function, library crate.
//!
//! The binary in `main.rs` runs this as an Azure Functions custom handler;
//! integration tests in `tests/` drive the router and ARM client directly.

use std::sync::Arc;

pub mod api;
pub mod azure;
pub mod cli;
pub mod config;
pub mod errors;
pub mod models;

use azure::arm::ArmVaultClient;
use azure::credential::DefaultCredential;
use azure::VaultManager;

/// Shared application state passed to handlers. Immutable after startup.
pub struct AppState {
    pub config: config::Config,
    pub vaults: Arc<dyn VaultManager>,
}

impl AppState {
    /// State backed by ARM and the ambient credential chain.
    pub fn from_config(config: config::Config) -> anyhow::Result<Self> {
        let credential = Arc::new(DefaultCredential::new()?);
        let vaults = Arc::new(ArmVaultClient::new(&config, credential)?);
        Ok(Self { config, vaults })
    }
}
