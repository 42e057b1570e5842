// ABOUTME: Configuration loading for the statevault binary.
// ABOUTME: Reads STATEVAULT_HOME from the environment with a home-directory default.

use std::path::PathBuf;

/// Binary configuration loaded from environment variables.
///
/// Environment variables:
/// - STATEVAULT_HOME: vault data directory (default: ~/.statevault)
#[derive(Debug, Clone)]
pub struct VaultConfig {
    pub home: PathBuf,
}

impl VaultConfig {
    pub fn from_env() -> Self {
        let home = std::env::var("STATEVAULT_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                std::env::var("HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| PathBuf::from("/tmp"))
                    .join(".statevault")
            });
        Self { home }
    }

    /// Path of the SQLite database inside the vault home.
    pub fn db_path(&self) -> PathBuf {
        self.home.join("vault.db")
    }
}
