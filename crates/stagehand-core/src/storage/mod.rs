//! # Stagehand Storage
//!
//! The scoped secret store consumed by the credential provisioner and the
//! seeder ledger, the process-level run lock, and configuration loading.
pub mod config;
pub mod error;
pub mod local;
pub mod lock;
pub mod memory;
pub mod provider;

/// Re-export key types
pub use config::{load_config, ConfigFormat, OrchestratorConfig, StageConfig, StageSpec};
pub use error::StorageSystemError;
pub use local::LocalSecretStore;
pub use lock::RunLock;
pub use memory::MemorySecretStore;
pub use provider::{key_segment, SecretStore, StoreResult};
