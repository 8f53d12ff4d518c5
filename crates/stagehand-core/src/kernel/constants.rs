/// Application name
pub const APP_NAME: &str = "stagehand";

/// Application version
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default state directory (secret store, run lock), relative to the config file
pub const DEFAULT_STATE_DIR: &str = ".stagehand";

/// Secret store directory inside the state directory
pub const SECRETS_DIR: &str = "secrets";

/// Run lock file inside the state directory
pub const LOCK_FILE_NAME: &str = "stagehand.lock";

/// Default branch the seeder force-pushes to
pub const DEFAULT_BRANCH: &str = "main";

/// Commit message of the single seed commit
pub const SEED_COMMIT_MESSAGE: &str = "Seed repository";

/// Author identity of the seed commit
pub const SEED_COMMIT_AUTHOR: &str = "stagehand";
pub const SEED_COMMIT_EMAIL: &str = "stagehand@localhost";

/// Fixed commit timestamp so identical trees produce identical commits
pub const SEED_COMMIT_DATE: &str = "2000-01-01T00:00:00Z";

/// Secret store key prefixes
pub const KEYPAIR_PREFIX: &str = "keys";
pub const KNOWN_HOSTS_PREFIX: &str = "known-hosts";
pub const SEED_PREFIX: &str = "seed";

/// Default worker pool size when the graph has no roots to count
pub const MIN_CONCURRENCY: usize = 1;
