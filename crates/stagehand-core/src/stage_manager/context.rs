use std::sync::Arc;

use crate::poller::Poller;
use crate::storage::SecretStore;

/// Context provided to a stage during one scheduler run
#[derive(Debug, Clone)]
pub struct StageContext {
    stage_id: String,
    /// Bound to the stage's retry policy and the run's cancellation signal
    poller: Poller,
    secrets: Arc<dyn SecretStore>,
}

impl StageContext {
    pub fn new(stage_id: &str, poller: Poller, secrets: Arc<dyn SecretStore>) -> Self {
        Self {
            stage_id: stage_id.to_string(),
            poller,
            secrets,
        }
    }

    pub fn stage_id(&self) -> &str {
        &self.stage_id
    }

    pub fn poller(&self) -> &Poller {
        &self.poller
    }

    pub fn secrets(&self) -> &Arc<dyn SecretStore> {
        &self.secrets
    }

    /// Check if the run was cancelled
    pub fn is_cancelled(&self) -> bool {
        self.poller.is_cancelled()
    }
}
