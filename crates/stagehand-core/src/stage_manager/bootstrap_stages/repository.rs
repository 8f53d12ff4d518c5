use std::sync::Arc;

use async_trait::async_trait;

use crate::adapter::error::AdapterResult;
use crate::adapter::{GitHost, RepositoryRef};
use crate::kernel::error::Result;
use crate::stage_manager::{Stage, StageContext, StageOutcome};
use crate::step::{ExternalResourceRef, IdempotentStep, Resource};

struct RepositoryResource<'a> {
    host: &'a dyn GitHost,
    repository: &'a RepositoryRef,
}

#[async_trait]
impl Resource for RepositoryResource<'_> {
    fn reference(&self) -> ExternalResourceRef {
        ExternalResourceRef::new("repository", self.repository.to_string())
    }

    async fn exists(&self) -> AdapterResult<bool> {
        self.host.repository_exists(self.repository).await
    }

    async fn create(&self) -> AdapterResult<()> {
        self.host.create_repository(self.repository).await
    }
}

/// Creates a repository on the git host unless it exists
#[derive(Debug)]
pub struct RepositoryStage {
    id: String,
    repository: RepositoryRef,
    host: Arc<dyn GitHost>,
}

impl RepositoryStage {
    pub fn new(id: &str, repository: RepositoryRef, host: Arc<dyn GitHost>) -> Self {
        Self {
            id: id.to_string(),
            repository,
            host,
        }
    }
}

#[async_trait]
impl Stage for RepositoryStage {
    fn id(&self) -> &str {
        &self.id
    }

    fn description(&self) -> &str {
        "Creates a repository on the git host."
    }

    async fn execute(&self, context: &StageContext) -> Result<StageOutcome> {
        let step = IdempotentStep::new(RepositoryResource {
            host: self.host.as_ref(),
            repository: &self.repository,
        });
        Ok(step.ensure(context.poller()).await?.into())
    }

    async fn is_converged(&self, _context: &StageContext) -> AdapterResult<bool> {
        self.host.repository_exists(&self.repository).await
    }

    fn dry_run_description(&self) -> String {
        format!("Create repository {} unless it exists", self.repository)
    }
}
