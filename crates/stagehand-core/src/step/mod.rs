//! # Stagehand Idempotent Resource Step
//!
//! Create-if-absent applied to one external resource. Every step owns a
//! single [`Resource`] whose existence check and create action are run under
//! the stage's [`Poller`]:
//!
//! 1. Check existence; if present, return [`StepOutcome::AlreadyPresent`]
//!    without side effects.
//! 2. Otherwise create. A `Conflict` from the create call means another
//!    actor won the race and is reported as `AlreadyPresent`.
//! 3. Re-check existence through the poller, since some systems are
//!    eventually consistent, and return [`StepOutcome::Created`].
//!
//! A transiently failed create is retried from the existence check so that
//! a create that landed despite the error is not attempted twice.
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::adapter::error::AdapterResult;
use crate::poller::{PollError, Poller};

/// Identifies the external resource a step targets
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExternalResourceRef {
    /// e.g. "cluster", "repository", "deploy-key"
    pub kind: String,
    pub id: String,
}

impl ExternalResourceRef {
    pub fn new(kind: &str, id: impl Into<String>) -> Self {
        Self {
            kind: kind.to_string(),
            id: id.into(),
        }
    }
}

impl fmt::Display for ExternalResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} '{}'", self.kind, self.id)
    }
}

/// An external resource that can be checked for and created
#[async_trait]
pub trait Resource: Send + Sync {
    fn reference(&self) -> ExternalResourceRef;

    async fn exists(&self) -> AdapterResult<bool>;

    /// Create the resource; may report `Conflict` if it already exists
    async fn create(&self) -> AdapterResult<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepOutcome {
    AlreadyPresent,
    Created,
}

/// Create-if-absent step over a single resource
#[derive(Debug)]
pub struct IdempotentStep<R> {
    resource: R,
}

impl<R: Resource> IdempotentStep<R> {
    pub fn new(resource: R) -> Self {
        Self { resource }
    }

    pub fn resource(&self) -> &R {
        &self.resource
    }

    pub async fn ensure(&self, poller: &Poller) -> Result<StepOutcome, PollError> {
        let reference = self.resource.reference();
        let what = format!("ensure {}", reference);
        // Set once a create call succeeded so later attempts never create twice
        let created = AtomicBool::new(false);

        let resource = &self.resource;
        let reference = &reference;
        let created = &created;
        let outcome = poller
            .poll(&what, move || async move {
                if resource.exists().await? {
                    return Ok(Some(if created.load(Ordering::SeqCst) {
                        StepOutcome::Created
                    } else {
                        StepOutcome::AlreadyPresent
                    }));
                }
                if created.load(Ordering::SeqCst) || poller.is_cancelled() {
                    return Ok(None);
                }
                match resource.create().await {
                    Ok(()) => {
                        log::info!("Created {}", reference);
                        created.store(true, Ordering::SeqCst);
                        let visible = resource.exists().await?;
                        Ok(visible.then_some(StepOutcome::Created))
                    }
                    Err(err) if err.is_conflict() => {
                        log::info!("{} already exists: {}", reference, err);
                        Ok(Some(StepOutcome::AlreadyPresent))
                    }
                    Err(err) => Err(err),
                }
            })
            .await?;

        if outcome == StepOutcome::AlreadyPresent {
            log::debug!("{} already present", reference);
        }
        Ok(outcome)
    }
}
