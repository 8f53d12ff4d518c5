//! # Stagehand Orchestrator
//!
//! Wires a loaded configuration to its adapters, secret store and stage
//! graph, then plans or runs it.
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::kernel::constants;
use crate::kernel::error::{Error, LifecyclePhase, Result};
use crate::poller::CancelSignal;
use crate::stage_manager::bootstrap_stages::{build_graph, Adapters};
use crate::stage_manager::{Report, Scheduler, StageGraph};
use crate::storage::{LocalSecretStore, OrchestratorConfig, SecretStore};

/// One stage of a [`Plan`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedStage {
    pub id: String,
    pub kind: String,
    pub depends_on: Vec<String>,
    pub description: String,
}

/// Stages grouped into waves: a stage's dependencies are all in earlier waves
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Plan {
    pub concurrency: usize,
    pub waves: Vec<Vec<PlannedStage>>,
}

impl Plan {
    pub fn stage_count(&self) -> usize {
        self.waves.iter().map(Vec::len).sum()
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} stage(s) in {} wave(s), {} worker(s)",
            self.stage_count(),
            self.waves.len(),
            self.concurrency
        )?;
        for (i, wave) in self.waves.iter().enumerate() {
            writeln!(f, "wave {}:", i + 1)?;
            for stage in wave {
                write!(f, "  {} [{}]", stage.id, stage.kind)?;
                if !stage.depends_on.is_empty() {
                    write!(f, " after {}", stage.depends_on.join(", "))?;
                }
                writeln!(f)?;
                writeln!(f, "    {}", stage.description)?;
            }
        }
        Ok(())
    }
}

/// A configured bootstrap run
pub struct Orchestrator {
    graph: StageGraph,
    kinds: HashMap<String, &'static str>,
    scheduler: Scheduler,
    secrets: Arc<dyn SecretStore>,
}

impl fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("graph", &self.graph)
            .field("scheduler", &self.scheduler)
            .field("secrets", &self.secrets)
            .finish()
    }
}

impl Orchestrator {
    /// Real adapters and a secret store under the configured state directory
    pub fn from_config(config: &OrchestratorConfig) -> Result<Self> {
        config.validate()?;
        let adapters = Adapters::from_config(config)?;
        let secrets_dir = config.state_dir.join(constants::SECRETS_DIR);
        log::debug!("Using secret store at {}", secrets_dir.display());
        Self::with_parts(config, &adapters, Arc::new(LocalSecretStore::new(secrets_dir)))
    }

    /// Orchestrator over caller-provided adapters and secret store
    pub fn with_parts(
        config: &OrchestratorConfig,
        adapters: &Adapters,
        secrets: Arc<dyn SecretStore>,
    ) -> Result<Self> {
        log::info!("Initializing {} v{}", constants::APP_NAME, constants::APP_VERSION);
        config.validate()?;
        let graph = build_graph(config, adapters)?;
        let scheduler = match config.concurrency {
            Some(n) => Scheduler::with_concurrency(n)?,
            None => Scheduler::new(),
        };
        let kinds = config
            .stages
            .iter()
            .map(|stage| (stage.id.clone(), stage.spec.kind()))
            .collect();
        Ok(Self {
            graph,
            kinds,
            scheduler,
            secrets,
        })
    }

    /// Override the worker-pool size
    pub fn with_concurrency(mut self, concurrency: usize) -> Result<Self> {
        self.scheduler = Scheduler::with_concurrency(concurrency)?;
        Ok(self)
    }

    pub fn graph(&self) -> &StageGraph {
        &self.graph
    }

    pub fn secrets(&self) -> &Arc<dyn SecretStore> {
        &self.secrets
    }

    /// What a run would do, without touching any external system
    pub fn plan(&self) -> Result<Plan> {
        let waves = self.graph.waves()?;
        let waves = waves
            .into_iter()
            .map(|wave| {
                wave.into_iter()
                    .map(|id| self.planned(&id))
                    .collect::<Result<Vec<_>>>()
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Plan {
            concurrency: self.scheduler.concurrency_for(&self.graph),
            waves,
        })
    }

    fn planned(&self, id: &str) -> Result<PlannedStage> {
        let node = self
            .graph
            .node(id)
            .ok_or_else(|| Error::lifecycle(LifecyclePhase::Plan, format!("stage '{}' missing from graph", id)))?;
        Ok(PlannedStage {
            id: id.to_string(),
            kind: self.kinds.get(id).copied().unwrap_or("custom").to_string(),
            depends_on: node.depends_on.clone(),
            description: node.stage.dry_run_description(),
        })
    }

    /// Run every stage to convergence or failure
    pub async fn run(&self, cancel: CancelSignal) -> Result<Report> {
        let report = self.scheduler.run(&self.graph, self.secrets.clone(), cancel).await?;
        Ok(report)
    }
}
