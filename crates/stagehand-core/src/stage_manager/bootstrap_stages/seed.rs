use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::adapter::error::AdapterResult;
use crate::adapter::GitHost;
use crate::credentials::CredentialProvisioner;
use crate::kernel::error::Result;
use crate::seeder::{ledger_key, RepositorySeeder};
use crate::stage_manager::bootstrap_stages::known_hosts::require_known_hosts;
use crate::stage_manager::{Stage, StageContext, StageOutcome};
use crate::storage::config::SeedSpec;

/// Publishes synthesized content to a repository, skipping unchanged trees.
///
/// The push key is registered as a writable deploy key first. The last
/// pushed fingerprint is kept in the secret store, so a cold re-run with
/// unchanged sources does not push.
#[derive(Debug)]
pub struct SeedStage {
    id: String,
    spec: SeedSpec,
    host: Arc<dyn GitHost>,
    vars: BTreeMap<String, String>,
    /// Fingerprint computed by the last `execute`
    computed: Mutex<Option<String>>,
}

impl SeedStage {
    pub fn new(id: &str, spec: SeedSpec, host: Arc<dyn GitHost>, vars: BTreeMap<String, String>) -> Self {
        Self {
            id: id.to_string(),
            spec,
            host,
            vars,
            computed: Mutex::new(None),
        }
    }

    fn seeder(&self) -> RepositorySeeder {
        let seeder = RepositorySeeder::new(self.host.clone())
            .with_branch(&self.spec.branch)
            .with_vars(self.vars.clone());
        match &self.spec.message {
            Some(message) => seeder.with_message(message),
            None => seeder,
        }
    }

    fn computed(&self) -> Option<String> {
        self.computed
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl Stage for SeedStage {
    fn id(&self) -> &str {
        &self.id
    }

    fn description(&self) -> &str {
        "Seeds a repository with synthesized content."
    }

    async fn execute(&self, context: &StageContext) -> Result<StageOutcome> {
        let provisioner = CredentialProvisioner::new(context.secrets().clone());
        let key = provisioner.ensure_key_pair(&self.spec.key_name)?;
        provisioner
            .ensure_registered(
                context.poller(),
                &key,
                self.host.as_ref(),
                &self.spec.repository,
                &self.spec.key_name,
                false,
            )
            .await?;

        let known_hosts = match &self.spec.known_hosts {
            Some(label) => Some(require_known_hosts(context.secrets().as_ref(), label, &self.id)?),
            None => None,
        };

        let ledger = ledger_key(&self.spec.repository);
        let last = context.secrets().get_string(&ledger)?.unwrap_or_default();
        let result = self
            .seeder()
            .seed(
                context.poller(),
                &self.spec.sources,
                &self.spec.repository,
                &last,
                &key,
                known_hosts.as_deref(),
            )
            .await?;

        if result.pushed {
            context.secrets().put(&ledger, result.fingerprint.as_bytes())?;
        }
        *self.computed.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(result.fingerprint.clone());

        Ok(StageOutcome::Seeded {
            fingerprint: result.fingerprint,
            pushed: result.pushed,
        })
    }

    async fn is_converged(&self, context: &StageContext) -> AdapterResult<bool> {
        let Some(computed) = self.computed() else {
            return Ok(false);
        };
        let recorded = context
            .secrets()
            .get_string(&ledger_key(&self.spec.repository))
            .map_err(|e| e.into_adapter_error())?;
        Ok(recorded.as_deref() == Some(computed.as_str()))
    }

    fn dry_run_description(&self) -> String {
        format!(
            "Synthesize {} source mapping(s) and force-push them to {} ({}) if the content changed",
            self.spec.sources.len(),
            self.spec.repository,
            self.spec.branch
        )
    }
}
