use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use crate::adapter::error::AdapterResult;
use crate::adapter::{ClusterAdmin, KnownHostsCapture};
use crate::kernel::constants::KNOWN_HOSTS_PREFIX;
use crate::kernel::error::{Error, Result};
use crate::stage_manager::{Stage, StageContext, StageOutcome};
use crate::storage::config::KnownHostsSpec;
use crate::storage::{key_segment, SecretStore, StoreResult};

/// Secret store key of a `host:port` capture
pub fn known_hosts_key(label: &str) -> String {
    format!("{}/{}", KNOWN_HOSTS_PREFIX, key_segment(label))
}

/// Stored known_hosts text for `label`
pub fn load_known_hosts(store: &dyn SecretStore, label: &str) -> StoreResult<Option<String>> {
    Ok(store
        .get_string(&known_hosts_key(label))?
        .filter(|text| !text.trim().is_empty()))
}

/// Like [`load_known_hosts`], failing when the capture is missing
pub(crate) fn require_known_hosts(store: &dyn SecretStore, label: &str, stage_id: &str) -> Result<String> {
    load_known_hosts(store, label)?.ok_or_else(|| {
        Error::from(format!(
            "stage '{}' needs the known_hosts capture of '{}'; depend on the known-hosts stage scanning it",
            stage_id, label
        ))
    })
}

/// Captures SSH host keys and persists them for pushes and cluster consumers
#[derive(Debug)]
pub struct KnownHostsStage {
    id: String,
    spec: KnownHostsSpec,
    capture: Arc<dyn KnownHostsCapture>,
    cluster: Arc<dyn ClusterAdmin>,
}

impl KnownHostsStage {
    pub fn new(
        id: &str,
        spec: KnownHostsSpec,
        capture: Arc<dyn KnownHostsCapture>,
        cluster: Arc<dyn ClusterAdmin>,
    ) -> Self {
        Self {
            id: id.to_string(),
            spec,
            capture,
            cluster,
        }
    }

    fn config_map_manifest(&self, known_hosts: &str) -> Option<Vec<u8>> {
        let target = self.spec.config_map.as_ref()?;
        let manifest = json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {
                "name": target.name,
                "namespace": target.namespace,
            },
            "data": {
                "known_hosts": known_hosts,
            },
        });
        Some(manifest.to_string().into_bytes())
    }
}

#[async_trait]
impl Stage for KnownHostsStage {
    fn id(&self) -> &str {
        &self.id
    }

    fn description(&self) -> &str {
        "Captures SSH host keys of the git host."
    }

    async fn execute(&self, context: &StageContext) -> Result<StageOutcome> {
        let label = self.spec.label();
        let capture = self.capture.as_ref();
        let (host, port) = (self.spec.host.as_str(), self.spec.port);
        let mut lines = context
            .poller()
            .retry(&format!("keyscan {}", label), move || capture.capture(host, port))
            .await?;
        // Scan output order varies between runs
        lines.sort();
        lines.dedup();
        let known_hosts = format!("{}\n", lines.join("\n"));

        let key = known_hosts_key(&label);
        let outcome = if context.secrets().get_string(&key)?.as_deref() == Some(known_hosts.as_str()) {
            StageOutcome::AlreadyPresent
        } else {
            context.secrets().put(&key, known_hosts.as_bytes())?;
            log::info!("Captured {} host key(s) for {}", lines.len(), label);
            StageOutcome::Created
        };

        if let Some(manifest) = self.config_map_manifest(&known_hosts) {
            let cluster = self.cluster.as_ref();
            let manifest = manifest.as_slice();
            context
                .poller()
                .retry(&format!("apply known_hosts ConfigMap for {}", label), move || {
                    cluster.apply(manifest)
                })
                .await?;
        }
        Ok(outcome)
    }

    async fn is_converged(&self, context: &StageContext) -> AdapterResult<bool> {
        load_known_hosts(context.secrets().as_ref(), &self.spec.label())
            .map(|captured| captured.is_some())
            .map_err(|e| e.into_adapter_error())
    }

    fn dry_run_description(&self) -> String {
        let origin = match &self.spec.from_pod {
            Some(pod) => format!(" from a pod matching '{}' in {}", pod.selector, pod.namespace),
            None => String::new(),
        };
        format!("Scan SSH host keys of {}{}", self.spec.label(), origin)
    }
}
