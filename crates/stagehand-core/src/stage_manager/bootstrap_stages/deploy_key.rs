use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::adapter::error::{AdapterError, AdapterResult};
use crate::adapter::{ClusterAdmin, GitHost};
use crate::credentials::{is_registered, CredentialProvisioner, KeyMaterial};
use crate::kernel::error::Result;
use crate::stage_manager::bootstrap_stages::known_hosts::require_known_hosts;
use crate::stage_manager::{Stage, StageContext, StageOutcome};
use crate::storage::config::{ClusterSecretSpec, DeployKeySpec};

/// Ensures a key pair, registers it as a deploy key and hands the private
/// half to its consumers (a cluster Secret and/or a repository secret).
#[derive(Debug)]
pub struct DeployKeyStage {
    id: String,
    spec: DeployKeySpec,
    host: Arc<dyn GitHost>,
    cluster: Arc<dyn ClusterAdmin>,
}

impl DeployKeyStage {
    pub fn new(id: &str, spec: DeployKeySpec, host: Arc<dyn GitHost>, cluster: Arc<dyn ClusterAdmin>) -> Self {
        Self {
            id: id.to_string(),
            spec,
            host,
            cluster,
        }
    }

    fn secret_manifest(&self, target: &ClusterSecretSpec, key: &KeyMaterial, known_hosts: Option<&str>) -> Vec<u8> {
        let mut data = Map::new();
        data.insert("identity".to_string(), Value::from(key.private_key_openssh().as_str()));
        data.insert("identity.pub".to_string(), Value::from(key.public_key()));
        data.insert(
            "url".to_string(),
            Value::from(self.host.remote_url(&self.spec.repository)),
        );
        if let Some(known_hosts) = known_hosts {
            data.insert("known_hosts".to_string(), Value::from(known_hosts));
        }
        let manifest = json!({
            "apiVersion": "v1",
            "kind": "Secret",
            "type": "Opaque",
            "metadata": {
                "name": target.name,
                "namespace": target.namespace,
                "labels": target.labels,
            },
            "stringData": data,
        });
        manifest.to_string().into_bytes()
    }
}

#[async_trait]
impl Stage for DeployKeyStage {
    fn id(&self) -> &str {
        &self.id
    }

    fn description(&self) -> &str {
        "Registers a deploy key and distributes its private half."
    }

    async fn execute(&self, context: &StageContext) -> Result<StageOutcome> {
        let provisioner = CredentialProvisioner::new(context.secrets().clone());
        let key = provisioner.ensure_key_pair(&self.spec.key_name)?;
        let outcome = provisioner
            .ensure_registered(
                context.poller(),
                &key,
                self.host.as_ref(),
                &self.spec.repository,
                self.spec.title(),
                self.spec.read_only,
            )
            .await?;

        if let Some(target) = &self.spec.cluster_secret {
            let known_hosts = match &target.known_hosts {
                Some(label) => Some(require_known_hosts(context.secrets().as_ref(), label, &self.id)?),
                None => None,
            };
            let manifest = self.secret_manifest(target, &key, known_hosts.as_deref());
            let cluster = self.cluster.as_ref();
            let manifest = manifest.as_slice();
            context
                .poller()
                .retry(
                    &format!("apply secret {}/{}", target.namespace, target.name),
                    move || cluster.apply(manifest),
                )
                .await?;
        }

        if let Some(secret_name) = &self.spec.repository_secret {
            let private_key = key.private_key_openssh();
            let host = self.host.as_ref();
            let (repository, name, value) = (&self.spec.repository, secret_name.as_str(), private_key.as_str());
            context
                .poller()
                .retry(&format!("set secret {} on {}", secret_name, repository), move || {
                    host.set_secret(repository, name, value)
                })
                .await?;
        }

        Ok(outcome.into())
    }

    async fn is_converged(&self, context: &StageContext) -> AdapterResult<bool> {
        let stored = CredentialProvisioner::new(context.secrets().clone())
            .load_key_pair(&self.spec.key_name)
            .map_err(|e| AdapterError::fatal("secret-store", e.to_string()))?;
        let Some(key) = stored else {
            return Ok(false);
        };
        is_registered(self.host.as_ref(), &self.spec.repository, &key).await
    }

    fn dry_run_description(&self) -> String {
        let mut description = format!(
            "Ensure key pair '{}' and register it on {} as '{}' ({})",
            self.spec.key_name,
            self.spec.repository,
            self.spec.title(),
            if self.spec.read_only { "read-only" } else { "read-write" }
        );
        if let Some(target) = &self.spec.cluster_secret {
            description.push_str(&format!("; apply Secret {}/{}", target.namespace, target.name));
        }
        if let Some(name) = &self.spec.repository_secret {
            description.push_str(&format!("; set repository secret {}", name));
        }
        description
    }
}
