use async_trait::async_trait;

use crate::adapter::error::{AdapterError, AdapterResult};
use crate::adapter::process::Invocation;
use crate::adapter::{ClusterAdmin, WorkloadRef};

const SYSTEM: &str = "kubectl";

/// Cluster management API backed by the `kubectl` CLI
#[derive(Debug, Clone)]
pub struct KubectlAdmin {
    binary: String,
    context: Option<String>,
}

impl KubectlAdmin {
    pub fn new(binary: impl Into<String>, context: Option<String>) -> Self {
        Self {
            binary: binary.into(),
            context,
        }
    }

    fn invocation<'a>(&self) -> Invocation<'a> {
        let invocation = Invocation::new(SYSTEM, &self.binary);
        match &self.context {
            Some(context) => invocation.arg("--context").arg(context),
            None => invocation,
        }
    }

    async fn first_pod(&self, namespace: &str, pod_selector: &str) -> AdapterResult<String> {
        let output = self
            .invocation()
            .args(["get", "pods", "-n", namespace, "-l", pod_selector])
            .args(["--field-selector", "status.phase=Running"])
            .args(["-o", "jsonpath={.items[*].metadata.name}"])
            .checked("get pods")
            .await?;
        output
            .stdout_str()
            .split_whitespace()
            .next()
            .map(str::to_string)
            // Pods behind a fresh deployment appear some time after apply
            .ok_or_else(|| {
                AdapterError::transient(
                    SYSTEM,
                    format!("no running pod matches '{}' in namespace '{}'", pod_selector, namespace),
                )
            })
    }
}

impl Default for KubectlAdmin {
    fn default() -> Self {
        Self::new("kubectl", None)
    }
}

#[async_trait]
impl ClusterAdmin for KubectlAdmin {
    async fn apply(&self, manifest: &[u8]) -> AdapterResult<()> {
        self.invocation()
            .args(["apply", "-f", "-"])
            .stdin(manifest)
            .checked("apply")
            .await?;
        Ok(())
    }

    async fn rollout_status(&self, workload: &WorkloadRef) -> AdapterResult<bool> {
        let target = format!("{}/{}", workload.kind, workload.name);
        let output = self
            .invocation()
            .args([
                "rollout",
                "status",
                target.as_str(),
                "-n",
                workload.namespace.as_str(),
                "--watch=false",
            ])
            .checked("rollout status")
            .await?;
        let ready = rollout_complete(&output.stdout_str());
        log::debug!("kubectl: rollout of {} ready={}", workload, ready);
        Ok(ready)
    }

    async fn exec(&self, namespace: &str, pod_selector: &str, command: &[String]) -> AdapterResult<Vec<u8>> {
        let pod = self.first_pod(namespace, pod_selector).await?;
        let output = self
            .invocation()
            .args(["exec", "-n", namespace, pod.as_str(), "--"])
            .args(command)
            .checked("exec")
            .await?;
        Ok(output.stdout)
    }
}

/// `kubectl rollout status --watch=false` exits zero while still waiting and
/// only reports completion in its message.
pub(crate) fn rollout_complete(stdout: &str) -> bool {
    stdout.contains("successfully rolled out") || stdout.contains("roll out complete")
}
