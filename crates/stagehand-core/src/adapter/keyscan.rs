use std::sync::Arc;

use async_trait::async_trait;

use crate::adapter::error::{AdapterError, AdapterResult};
use crate::adapter::process::Invocation;
use crate::adapter::{ClusterAdmin, KnownHostsCapture};

const SYSTEM: &str = "ssh-keyscan";

/// Host key scan executed inside the cluster network through `ClusterAdmin::exec`.
///
/// Needed when the SSH endpoint is only resolvable from inside the cluster
/// (service DNS names such as `gitea-ssh.gitea.svc`).
#[derive(Debug, Clone)]
pub struct ClusterKeyscan {
    cluster: Arc<dyn ClusterAdmin>,
    namespace: String,
    pod_selector: String,
}

impl ClusterKeyscan {
    pub fn new(cluster: Arc<dyn ClusterAdmin>, namespace: &str, pod_selector: &str) -> Self {
        Self {
            cluster,
            namespace: namespace.to_string(),
            pod_selector: pod_selector.to_string(),
        }
    }
}

#[async_trait]
impl KnownHostsCapture for ClusterKeyscan {
    async fn capture(&self, host: &str, port: u16) -> AdapterResult<Vec<String>> {
        let command = keyscan_command(host, port);
        let stdout = self
            .cluster
            .exec(&self.namespace, &self.pod_selector, &command)
            .await?;
        parse_scan(&String::from_utf8_lossy(&stdout), host, port)
    }
}

/// Host key scan executed on the orchestrator's host
#[derive(Debug, Clone)]
pub struct LocalKeyscan {
    binary: String,
}

impl LocalKeyscan {
    pub fn new(binary: impl Into<String>) -> Self {
        Self { binary: binary.into() }
    }
}

impl Default for LocalKeyscan {
    fn default() -> Self {
        Self::new("ssh-keyscan")
    }
}

#[async_trait]
impl KnownHostsCapture for LocalKeyscan {
    async fn capture(&self, host: &str, port: u16) -> AdapterResult<Vec<String>> {
        let command = keyscan_command(host, port);
        // ssh-keyscan exits zero even when nothing answered; the parse decides
        let output = Invocation::new(SYSTEM, &self.binary)
            .args(&command[1..])
            .output()
            .await?;
        parse_scan(&output.stdout_str(), host, port)
    }
}

fn keyscan_command(host: &str, port: u16) -> Vec<String> {
    vec![
        "ssh-keyscan".to_string(),
        "-T".to_string(),
        "5".to_string(),
        "-p".to_string(),
        port.to_string(),
        host.to_string(),
    ]
}

/// Keep key lines, drop `# host:port SSH-2.0-...` banners; an empty scan means
/// the service is not listening yet.
pub(crate) fn parse_scan(output: &str, host: &str, port: u16) -> AdapterResult<Vec<String>> {
    let lines: Vec<String> = output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect();
    if lines.is_empty() {
        return Err(AdapterError::transient(
            SYSTEM,
            format!("no host keys captured from {}:{}", host, port),
        ));
    }
    Ok(lines)
}
