use std::io::Write;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::adapter::error::{classify_http_status_with, AdapterError, AdapterResult};
use crate::adapter::process::Invocation;
use crate::adapter::{DeployKey, GitHost, PushRequest, RepositoryRef};
use crate::kernel::constants::{SEED_COMMIT_AUTHOR, SEED_COMMIT_DATE, SEED_COMMIT_EMAIL};

const SYSTEM: &str = "gitea";
const GIT: &str = "git";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Serialize)]
struct CreateRepoOption<'a> {
    name: &'a str,
    private: bool,
    auto_init: bool,
}

#[derive(Debug, Serialize)]
struct CreateKeyOption<'a> {
    title: &'a str,
    key: &'a str,
    read_only: bool,
}

#[derive(Debug, Serialize)]
struct CreateSecretOption<'a> {
    data: &'a str,
}

#[derive(Debug, Deserialize)]
struct DeployKeyRecord {
    title: String,
    key: String,
    #[serde(default)]
    read_only: bool,
}

/// Gitea REST API client plus a git CLI push transport
#[derive(Debug, Clone)]
pub struct GiteaHost {
    client: Client,
    api_url: String,
    ssh_url: String,
    username: String,
    password: Option<String>,
    git_binary: String,
}

impl GiteaHost {
    /// `api_url` is the web root (`http://localhost:3000`), `ssh_url` the
    /// clone prefix (`ssh://git@localhost:2222`).
    pub fn new(api_url: &str, ssh_url: &str, username: &str, password: Option<String>) -> AdapterResult<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| AdapterError::fatal(SYSTEM, format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            ssh_url: ssh_url.trim_end_matches('/').to_string(),
            username: username.to_string(),
            password,
            git_binary: GIT.to_string(),
        })
    }

    pub fn with_git_binary(mut self, binary: impl Into<String>) -> Self {
        self.git_binary = binary.into();
        self
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}/api/v1{}", self.api_url, path);
        self.client
            .request(method, url)
            .basic_auth(&self.username, self.password.as_deref())
    }

    async fn send(&self, builder: RequestBuilder, action: &str) -> AdapterResult<Response> {
        let response = builder.send().await.map_err(|e| transport_error(action, &e))?;
        log::debug!("gitea: {} -> {}", action, response.status());
        Ok(response)
    }

    async fn expect_success(&self, response: Response, action: &str) -> AdapterResult<Response> {
        self.expect_success_or(response, action, &[]).await
    }

    /// `conflicts` lists extra statuses this endpoint uses for an existing resource
    async fn expect_success_or(
        &self,
        response: Response,
        action: &str,
        conflicts: &[u16],
    ) -> AdapterResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(status_error(status, action, &body, conflicts))
    }

    fn git<'a>(&self, work_tree: &Path) -> Invocation<'a> {
        Invocation::new(GIT, &self.git_binary)
            .current_dir(work_tree)
            .args(["-c", "commit.gpgsign=false", "-c", "core.autocrlf=false"])
    }
}

#[async_trait]
impl GitHost for GiteaHost {
    fn remote_url(&self, repo: &RepositoryRef) -> String {
        format!("{}/{}/{}.git", self.ssh_url, repo.owner, repo.name)
    }

    async fn repository_exists(&self, repo: &RepositoryRef) -> AdapterResult<bool> {
        let action = format!("get repository {}", repo);
        let path = format!("/repos/{}/{}", repo.owner, repo.name);
        let response = self.send(self.request(Method::GET, &path), &action).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        self.expect_success(response, &action).await?;
        Ok(true)
    }

    async fn create_repository(&self, repo: &RepositoryRef) -> AdapterResult<()> {
        let action = format!("create repository {}", repo);
        let path = if repo.owner == self.username {
            "/user/repos".to_string()
        } else {
            format!("/orgs/{}/repos", repo.owner)
        };
        let body = CreateRepoOption {
            name: &repo.name,
            private: true,
            auto_init: false,
        };
        let response = self
            .send(self.request(Method::POST, &path).json(&body), &action)
            .await?;
        self.expect_success(response, &action).await?;
        log::info!("gitea: created repository {}", repo);
        Ok(())
    }

    async fn list_deploy_keys(&self, repo: &RepositoryRef) -> AdapterResult<Vec<DeployKey>> {
        let action = format!("list deploy keys of {}", repo);
        let path = format!("/repos/{}/{}/keys", repo.owner, repo.name);
        let response = self.send(self.request(Method::GET, &path), &action).await?;
        let response = self.expect_success(response, &action).await?;
        let records: Vec<DeployKeyRecord> = response.json().await.map_err(|e| {
            AdapterError::fatal(SYSTEM, format!("{}: malformed response: {}", action, e))
        })?;
        Ok(records
            .into_iter()
            .map(|record| DeployKey {
                title: record.title,
                key: record.key,
                read_only: record.read_only,
            })
            .collect())
    }

    async fn add_deploy_key(
        &self,
        repo: &RepositoryRef,
        title: &str,
        public_key: &str,
        read_only: bool,
    ) -> AdapterResult<()> {
        let action = format!("add deploy key '{}' to {}", title, repo);
        let path = format!("/repos/{}/{}/keys", repo.owner, repo.name);
        let body = CreateKeyOption {
            title,
            key: public_key,
            read_only,
        };
        let response = self
            .send(self.request(Method::POST, &path).json(&body), &action)
            .await?;
        // Gitea reports a key already used by this repository as 422
        self.expect_success_or(response, &action, &[422]).await?;
        Ok(())
    }

    async fn set_secret(&self, repo: &RepositoryRef, name: &str, value: &str) -> AdapterResult<()> {
        let action = format!("set secret '{}' on {}", name, repo);
        let path = format!("/repos/{}/{}/actions/secrets/{}", repo.owner, repo.name, name);
        let response = self
            .send(
                self.request(Method::PUT, &path).json(&CreateSecretOption { data: value }),
                &action,
            )
            .await?;
        self.expect_success(response, &action).await?;
        Ok(())
    }

    async fn push(&self, request: PushRequest<'_>) -> AdapterResult<bool> {
        let work_tree = request.work_tree;
        let head = format!("refs/heads/{}", request.branch);

        // A retried push starts from a clean history so the commit stays parentless
        let git_dir = work_tree.join(".git");
        if tokio::fs::try_exists(&git_dir).await.unwrap_or(false) {
            tokio::fs::remove_dir_all(&git_dir).await.map_err(|e| {
                AdapterError::fatal(GIT, format!("failed to reset {}: {}", git_dir.display(), e))
            })?;
        }

        self.git(work_tree).args(["init", "-q"]).checked("git init").await?;
        self.git(work_tree)
            .args(["symbolic-ref", "HEAD", head.as_str()])
            .checked("git symbolic-ref")
            .await?;
        self.git(work_tree).args(["add", "-A"]).checked("git add").await?;
        // Fixed identity and timestamps make the commit id a function of the tree
        self.git(work_tree)
            .args(["commit", "-q", "--allow-empty", "-m", request.message])
            .env("GIT_AUTHOR_NAME", SEED_COMMIT_AUTHOR)
            .env("GIT_AUTHOR_EMAIL", SEED_COMMIT_EMAIL)
            .env("GIT_AUTHOR_DATE", SEED_COMMIT_DATE)
            .env("GIT_COMMITTER_NAME", SEED_COMMIT_AUTHOR)
            .env("GIT_COMMITTER_EMAIL", SEED_COMMIT_EMAIL)
            .env("GIT_COMMITTER_DATE", SEED_COMMIT_DATE)
            .checked("git commit")
            .await?;

        let key_file = stage_secret_file(request.key.private_key_openssh().as_bytes())?;
        let known_hosts_file = match request.known_hosts {
            Some(lines) => Some(stage_secret_file(lines.as_bytes())?),
            None => None,
        };
        let ssh_command = ssh_command(key_file.path(), known_hosts_file.as_ref().map(|f| f.path()));

        let remote = self.remote_url(request.repository);
        let refspec = format!("HEAD:{}", head);
        let output = self
            .git(work_tree)
            .args(["push", "--force", "--porcelain", remote.as_str(), refspec.as_str()])
            .env("GIT_SSH_COMMAND", ssh_command)
            .env("GIT_TERMINAL_PROMPT", "0")
            .checked("git push")
            .await?;

        let changed = push_changed_remote(&output.stdout_str());
        log::info!(
            "gitea: pushed {} to {} ({})",
            request.branch,
            request.repository,
            if changed { "updated" } else { "up to date" }
        );
        Ok(changed)
    }
}

fn transport_error(action: &str, error: &reqwest::Error) -> AdapterError {
    let message = format!("{}: {}", action, error);
    if error.is_timeout() || error.is_connect() || error.is_request() {
        AdapterError::transient(SYSTEM, message)
    } else {
        AdapterError::fatal(SYSTEM, message)
    }
}

fn status_error(status: StatusCode, action: &str, body: &str, conflicts: &[u16]) -> AdapterError {
    AdapterError::new(
        classify_http_status_with(status.as_u16(), conflicts),
        SYSTEM,
        format!("{}: HTTP {}: {}", action, status.as_u16(), body.trim()),
    )
}

/// Write sensitive material to a private temp file (0600 on unix)
fn stage_secret_file(contents: &[u8]) -> AdapterResult<NamedTempFile> {
    let mut file = NamedTempFile::new()
        .map_err(|e| AdapterError::fatal(GIT, format!("failed to create temp file: {}", e)))?;
    file.write_all(contents)
        .and_then(|_| file.flush())
        .map_err(|e| AdapterError::fatal(GIT, format!("failed to write temp file: {}", e)))?;
    Ok(file)
}

fn ssh_command(key: &Path, known_hosts: Option<&Path>) -> String {
    let mut command = format!("ssh -i '{}' -o IdentitiesOnly=yes -o BatchMode=yes", key.display());
    match known_hosts {
        Some(path) => command.push_str(&format!(
            " -o StrictHostKeyChecking=yes -o UserKnownHostsFile='{}'",
            path.display()
        )),
        None => command.push_str(" -o StrictHostKeyChecking=no -o UserKnownHostsFile=/dev/null"),
    }
    command
}

/// Porcelain ref lines are `<flag>\t<from>:<to>\t<summary>`; `=` means the
/// remote already pointed at the pushed commit.
pub(crate) fn push_changed_remote(porcelain: &str) -> bool {
    porcelain
        .lines()
        .filter(|line| line.contains('\t'))
        .filter_map(|line| line.chars().next())
        .any(|flag| matches!(flag, ' ' | '+' | '*' | '-'))
}
