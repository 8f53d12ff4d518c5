//! # Stagehand Credential Provisioner
//!
//! Generates and reuses SSH key pairs and registers their public halves as
//! deploy keys.
//!
//! Key pairs live in the [`SecretStore`] under `keys/<name>` and are never
//! regenerated once stored: every system trusting the old public key would
//! silently break. Registration identity is the public key fingerprint,
//! never the deploy key title.
pub mod error;
pub mod openssh;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use ed25519_dalek::SigningKey;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, Zeroizing};

use crate::adapter::error::{AdapterError, AdapterResult};
use crate::adapter::{GitHost, RepositoryRef};
use crate::kernel::constants::KEYPAIR_PREFIX;
use crate::poller::Poller;
use crate::step::{ExternalResourceRef, IdempotentStep, Resource, StepOutcome};
use crate::storage::{key_segment, SecretStore};

pub use error::CredentialError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyAlgorithm {
    #[serde(rename = "ssh-ed25519")]
    Ed25519,
}

impl fmt::Display for KeyAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyAlgorithm::Ed25519 => f.write_str(openssh::ED25519_KEY_TYPE),
        }
    }
}

/// Persisted form of a key pair
#[derive(Serialize, Deserialize)]
struct KeyRecord {
    algorithm: KeyAlgorithm,
    /// base64 of the 32-byte Ed25519 seed
    seed: String,
    public_key: String,
    fingerprint: String,
}

/// An SSH key pair; the private half never appears in `Debug` output
#[derive(Clone)]
pub struct KeyMaterial {
    name: String,
    signing_key: SigningKey,
    public_key: String,
    fingerprint: String,
}

impl KeyMaterial {
    pub fn generate(name: &str) -> Self {
        Self::from_signing_key(name, SigningKey::generate(&mut OsRng))
    }

    pub fn from_seed(name: &str, seed: &[u8; 32]) -> Self {
        Self::from_signing_key(name, SigningKey::from_bytes(seed))
    }

    fn from_signing_key(name: &str, signing_key: SigningKey) -> Self {
        let public = signing_key.verifying_key().to_bytes();
        let public_key = openssh::public_key_line(&public, name);
        let fingerprint = openssh::blob_fingerprint(&openssh::public_key_blob(&public));
        Self {
            name: name.to_string(),
            signing_key,
            public_key,
            fingerprint,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn algorithm(&self) -> KeyAlgorithm {
        KeyAlgorithm::Ed25519
    }

    /// OpenSSH public key line with the key name as comment
    pub fn public_key(&self) -> &str {
        &self.public_key
    }

    /// `SHA256:...` fingerprint of the public key
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Private key in OpenSSH file format
    pub fn private_key_openssh(&self) -> Zeroizing<String> {
        let seed = Zeroizing::new(self.signing_key.to_bytes());
        let public = self.signing_key.verifying_key().to_bytes();
        openssh::private_key_pem(&seed, &public, &self.name)
    }

    fn to_record(&self) -> Result<Zeroizing<Vec<u8>>, CredentialError> {
        let seed = Zeroizing::new(self.signing_key.to_bytes());
        let mut record = KeyRecord {
            algorithm: self.algorithm(),
            seed: STANDARD.encode(&*seed),
            public_key: self.public_key.clone(),
            fingerprint: self.fingerprint.clone(),
        };
        let encoded = serde_json::to_vec_pretty(&record).map_err(|e| CredentialError::corrupt(&self.name, e.to_string()));
        record.seed.zeroize();
        encoded.map(Zeroizing::new)
    }

    fn from_record(name: &str, bytes: &[u8]) -> Result<Self, CredentialError> {
        let record: KeyRecord =
            serde_json::from_slice(bytes).map_err(|e| CredentialError::corrupt(name, e.to_string()))?;
        let seed_text = Zeroizing::new(record.seed);
        let seed = Zeroizing::new(
            STANDARD
                .decode(seed_text.as_bytes())
                .map_err(|e| CredentialError::corrupt(name, format!("seed is not base64: {}", e)))?,
        );
        let seed: &[u8; 32] = seed
            .as_slice()
            .try_into()
            .map_err(|_| CredentialError::corrupt(name, format!("seed has {} bytes, expected 32", seed.len())))?;

        let key = match record.algorithm {
            KeyAlgorithm::Ed25519 => Self::from_seed(name, seed),
        };
        if key.fingerprint != record.fingerprint {
            return Err(CredentialError::corrupt(
                name,
                format!(
                    "recorded fingerprint {} does not match derived {}",
                    record.fingerprint, key.fingerprint
                ),
            ));
        }
        Ok(key)
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("name", &self.name)
            .field("algorithm", &self.algorithm())
            .field("fingerprint", &self.fingerprint)
            .finish_non_exhaustive()
    }
}

/// Secret store key for a named key pair
pub fn key_pair_store_key(name: &str) -> String {
    format!("{}/{}", KEYPAIR_PREFIX, key_segment(name))
}

/// Whether a deploy key with `key`'s fingerprint is registered on `repo`
pub async fn is_registered(host: &dyn GitHost, repo: &RepositoryRef, key: &KeyMaterial) -> AdapterResult<bool> {
    let keys = host.list_deploy_keys(repo).await?;
    Ok(keys
        .iter()
        .any(|deploy_key| openssh::line_fingerprint(&deploy_key.key).as_deref() == Some(key.fingerprint())))
}

/// A deploy key on a repository, identified by fingerprint
struct DeployKeyResource<'a> {
    host: &'a dyn GitHost,
    repository: &'a RepositoryRef,
    key: &'a KeyMaterial,
    title: &'a str,
    read_only: bool,
}

#[async_trait]
impl Resource for DeployKeyResource<'_> {
    fn reference(&self) -> ExternalResourceRef {
        ExternalResourceRef::new("deploy-key", format!("{} on {}", self.key.fingerprint(), self.repository))
    }

    async fn exists(&self) -> AdapterResult<bool> {
        is_registered(self.host, self.repository, self.key).await
    }

    async fn create(&self) -> AdapterResult<()> {
        match self
            .host
            .add_deploy_key(self.repository, self.title, self.key.public_key(), self.read_only)
            .await
        {
            Err(err) if err.is_conflict() => {
                // Only our own key under another title counts as present
                if is_registered(self.host, self.repository, self.key).await? {
                    Err(err)
                } else {
                    Err(AdapterError::fatal(
                        err.system.clone(),
                        format!(
                            "deploy key '{}' conflicts with a different key on {}: {}",
                            self.title, self.repository, err.message
                        ),
                    ))
                }
            }
            other => other,
        }
    }
}

/// Generates, persists and registers key pairs
#[derive(Debug, Clone)]
pub struct CredentialProvisioner {
    store: Arc<dyn SecretStore>,
}

impl CredentialProvisioner {
    pub fn new(store: Arc<dyn SecretStore>) -> Self {
        Self { store }
    }

    /// The key pair stored under `name`, if any. Never generates.
    pub fn load_key_pair(&self, name: &str) -> Result<Option<KeyMaterial>, CredentialError> {
        match self.store.get(&key_pair_store_key(name))? {
            Some(record) => KeyMaterial::from_record(name, &record).map(Some),
            None => Ok(None),
        }
    }

    /// Reuse the key pair stored under `name`, or generate and persist one.
    ///
    /// Persisting uses put-if-absent; when two callers race, both end up
    /// with the winner's key.
    pub fn ensure_key_pair(&self, name: &str) -> Result<KeyMaterial, CredentialError> {
        let store_key = key_pair_store_key(name);
        if let Some(key) = self.load_key_pair(name)? {
            log::debug!("Reusing key pair '{}' ({})", name, key.fingerprint());
            return Ok(key);
        }

        let generated = KeyMaterial::generate(name);
        let record = generated.to_record()?;
        match self.store.put_if_absent(&store_key, &record)? {
            None => {
                log::info!("Generated key pair '{}' ({})", name, generated.fingerprint());
                Ok(generated)
            }
            Some(existing) => KeyMaterial::from_record(name, &existing),
        }
    }

    /// Register `key` as a deploy key on `repository` unless a key with the
    /// same fingerprint is already there, under any title.
    pub async fn ensure_registered(
        &self,
        poller: &Poller,
        key: &KeyMaterial,
        host: &dyn GitHost,
        repository: &RepositoryRef,
        title: &str,
        read_only: bool,
    ) -> Result<StepOutcome, CredentialError> {
        let step = IdempotentStep::new(DeployKeyResource {
            host,
            repository,
            key,
            title,
            read_only,
        });
        Ok(step.ensure(poller).await?)
    }
}
