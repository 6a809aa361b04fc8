//! SSH secrets and their stored fingerprints

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::CoreError;

/// Which SSH credential a secret belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialKind {
    /// Key installed into the provisioned operating system
    Os,
    /// Key used to reach the rescue system
    Rescue,
}

impl fmt::Display for CredentialKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialKind::Os => f.write_str("os"),
            CredentialKind::Rescue => f.write_str("rescue"),
        }
    }
}

/// SSH secret as fetched from the cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SshSecret {
    /// Secret name
    pub name: String,
    /// Secret namespace
    pub namespace: String,
    /// Secret payload (key name, public key, private key, ...)
    #[serde(default)]
    pub data: BTreeMap<String, String>,
}

impl SshSecret {
    /// Create a secret without data
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            data: BTreeMap::new(),
        }
    }

    /// Add a data entry
    #[must_use]
    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    /// SHA-256 over the sorted data entries, hex encoded
    #[must_use]
    pub fn data_hash(&self) -> String {
        let mut hasher = Sha256::new();
        for (key, value) in &self.data {
            hasher.update(key.as_bytes());
            hasher.update([0u8]);
            hasher.update(value.as_bytes());
            hasher.update([0u8]);
        }
        hex::encode(hasher.finalize())
    }
}

/// Reference to a secret
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretReference {
    pub name: String,
    pub namespace: String,
}

/// Fingerprint of the secret a host was last observed with
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretStatus {
    /// Which secret
    pub reference: SecretReference,
    /// Hash of the secret data
    pub data_hash: String,
}

impl SecretStatus {
    /// Fingerprint a secret
    ///
    /// # Errors
    /// Returns `CoreError::InvalidSecret` if the secret has no name
    pub fn from_secret(secret: &SshSecret, kind: CredentialKind) -> Result<Self, CoreError> {
        if secret.name.trim().is_empty() {
            return Err(CoreError::InvalidSecret {
                kind,
                reason: "secret has no name".to_string(),
            });
        }

        Ok(Self {
            reference: SecretReference {
                name: secret.name.clone(),
                namespace: secret.namespace.clone(),
            },
            data_hash: secret.data_hash(),
        })
    }

    /// Whether the secret is the one this fingerprint was taken from
    #[must_use]
    pub fn matches(&self, secret: &SshSecret) -> bool {
        self.reference.name == secret.name
            && self.reference.namespace == secret.namespace
            && self.data_hash == secret.data_hash()
    }
}

/// Result of comparing a fetched secret with the stored fingerprint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretChange {
    /// No fingerprint stored yet
    Unobserved,
    Unchanged,
    /// Secret differs from the stored fingerprint
    Rotated,
}

impl SecretChange {
    /// Compare a stored fingerprint against a freshly fetched secret
    #[must_use]
    pub fn detect(stored: Option<&SecretStatus>, secret: &SshSecret) -> Self {
        match stored {
            None => SecretChange::Unobserved,
            Some(status) if status.matches(secret) => SecretChange::Unchanged,
            Some(_) => SecretChange::Rotated,
        }
    }
}
