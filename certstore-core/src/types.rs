use std::collections::BTreeSet;

use base64::prelude::*;
use secrecy::SecretString;
use serde::Serialize;

use crate::error::PayloadError;

/// Upper-case hex certificate thumbprint.
///
/// Whitespace (and the colons some tools print between bytes) is stripped on
/// parse so thumbprints copied from different sources compare equal.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct Thumbprint(String);

impl Thumbprint {
    pub fn parse(raw: &str) -> Result<Self, PayloadError> {
        let normalized: String = raw
            .chars()
            .filter(|c| !c.is_whitespace() && *c != ':')
            .map(|c| c.to_ascii_uppercase())
            .collect();

        if normalized.is_empty() || !normalized.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(PayloadError::Thumbprint(raw.to_string()));
        }
        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Thumbprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One certificate observed in a remote store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateEntry {
    pub thumbprint: Thumbprint,
    /// DER-encoded certificate.
    pub raw_data: Vec<u8>,
    pub has_private_key: bool,
}

/// Username and secret bound to a remote session.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: SecretString,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        let password: String = password.into();
        Self {
            username: username.into(),
            password: SecretString::new(password.into_boxed_str()),
        }
    }
}

/// Identifies the remote store a job operates on.
#[derive(Debug, Clone)]
pub struct JobTarget {
    pub host_address: String,
    /// Store name in the machine-wide namespace, e.g. "My" or "Root".
    pub store_path: String,
    pub credentials: Credentials,
}

/// The operation a job performs. Fixed for the lifetime of the job.
#[derive(Debug, Clone)]
pub enum OperationRequest {
    Inventory {
        /// Thumbprints the caller already knows about, used to classify entries.
        known_thumbprints: BTreeSet<Thumbprint>,
    },
    AddCertificate {
        pfx_bytes: Vec<u8>,
        pfx_password: Option<SecretString>,
        target_alias: Option<String>,
    },
    RemoveCertificate {
        thumbprint: Thumbprint,
    },
    /// An operation kind the scheduler sent that this store type does not handle.
    Unsupported {
        kind: String,
    },
}

impl OperationRequest {
    /// Handler key for this request, `None` for unsupported kinds.
    pub fn kind(&self) -> Option<OperationKind> {
        match self {
            OperationRequest::Inventory { .. } => Some(OperationKind::Inventory),
            OperationRequest::AddCertificate { .. } => Some(OperationKind::Add),
            OperationRequest::RemoveCertificate { .. } => Some(OperationKind::Remove),
            OperationRequest::Unsupported { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OperationKind {
    Inventory,
    Add,
    Remove,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Inventory => "Inventory",
            OperationKind::Add => "Add",
            OperationKind::Remove => "Remove",
        }
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result status vocabulary consumed by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum JobStatus {
    Success,
    Warning,
    Failure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ChangeStatus {
    New,
    Unchanged,
}

/// An inventory entry annotated for the scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryEntry {
    pub thumbprint: Thumbprint,
    /// Base64 of the DER certificate.
    pub certificate: String,
    pub has_private_key: bool,
    pub change_status: ChangeStatus,
}

impl InventoryEntry {
    pub fn classify(entry: &CertificateEntry, known: &BTreeSet<Thumbprint>) -> Self {
        let change_status = if known.contains(&entry.thumbprint) {
            ChangeStatus::Unchanged
        } else {
            ChangeStatus::New
        };

        Self {
            thumbprint: entry.thumbprint.clone(),
            certificate: BASE64_STANDARD.encode(&entry.raw_data),
            has_private_key: entry.has_private_key,
            change_status,
        }
    }
}

/// The result of one job, produced on every path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobOutcome {
    pub status: JobStatus,
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub entries: Vec<InventoryEntry>,
}

impl JobOutcome {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            status: JobStatus::Success,
            message: message.into(),
            entries: Vec::new(),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            status: JobStatus::Warning,
            message: message.into(),
            entries: Vec::new(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            status: JobStatus::Failure,
            message: message.into(),
            entries: Vec::new(),
        }
    }

    pub fn with_entries(mut self, entries: Vec<InventoryEntry>) -> Self {
        self.entries = entries;
        self
    }
}
