use std::collections::BTreeSet;

use secrecy::SecretString;
use serde::Deserialize;
use tracing::warn;

use crate::config::{job_types, operation_types};
use crate::crypto::decode_contents;
use crate::error::PayloadError;
use crate::types::{Credentials, JobTarget, OperationKind, OperationRequest, Thumbprint};

/// A job as handed over by the scheduler.
#[derive(Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobDescriptor {
    #[serde(default)]
    pub job_type: Option<String>,
    #[serde(default)]
    pub operation_type: Option<String>,
    pub client_machine: String,
    pub store_path: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    password: Option<String>,
    /// Raw per-store properties: an object, a JSON string or null.
    #[serde(default)]
    pub store_properties: serde_json::Value,
    #[serde(default)]
    pub known_thumbprints: Vec<String>,
    /// Base64 PFX or DER certificate for add jobs.
    #[serde(default)]
    pub entry_contents: Option<String>,
    #[serde(default)]
    pfx_password: Option<String>,
    /// Friendly name for add jobs, thumbprint for remove jobs.
    #[serde(default)]
    pub alias: Option<String>,
    #[serde(default)]
    pub thumbprint: Option<String>,
}

impl std::fmt::Debug for JobDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobDescriptor")
            .field("job_type", &self.job_type)
            .field("operation_type", &self.operation_type)
            .field("client_machine", &self.client_machine)
            .field("store_path", &self.store_path)
            .field("username", &self.username)
            .field("alias", &self.alias)
            .finish_non_exhaustive()
    }
}

impl JobDescriptor {
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_pfx_password(mut self, password: impl Into<String>) -> Self {
        self.pfx_password = Some(password.into());
        self
    }

    pub fn target(&self) -> JobTarget {
        JobTarget {
            host_address: self.client_machine.clone(),
            store_path: self.store_path.clone(),
            credentials: Credentials::new(self.username.clone(), self.password.clone().unwrap_or_default()),
        }
    }

    /// Operation kind requested, `None` when this store type does not handle it.
    pub fn requested_kind(&self) -> Option<OperationKind> {
        let job_type = self.job_type.as_deref().unwrap_or(job_types::MANAGEMENT);
        let operation = self.operation_type.as_deref().unwrap_or_default();

        if job_type.eq_ignore_ascii_case(job_types::INVENTORY) || operation.eq_ignore_ascii_case(job_types::INVENTORY) {
            Some(OperationKind::Inventory)
        } else if !job_type.eq_ignore_ascii_case(job_types::MANAGEMENT) {
            None
        } else if operation.eq_ignore_ascii_case(operation_types::ADD) {
            Some(OperationKind::Add)
        } else if operation.eq_ignore_ascii_case(operation_types::REMOVE) {
            Some(OperationKind::Remove)
        } else {
            None
        }
    }

    /// Decode the operation and its payload.
    pub fn operation(&self) -> Result<OperationRequest, PayloadError> {
        let Some(kind) = self.requested_kind() else {
            let kind = self
                .operation_type
                .clone()
                .filter(|op| !op.is_empty())
                .or_else(|| self.job_type.clone())
                .unwrap_or_default();
            return Ok(OperationRequest::Unsupported { kind });
        };

        match kind {
            OperationKind::Inventory => Ok(OperationRequest::Inventory {
                known_thumbprints: self.known_set(),
            }),
            OperationKind::Add => {
                let contents = self
                    .entry_contents
                    .as_deref()
                    .filter(|c| !c.trim().is_empty())
                    .ok_or(PayloadError::MissingField {
                        operation: operation_types::ADD,
                        field: "entryContents",
                    })?;
                Ok(OperationRequest::AddCertificate {
                    pfx_bytes: decode_contents(contents)?,
                    pfx_password: self
                        .pfx_password
                        .clone()
                        .filter(|p| !p.is_empty())
                        .map(|p| SecretString::new(p.into_boxed_str())),
                    target_alias: self.alias.clone().filter(|a| !a.trim().is_empty()),
                })
            }
            OperationKind::Remove => {
                let raw = self
                    .thumbprint
                    .as_deref()
                    .or(self.alias.as_deref())
                    .ok_or(PayloadError::MissingField {
                        operation: operation_types::REMOVE,
                        field: "alias",
                    })?;
                Ok(OperationRequest::RemoveCertificate {
                    thumbprint: Thumbprint::parse(raw)?,
                })
            }
        }
    }

    fn known_set(&self) -> BTreeSet<Thumbprint> {
        self.known_thumbprints
            .iter()
            .filter_map(|raw| match Thumbprint::parse(raw) {
                Ok(thumbprint) => Some(thumbprint),
                Err(_) => {
                    warn!(thumbprint = %raw, "ignoring invalid known thumbprint");
                    None
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use serde_json::json;

    fn descriptor(value: serde_json::Value) -> JobDescriptor {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn inventory_collects_known_thumbprints() {
        let d = descriptor(json!({
            "jobType": "Inventory",
            "clientMachine": "h1",
            "storePath": "My",
            "username": "CORP\\svc",
            "password": "pw",
            "knownThumbprints": ["aaa", "not hex!", "BBB"]
        }));

        let OperationRequest::Inventory { known_thumbprints } = d.operation().unwrap() else {
            panic!("expected inventory");
        };
        let known: Vec<_> = known_thumbprints.iter().map(Thumbprint::as_str).collect();
        assert_eq!(known, vec!["AAA", "BBB"]);

        let target = d.target();
        assert_eq!(target.host_address, "h1");
        assert_eq!(target.credentials.password.expose_secret(), "pw");
    }

    #[test]
    fn management_add_decodes_payload() {
        let d = descriptor(json!({
            "jobType": "Management",
            "operationType": "Add",
            "clientMachine": "h1",
            "storePath": "My",
            "entryContents": "AQID",
            "pfxPassword": "",
            "alias": "web"
        }));

        let OperationRequest::AddCertificate {
            pfx_bytes,
            pfx_password,
            target_alias,
        } = d.operation().unwrap()
        else {
            panic!("expected add");
        };
        assert_eq!(pfx_bytes, vec![1, 2, 3]);
        assert!(pfx_password.is_none());
        assert_eq!(target_alias.as_deref(), Some("web"));
    }

    #[test]
    fn add_without_contents_is_rejected() {
        let d = descriptor(json!({
            "operationType": "Add",
            "clientMachine": "h1",
            "storePath": "My"
        }));
        assert!(matches!(
            d.operation(),
            Err(PayloadError::MissingField { field: "entryContents", .. })
        ));
    }

    #[test]
    fn remove_uses_alias_as_thumbprint() {
        let d = descriptor(json!({
            "jobType": "Management",
            "operationType": "Remove",
            "clientMachine": "h1",
            "storePath": "My",
            "alias": "ab cd"
        }));
        let OperationRequest::RemoveCertificate { thumbprint } = d.operation().unwrap() else {
            panic!("expected remove");
        };
        assert_eq!(thumbprint.as_str(), "ABCD");
    }

    #[test]
    fn unknown_operations_are_unsupported() {
        let d = descriptor(json!({
            "jobType": "Management",
            "operationType": "Create",
            "clientMachine": "h1",
            "storePath": "My"
        }));
        assert_eq!(d.requested_kind(), None);
        assert!(matches!(
            d.operation().unwrap(),
            OperationRequest::Unsupported { kind } if kind == "Create"
        ));

        let d = descriptor(json!({
            "jobType": "Enrollment",
            "clientMachine": "h1",
            "storePath": "My"
        }));
        assert!(matches!(
            d.operation().unwrap(),
            OperationRequest::Unsupported { kind } if kind == "Enrollment"
        ));
    }

    #[test]
    fn debug_output_hides_secrets() {
        let d = descriptor(json!({
            "clientMachine": "h1",
            "storePath": "My",
            "password": "hunter2",
            "pfxPassword": "hunter3"
        }));
        let shown = format!("{:?}", d);
        assert!(!shown.contains("hunter2"));
        assert!(!shown.contains("hunter3"));
    }
}
