//! Certificate store operations over an open session

pub mod parse;
pub mod script;

use base64::prelude::*;
use secrecy::{ExposeSecret, SecretString};
use serde_json::json;
use tracing::{debug, info};

use crate::config::STORE_LOCATION;
use crate::error::{RemoteScriptError, StoreError, StoreOperation};
use crate::session::{CommandOutput, RemoteCommand, RemoteSession};
use crate::types::{CertificateEntry, Thumbprint};

pub use parse::RemoveReport;

/// Result of a remove request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveOutcome {
    Removed,
    /// No certificate had the thumbprint. Not an error.
    NotPresent,
}

/// Runs store operations against one store path in the machine-wide scope.
pub struct CertificateStoreClient<'s, S: RemoteSession> {
    session: &'s mut S,
    host: String,
    store_path: String,
}

impl<'s, S: RemoteSession> CertificateStoreClient<'s, S> {
    pub fn new(session: &'s mut S, host: impl Into<String>, store_path: impl Into<String>) -> Self {
        Self {
            session,
            host: host.into(),
            store_path: store_path.into(),
        }
    }

    /// Snapshot of every certificate in the store. An empty store is `Ok(vec![])`.
    pub async fn list(&mut self) -> Result<Vec<CertificateEntry>, StoreError> {
        let command = RemoteCommand {
            name: script::LIST_NAME,
            script: script::LIST,
            parameters: json!({ "StorePath": self.store_path, "Location": STORE_LOCATION }),
        };
        let output = self.run(StoreOperation::List, &command).await?;

        let entries = parse::inventory(&output.stdout).map_err(|detail| self.malformed(StoreOperation::List, detail))?;
        debug!(store = %self.store_path, host = %self.host, count = entries.len(), "listed certificates");
        Ok(entries)
    }

    /// Import `pfx` into the store. Returns the installed thumbprint when the
    /// remote side reports one.
    pub async fn add(
        &mut self,
        pfx: &[u8],
        password: Option<&SecretString>,
        friendly_name: Option<&str>,
    ) -> Result<Option<Thumbprint>, StoreError> {
        let command = RemoteCommand {
            name: script::ADD_NAME,
            script: script::ADD,
            parameters: json!({
                "StorePath": self.store_path,
                "Location": STORE_LOCATION,
                "Pfx": BASE64_STANDARD.encode(pfx),
                "Password": password.map(|p| p.expose_secret().to_string()),
                "FriendlyName": friendly_name,
            }),
        };
        let output = self.run(StoreOperation::Add, &command).await?;

        let thumbprint = parse::added_thumbprint(&output.stdout);
        info!(
            store = %self.store_path,
            host = %self.host,
            thumbprint = thumbprint.as_ref().map(Thumbprint::as_str).unwrap_or("unknown"),
            "added certificate"
        );
        Ok(thumbprint)
    }

    /// Remove the first certificate matching `thumbprint`.
    pub async fn remove(&mut self, thumbprint: &Thumbprint) -> Result<RemoveOutcome, StoreError> {
        let command = RemoteCommand {
            name: script::REMOVE_NAME,
            script: script::REMOVE,
            parameters: json!({
                "StorePath": self.store_path,
                "Location": STORE_LOCATION,
                "Thumbprint": thumbprint.as_str(),
            }),
        };
        let output = self.run(StoreOperation::Remove, &command).await?;

        let report = parse::remove_report(&output.stdout).map_err(|detail| self.malformed(StoreOperation::Remove, detail))?;
        if report.matches > 1 {
            info!(thumbprint = %thumbprint, matches = report.matches, "multiple matches, removed the first");
        }

        Ok(if report.removed {
            RemoveOutcome::Removed
        } else {
            RemoveOutcome::NotPresent
        })
    }

    async fn run(&mut self, operation: StoreOperation, command: &RemoteCommand) -> Result<CommandOutput, StoreError> {
        let output = self.session.run(command).await.map_err(|source| StoreError::Transport {
            operation,
            store: self.store_path.clone(),
            host: self.host.clone(),
            source,
        })?;

        if !output.succeeded() {
            return Err(StoreError::Remote {
                operation,
                store: self.store_path.clone(),
                host: self.host.clone(),
                source: RemoteScriptError {
                    exit_code: output.exit_code,
                    detail: failure_detail(&output),
                },
            });
        }

        Ok(output)
    }

    fn malformed(&self, operation: StoreOperation, detail: String) -> StoreError {
        StoreError::MalformedOutput {
            operation,
            store: self.store_path.clone(),
            host: self.host.clone(),
            detail,
        }
    }
}

fn failure_detail(output: &CommandOutput) -> String {
    [output.stderr.trim(), output.stdout.trim()]
        .into_iter()
        .find(|text| !text.is_empty())
        .unwrap_or("no error output")
        .to_string()
}
