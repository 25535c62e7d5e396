use async_trait::async_trait;
use tracing::info;

use super::JobHandler;
use crate::crypto::inspect_payload;
use crate::error::Error;
use crate::session::RemoteSession;
use crate::store::{CertificateStoreClient, RemoveOutcome};
use crate::types::{InventoryEntry, JobOutcome, JobTarget, OperationKind, OperationRequest};

fn mismatched(kind: OperationKind, request: &OperationRequest) -> Error {
    Error::UnexpectedFault(format!("{} handler received a {:?} request", kind, request.kind()))
}

/// Lists the store and classifies each entry against the known set.
#[derive(Debug, Clone, Copy, Default)]
pub struct InventoryHandler;

#[async_trait]
impl<S: RemoteSession> JobHandler<S> for InventoryHandler {
    fn kind(&self) -> OperationKind {
        OperationKind::Inventory
    }

    async fn run(&self, session: &mut S, target: &JobTarget, request: &OperationRequest) -> Result<JobOutcome, Error> {
        let OperationRequest::Inventory { known_thumbprints } = request else {
            return Err(mismatched(OperationKind::Inventory, request));
        };

        let mut store = CertificateStoreClient::new(session, &target.host_address, &target.store_path);
        let entries = store.list().await?;

        if entries.is_empty() {
            return Ok(JobOutcome::warning(format!(
                "No certificates found in {} certificate store on {}",
                target.store_path, target.host_address
            )));
        }

        let annotated: Vec<_> = entries
            .iter()
            .map(|entry| InventoryEntry::classify(entry, known_thumbprints))
            .collect();
        info!(
            store = %target.store_path,
            host = %target.host_address,
            count = annotated.len(),
            "inventory complete"
        );
        Ok(JobOutcome::success("Inventory Complete").with_entries(annotated))
    }
}

/// Installs a PFX or bare certificate.
#[derive(Debug, Clone, Copy, Default)]
pub struct AddHandler;

#[async_trait]
impl<S: RemoteSession> JobHandler<S> for AddHandler {
    fn kind(&self) -> OperationKind {
        OperationKind::Add
    }

    fn preflight(&self, request: &OperationRequest) -> Result<(), Error> {
        let OperationRequest::AddCertificate {
            pfx_bytes,
            pfx_password,
            ..
        } = request
        else {
            return Err(mismatched(OperationKind::Add, request));
        };

        let summary = inspect_payload(pfx_bytes, pfx_password.as_ref())?;
        info!(
            thumbprint = %summary.thumbprint,
            subject = %summary.subject,
            has_private_key = summary.has_private_key,
            format = ?summary.format,
            "certificate payload accepted"
        );
        Ok(())
    }

    async fn run(&self, session: &mut S, target: &JobTarget, request: &OperationRequest) -> Result<JobOutcome, Error> {
        let OperationRequest::AddCertificate {
            pfx_bytes,
            pfx_password,
            target_alias,
        } = request
        else {
            return Err(mismatched(OperationKind::Add, request));
        };

        let mut store = CertificateStoreClient::new(session, &target.host_address, &target.store_path);
        let installed = store
            .add(pfx_bytes, pfx_password.as_ref(), target_alias.as_deref())
            .await?;

        let message = match installed {
            Some(thumbprint) => format!(
                "Addition of certificate {} to {} on {} complete",
                thumbprint, target.store_path, target.host_address
            ),
            None => format!(
                "Addition of certificate to {} on {} complete",
                target.store_path, target.host_address
            ),
        };
        Ok(JobOutcome::success(message))
    }
}

/// Removes the first certificate matching a thumbprint.
#[derive(Debug, Clone, Copy, Default)]
pub struct RemoveHandler;

#[async_trait]
impl<S: RemoteSession> JobHandler<S> for RemoveHandler {
    fn kind(&self) -> OperationKind {
        OperationKind::Remove
    }

    async fn run(&self, session: &mut S, target: &JobTarget, request: &OperationRequest) -> Result<JobOutcome, Error> {
        let OperationRequest::RemoveCertificate { thumbprint } = request else {
            return Err(mismatched(OperationKind::Remove, request));
        };

        let mut store = CertificateStoreClient::new(session, &target.host_address, &target.store_path);
        let message = match store.remove(thumbprint).await? {
            RemoveOutcome::Removed => format!(
                "Successfully removed {} from {} on {}",
                thumbprint, target.store_path, target.host_address
            ),
            RemoveOutcome::NotPresent => format!(
                "Certificate {} not present in {} on {}, nothing to remove",
                thumbprint, target.store_path, target.host_address
            ),
        };
        Ok(JobOutcome::success(message))
    }
}
