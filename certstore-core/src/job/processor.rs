use std::any::Any;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use tracing::{error, info, warn};

use super::{HandlerRegistry, JobDescriptor};
use crate::config::{StoreConfig, INVALID_MANAGEMENT_OPERATION, STORE_TYPE_NAME};
use crate::error::{flatten_error, Error};
use crate::session::{SessionConnector, SessionManager, WinRmConnector};
use crate::types::{JobOutcome, JobTarget, OperationKind, OperationRequest};

/// Runs jobs end to end: config, session, dispatch, outcome, close.
///
/// Holds no per-job state, so one processor can serve concurrent jobs.
pub struct JobProcessor<C: SessionConnector> {
    sessions: SessionManager<C>,
    registry: HandlerRegistry<C::Session>,
}

impl JobProcessor<WinRmConnector> {
    /// Processor talking WinRS over WS-Management.
    pub fn winrm() -> Self {
        Self::new(WinRmConnector)
    }
}

impl<C: SessionConnector> JobProcessor<C> {
    pub fn new(connector: C) -> Self {
        Self::with_registry(connector, HandlerRegistry::with_default_handlers())
    }

    pub fn with_registry(connector: C, registry: HandlerRegistry<C::Session>) -> Self {
        Self {
            sessions: SessionManager::new(connector),
            registry,
        }
    }

    /// Resolve a scheduler descriptor and execute it.
    pub async fn execute_descriptor(&self, descriptor: &JobDescriptor) -> JobOutcome {
        let target = descriptor.target();
        let kind = descriptor.requested_kind();

        let config = match StoreConfig::resolve(&descriptor.store_properties) {
            Ok(config) => config,
            Err(e) => return failure(kind, &target, Error::from(e)),
        };

        let request = match descriptor.operation() {
            Ok(request) => request,
            Err(e) => return failure(kind, &target, Error::from(e)),
        };

        self.execute(&target, &request, &config).await
    }

    /// Execute one operation against one store.
    ///
    /// Always produces an outcome. A session, once opened, is closed before
    /// this returns.
    pub async fn execute(&self, target: &JobTarget, request: &OperationRequest, config: &StoreConfig) -> JobOutcome {
        let handler = match request.kind().and_then(|kind| self.registry.get(kind)) {
            Some(handler) => handler,
            None => {
                warn!(
                    request = %request_name(request),
                    host = %target.host_address,
                    "rejecting unsupported operation"
                );
                return JobOutcome::failure(INVALID_MANAGEMENT_OPERATION);
            }
        };
        let kind = handler.kind();

        info!(
            store_type = STORE_TYPE_NAME,
            kind = %kind,
            host = %target.host_address,
            store = %target.store_path,
            "begin job"
        );

        if let Err(e) = handler.preflight(request) {
            return failure(Some(kind), target, e);
        }

        let mut guard = match self
            .sessions
            .open(&target.host_address, &target.credentials, config)
            .await
        {
            Ok(guard) => guard,
            Err(e) => return failure(Some(kind), target, Error::from(e)),
        };

        let result = match guard.session() {
            Ok(session) => AssertUnwindSafe(handler.run(session, target, request))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| Err(Error::UnexpectedFault(panic_message(panic.as_ref())))),
            Err(e) => Err(Error::from(e)),
        };

        if let Err(e) = guard.close().await {
            warn!(host = %target.host_address, error = %flatten_error(&e), "failed to close remote session");
        }

        match result {
            Ok(outcome) => {
                info!(kind = %kind, status = ?outcome.status, "job complete");
                outcome
            }
            Err(e) => failure(Some(kind), target, e),
        }
    }
}

fn failure(kind: Option<OperationKind>, target: &JobTarget, err: Error) -> JobOutcome {
    let cause = flatten_error(&err);
    let store = &target.store_path;
    let host = &target.host_address;

    let message = match kind {
        Some(OperationKind::Inventory) => format!("Inventory of {} on server {} failed: {}", store, host, cause),
        Some(OperationKind::Add) => format!("Addition of certificate to {} on server {} failed: {}", store, host, cause),
        Some(OperationKind::Remove) => {
            format!("Failed removal of certificate from {} on server {}: {}", store, host, cause)
        }
        None => format!("Job for {} on server {} failed: {}", store, host, cause),
    };

    error!(store = %store, host = %host, "{}", message);
    JobOutcome::failure(message)
}

fn request_name(request: &OperationRequest) -> &str {
    match request {
        OperationRequest::Inventory { .. } => "Inventory",
        OperationRequest::AddCertificate { .. } => "Add",
        OperationRequest::RemoveCertificate { .. } => "Remove",
        OperationRequest::Unsupported { kind } => kind,
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "handler panicked".to_string())
}
