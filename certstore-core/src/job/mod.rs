//! Job dispatch
//!
//! A job resolves its store configuration, opens one session, runs a single
//! store operation through the handler registered for its kind, closes the
//! session and reports a [`JobOutcome`](crate::types::JobOutcome).

mod descriptor;
mod handlers;
mod processor;
mod registry;

use async_trait::async_trait;

use crate::error::Error;
use crate::session::RemoteSession;
use crate::types::{JobOutcome, JobTarget, OperationKind, OperationRequest};

pub use descriptor::JobDescriptor;
pub use handlers::{AddHandler, InventoryHandler, RemoveHandler};
pub use processor::JobProcessor;
pub use registry::HandlerRegistry;

/// Performs one operation kind over an open session.
#[async_trait]
pub trait JobHandler<S: RemoteSession>: Send + Sync {
    fn kind(&self) -> OperationKind;

    /// Local validation, run before any session is opened.
    fn preflight(&self, _request: &OperationRequest) -> Result<(), Error> {
        Ok(())
    }

    async fn run(&self, session: &mut S, target: &JobTarget, request: &OperationRequest) -> Result<JobOutcome, Error>;
}
