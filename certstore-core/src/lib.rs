//! Remote Windows certificate store management over WS-Management
//!
//! Jobs list, add or remove certificates in a `LocalMachine` store on a
//! remote host. Each job opens one authenticated WinRS session, runs a fixed
//! PowerShell template with typed parameters, maps the result to a
//! [`JobOutcome`] and closes the session on every path.

pub mod config;
pub mod crypto;
pub mod error;
pub mod job;
pub mod session;
pub mod store;
pub mod types;
pub mod utils;
pub mod wsman;

pub use config::{AuthScheme, StoreConfig};
pub use error::{flatten_error, Error, Result};
pub use job::{JobDescriptor, JobHandler, JobProcessor};
pub use session::{ConnectionTarget, RemoteSession, SessionConnector};
pub use types::{
    CertificateEntry, ChangeStatus, Credentials, InventoryEntry, JobOutcome, JobStatus, JobTarget, OperationKind,
    OperationRequest, Thumbprint,
};
