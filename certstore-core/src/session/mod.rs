//! Remote session lifetime
//!
//! A session is opened per job, used for the job's store operation and
//! closed before the job returns. [`SessionGuard`] owns the open session.

mod guard;
mod target;
mod winrm;

use async_trait::async_trait;
use tracing::info;

use crate::config::StoreConfig;
use crate::error::ConnectionError;
use crate::types::Credentials;

pub use guard::SessionGuard;
pub use target::ConnectionTarget;
pub use winrm::{WinRmConnector, WinRmSession};

/// A fixed script template and the typed parameters it reads from `$Params`.
#[derive(Debug, Clone)]
pub struct RemoteCommand {
    /// Short name used in logs.
    pub name: &'static str,
    pub script: &'static str,
    pub parameters: serde_json::Value,
}

/// Decoded output of a remote command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    /// Plain text; CLIXML error records are already unwrapped.
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandOutput {
    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }
}

/// An open, authenticated remote-execution channel.
#[async_trait]
pub trait RemoteSession: Send {
    async fn run(&mut self, command: &RemoteCommand) -> Result<CommandOutput, ConnectionError>;

    /// Release the remote side. Idempotent.
    async fn close(&mut self) -> Result<(), ConnectionError>;

    fn is_open(&self) -> bool;
}

/// Opens sessions to a connection target.
#[async_trait]
pub trait SessionConnector: Send + Sync {
    type Session: RemoteSession + 'static;

    async fn open(
        &self,
        target: &ConnectionTarget,
        credentials: &Credentials,
    ) -> Result<Self::Session, ConnectionError>;
}

/// Opens guarded sessions through a connector.
#[derive(Debug, Clone, Default)]
pub struct SessionManager<C> {
    connector: C,
}

impl<C: SessionConnector> SessionManager<C> {
    pub fn new(connector: C) -> Self {
        Self { connector }
    }

    pub async fn open(
        &self,
        host: &str,
        credentials: &Credentials,
        config: &StoreConfig,
    ) -> Result<SessionGuard<C::Session>, ConnectionError> {
        let target = ConnectionTarget::new(host, config);
        info!(
            endpoint = %target.endpoint,
            spn = %target.spn,
            username = %credentials.username,
            "opening remote session"
        );

        let session = self.connector.open(&target, credentials).await?;
        Ok(SessionGuard::new(target.host, session))
    }
}
