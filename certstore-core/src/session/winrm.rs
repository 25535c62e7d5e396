use async_trait::async_trait;
use tracing::debug;

use super::{CommandOutput, ConnectionTarget, RemoteCommand, RemoteSession, SessionConnector};
use crate::error::ConnectionError;
use crate::types::Credentials;
use crate::wsman::powershell::{decode_stderr, encode_command, encode_parameters, wrap_script};
use crate::wsman::{WinRmShell, WsmanClient};

/// Opens WinRS shells over WS-Management.
#[derive(Debug, Clone, Copy, Default)]
pub struct WinRmConnector;

#[async_trait]
impl SessionConnector for WinRmConnector {
    type Session = WinRmSession;

    async fn open(
        &self,
        target: &ConnectionTarget,
        credentials: &Credentials,
    ) -> Result<WinRmSession, ConnectionError> {
        let client = WsmanClient::new(target, credentials)?;
        let shell = WinRmShell::create(client).await?;
        Ok(WinRmSession { shell })
    }
}

/// A remote shell running PowerShell commands.
#[derive(Debug)]
pub struct WinRmSession {
    shell: WinRmShell,
}

#[async_trait]
impl RemoteSession for WinRmSession {
    async fn run(&mut self, command: &RemoteCommand) -> Result<CommandOutput, ConnectionError> {
        let command_line = encode_command(&wrap_script(command.script));
        let stdin = encode_parameters(&command.parameters);
        debug!(command = command.name, "running remote command");

        let output = self.shell.run(&command_line, &stdin).await?;
        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: decode_stderr(&output.stderr),
            exit_code: output.exit_code,
        })
    }

    async fn close(&mut self) -> Result<(), ConnectionError> {
        self.shell.close().await
    }

    fn is_open(&self) -> bool {
        self.shell.is_open()
    }
}
