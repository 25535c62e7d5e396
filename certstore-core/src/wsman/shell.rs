use tracing::{debug, warn};

use super::client::WsmanClient;
use super::envelope::Envelope;
use super::response;
use crate::config::STDIN_CHUNK_SIZE;
use crate::error::ConnectionError;

/// Raw output of one shell command.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ShellOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub exit_code: i32,
}

/// A WinRS shell on a remote host. Deleting the shell ends the session.
#[derive(Debug)]
pub struct WinRmShell {
    client: WsmanClient,
    shell_id: Option<String>,
}

impl WinRmShell {
    pub async fn create(client: WsmanClient) -> Result<Self, ConnectionError> {
        let endpoint = client.endpoint().to_string();
        let xml = client.send(&Envelope::create_shell(&endpoint)).await?;
        let shell_id = response::shell_id(&xml)?;
        debug!(endpoint = %endpoint, shell_id = %shell_id, "created remote shell");

        Ok(Self {
            client,
            shell_id: Some(shell_id),
        })
    }

    pub fn is_open(&self) -> bool {
        self.shell_id.is_some()
    }

    /// Run `command_line`, feed it `stdin`, and wait for it to finish.
    pub async fn run(&self, command_line: &str, stdin: &[u8]) -> Result<ShellOutput, ConnectionError> {
        let shell_id = self.shell_id.as_deref().ok_or(ConnectionError::Closed)?;
        let endpoint = self.client.endpoint();

        let xml = self
            .client
            .send(&Envelope::command(endpoint, shell_id, command_line, !stdin.is_empty()))
            .await?;
        let command_id = response::command_id(&xml)?;
        debug!(shell_id = %shell_id, command_id = %command_id, "started remote command");

        let result = self.drive(shell_id, &command_id, stdin).await;

        if let Err(e) = self
            .client
            .send(&Envelope::signal_terminate(endpoint, shell_id, &command_id))
            .await
        {
            warn!(command_id = %command_id, error = %e, "failed to release remote command");
        }

        result
    }

    async fn drive(&self, shell_id: &str, command_id: &str, stdin: &[u8]) -> Result<ShellOutput, ConnectionError> {
        let endpoint = self.client.endpoint();

        let mut chunks = stdin.chunks(STDIN_CHUNK_SIZE).peekable();
        while let Some(chunk) = chunks.next() {
            let end = chunks.peek().is_none();
            self.client
                .send(&Envelope::send_stdin(endpoint, shell_id, command_id, chunk, end))
                .await?;
        }

        let mut output = ShellOutput::default();
        loop {
            let xml = match self
                .client
                .send(&Envelope::receive(endpoint, shell_id, command_id))
                .await
            {
                Ok(xml) => xml,
                // The long-poll expired with nothing to report
                Err(e) if e.is_operation_timeout() => continue,
                Err(e) => return Err(e),
            };

            let chunk = response::receive_chunk(&xml)?;
            output.stdout.extend_from_slice(&chunk.stdout);
            output.stderr.extend_from_slice(&chunk.stderr);
            if let Some(code) = chunk.exit_code {
                output.exit_code = code;
            }
            if chunk.done {
                return Ok(output);
            }
        }
    }

    /// Delete the shell. Calling this again after success does nothing.
    pub async fn close(&mut self) -> Result<(), ConnectionError> {
        let Some(shell_id) = self.shell_id.take() else {
            return Ok(());
        };

        let endpoint = self.client.endpoint().to_string();
        self.client
            .send(&Envelope::delete_shell(&endpoint, &shell_id))
            .await?;
        debug!(endpoint = %endpoint, shell_id = %shell_id, "deleted remote shell");
        Ok(())
    }
}
