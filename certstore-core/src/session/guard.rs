use tracing::{debug, warn};

use super::RemoteSession;
use crate::error::ConnectionError;

/// Owns an open session until it is explicitly closed.
///
/// Dropping a guard that still holds a session schedules the close on the
/// current Tokio runtime and logs a warning.
pub struct SessionGuard<S: RemoteSession + 'static> {
    host: String,
    session: Option<S>,
}

impl<S: RemoteSession + 'static> SessionGuard<S> {
    pub fn new(host: impl Into<String>, session: S) -> Self {
        Self {
            host: host.into(),
            session: Some(session),
        }
    }

    pub fn session(&mut self) -> Result<&mut S, ConnectionError> {
        self.session.as_mut().ok_or(ConnectionError::Closed)
    }

    pub async fn close(mut self) -> Result<(), ConnectionError> {
        match self.session.take() {
            Some(mut session) => {
                let result = session.close().await;
                debug!(host = %self.host, ok = result.is_ok(), "closed remote session");
                result
            }
            None => Ok(()),
        }
    }
}

impl<S: RemoteSession + 'static> Drop for SessionGuard<S> {
    fn drop(&mut self) {
        let Some(mut session) = self.session.take() else {
            return;
        };

        warn!(host = %self.host, "remote session dropped without close");
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let host = self.host.clone();
                handle.spawn(async move {
                    if let Err(e) = session.close().await {
                        warn!(host = %host, error = %e, "deferred session close failed");
                    }
                });
            }
            Err(_) => warn!(host = %self.host, "no runtime available, remote session left open"),
        }
    }
}

impl<S: RemoteSession + 'static> std::fmt::Debug for SessionGuard<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionGuard")
            .field("host", &self.host)
            .field("open", &self.session.is_some())
            .finish()
    }
}
