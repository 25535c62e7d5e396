use std::time::Duration;

use base64::prelude::*;
use reqwest::header::{HeaderMap, AUTHORIZATION, CONTENT_TYPE, WWW_AUTHENTICATE};
use reqwest::{Client, StatusCode};
use secrecy::ExposeSecret;
use tokio::sync::Mutex;
use tracing::{debug, trace};

use super::auth::{HttpAuth, NtlmAuthenticator};
use super::envelope::Envelope;
use super::response;
use super::security::{self, SessionSecurity, ENCRYPTED_CONTENT_TYPE};
use crate::config::{AuthScheme, AGENT_NAME, AGENT_VERSION};
use crate::error::ConnectionError;
use crate::session::ConnectionTarget;
use crate::types::Credentials;
use crate::utils::user_agent;

const SOAP_CONTENT_TYPE: &str = "application/soap+xml;charset=UTF-8";

/// Authenticated HTTP exchange with one WS-Management endpoint.
///
/// With NTLM the connection is authenticated once, on the first request, and
/// every envelope after that travels sealed. Requests are serialized because
/// sealing is sequenced.
#[derive(Debug)]
pub struct WsmanClient {
    http: Client,
    endpoint: String,
    auth: HttpAuth,
    timeout: Option<Duration>,
    security: Mutex<Option<SessionSecurity>>,
}

impl WsmanClient {
    pub fn new(target: &ConnectionTarget, credentials: &Credentials) -> Result<Self, ConnectionError> {
        // The NTLM context belongs to the TCP connection it was negotiated on
        let mut builder = Client::builder()
            .pool_max_idle_per_host(1)
            .user_agent(user_agent(AGENT_NAME, AGENT_VERSION));
        if let Some(timeout) = target.timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder.build().map_err(|source| ConnectionError::Transport {
            endpoint: target.endpoint.clone(),
            source,
        })?;

        let auth = match target.auth_scheme {
            AuthScheme::Negotiate => HttpAuth::ntlm(credentials, &target.spn),
            AuthScheme::Basic => HttpAuth::basic(credentials),
        };

        Ok(Self {
            http,
            endpoint: target.endpoint.clone(),
            auth,
            timeout: target.timeout,
            security: Mutex::new(None),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Post an envelope and return the response document.
    ///
    /// SOAP faults come back as `ConnectionError::Fault`.
    pub async fn send(&self, envelope: &Envelope<'_>) -> Result<String, ConnectionError> {
        let body = envelope.render()?;
        trace!(endpoint = %self.endpoint, action = envelope.action(), "sending WS-Management request");

        match &self.auth {
            HttpAuth::Basic { username, password } => {
                let response = self
                    .http
                    .post(&self.endpoint)
                    .basic_auth(username, Some(password.expose_secret()))
                    .header(CONTENT_TYPE, SOAP_CONTENT_TYPE)
                    .body(body)
                    .send()
                    .await
                    .map_err(|e| self.map_reqwest(e))?;

                let status = response.status();
                if status == StatusCode::UNAUTHORIZED {
                    return Err(self.rejected(""));
                }
                let text = response.text().await.map_err(|e| self.map_reqwest(e))?;
                self.check_response(status, text)
            }
            HttpAuth::Ntlm(ntlm) => self.send_sealed(ntlm, body).await,
        }
    }

    /// Seal `body` under the connection's NTLM context, authenticating first
    /// when there is none. A failed exchange discards the context.
    async fn send_sealed(&self, ntlm: &NtlmAuthenticator, body: String) -> Result<String, ConnectionError> {
        let mut slot = self.security.lock().await;
        let mut context = match slot.take() {
            Some(context) => context,
            None => self.authenticate(ntlm).await?,
        };

        let payload = context.encrypt_body(body.as_bytes())?;
        let response = self
            .http
            .post(&self.endpoint)
            .header(CONTENT_TYPE, ENCRYPTED_CONTENT_TYPE)
            .body(payload)
            .send()
            .await
            .map_err(|e| self.map_reqwest(e))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(self.rejected(ntlm.spn()));
        }
        let encrypted = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(security::is_encrypted);
        let bytes = response.bytes().await.map_err(|e| self.map_reqwest(e))?;

        let text = if encrypted {
            context.decrypt_body(&bytes)?
        } else {
            String::from_utf8_lossy(&bytes).into_owned()
        };
        *slot = Some(context);

        self.check_response(status, text)
    }

    /// NTLM handshake on empty requests. Returns the sealing state for the
    /// authenticated connection.
    async fn authenticate(&self, ntlm: &NtlmAuthenticator) -> Result<SessionSecurity, ConnectionError> {
        let negotiate = BASE64_STANDARD.encode(ntlm.negotiate_message());
        let response = self
            .http
            .post(&self.endpoint)
            .header(AUTHORIZATION, format!("Negotiate {}", negotiate))
            .body(Vec::<u8>::new())
            .send()
            .await
            .map_err(|e| self.map_reqwest(e))?;

        if response.status() != StatusCode::UNAUTHORIZED {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ConnectionError::HttpStatus {
                endpoint: self.endpoint.clone(),
                status,
                body,
            });
        }

        let challenge = negotiate_token(response.headers()).ok_or_else(|| self.rejected(ntlm.spn()))?;
        // Drain so the connection goes back to the pool
        let _ = response.bytes().await;
        debug!(endpoint = %self.endpoint, "received NTLM challenge");

        let (authenticate, security) = ntlm.authenticate_message(&challenge)?;
        let response = self
            .http
            .post(&self.endpoint)
            .header(AUTHORIZATION, format!("Negotiate {}", BASE64_STANDARD.encode(authenticate)))
            .body(Vec::<u8>::new())
            .send()
            .await
            .map_err(|e| self.map_reqwest(e))?;

        if response.status() == StatusCode::UNAUTHORIZED {
            return Err(self.rejected(ntlm.spn()));
        }
        let _ = response.bytes().await;
        debug!(endpoint = %self.endpoint, spn = ntlm.spn(), "authenticated NTLM session");

        Ok(security)
    }

    fn check_response(&self, status: StatusCode, text: String) -> Result<String, ConnectionError> {
        if let Some(fault) = response::fault(&text) {
            return Err(ConnectionError::Fault(fault));
        }
        if !status.is_success() {
            return Err(ConnectionError::HttpStatus {
                endpoint: self.endpoint.clone(),
                status: status.as_u16(),
                body: text,
            });
        }

        Ok(text)
    }

    fn rejected(&self, spn: &str) -> ConnectionError {
        ConnectionError::AuthenticationRejected {
            endpoint: self.endpoint.clone(),
            spn: spn.to_string(),
        }
    }

    fn map_reqwest(&self, source: reqwest::Error) -> ConnectionError {
        let endpoint = self.endpoint.clone();
        match self.timeout {
            Some(timeout) if source.is_timeout() => ConnectionError::Timeout { endpoint, timeout },
            _ if source.is_connect() => ConnectionError::Unreachable { endpoint, source },
            _ => ConnectionError::Transport { endpoint, source },
        }
    }
}

/// Token from a `WWW-Authenticate: Negotiate <base64>` header.
fn negotiate_token(headers: &HeaderMap) -> Option<Vec<u8>> {
    headers
        .get_all(WWW_AUTHENTICATE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .filter_map(|value| value.strip_prefix("Negotiate ").or_else(|| value.strip_prefix("NTLM ")))
        .find_map(|token| BASE64_STANDARD.decode(token.trim()).ok())
}
