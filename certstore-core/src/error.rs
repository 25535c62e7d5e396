use std::time::Duration;

use thiserror::Error;

use crate::wsman::SoapFault;

pub type Result<T> = std::result::Result<T, Error>;

/// Top-level failure of a job. Every variant ends up as a `Failure` outcome.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid store configuration")]
    Configuration(#[from] ConfigError),

    #[error("remote session failed")]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("invalid job payload")]
    Payload(#[from] PayloadError),

    #[error("unexpected fault: {0}")]
    UnexpectedFault(String),
}

/// Malformed per-store configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("store properties are not valid JSON")]
    InvalidJson(#[source] serde_json::Error),

    #[error("store properties must be a JSON object, found {0}")]
    NotAnObject(&'static str),

    #[error("store property '{key}' expects {expected}, found {found}")]
    InvalidValue {
        key: String,
        expected: &'static str,
        found: String,
    },
}

/// Session establishment and transport failures.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("could not reach {endpoint}")]
    Unreachable {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("request to {endpoint} timed out after {timeout:?}")]
    Timeout { endpoint: String, timeout: Duration },

    #[error("HTTP exchange with {endpoint} failed")]
    Transport {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("authentication rejected by {endpoint} for principal {spn}")]
    AuthenticationRejected { endpoint: String, spn: String },

    #[error("authentication negotiation failed: {0}")]
    Negotiation(String),

    #[error("{endpoint} returned HTTP {status}")]
    HttpStatus {
        endpoint: String,
        status: u16,
        body: String,
    },

    #[error("WS-Management fault")]
    Fault(#[source] SoapFault),

    #[error("could not build request envelope: {0}")]
    Envelope(String),

    #[error("malformed WS-Management response: {0}")]
    MalformedResponse(String),

    #[error("remote session is already closed")]
    Closed,
}

impl ConnectionError {
    /// True when a Receive long-poll expired without output.
    pub fn is_operation_timeout(&self) -> bool {
        matches!(self, ConnectionError::Fault(fault) if fault.is_operation_timeout())
    }
}

/// The certificate store operation being performed, used in error context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOperation {
    List,
    Add,
    Remove,
}

impl std::fmt::Display for StoreOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let verb = match self {
            StoreOperation::List => "listing",
            StoreOperation::Add => "adding certificate to",
            StoreOperation::Remove => "removing certificate from",
        };
        f.write_str(verb)
    }
}

/// A failure reported by the remote side while executing a store script.
#[derive(Debug, Error)]
#[error("remote script exited with code {exit_code}: {detail}")]
pub struct RemoteScriptError {
    pub exit_code: i32,
    pub detail: String,
}

/// Store operation failures. Carries the store path and host for reporting.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("error {operation} {store} certificate store on {host}")]
    Remote {
        operation: StoreOperation,
        store: String,
        host: String,
        #[source]
        source: RemoteScriptError,
    },

    #[error("error {operation} {store} certificate store on {host}")]
    Transport {
        operation: StoreOperation,
        store: String,
        host: String,
        #[source]
        source: ConnectionError,
    },

    #[error("unreadable output while {operation} {store} certificate store on {host}: {detail}")]
    MalformedOutput {
        operation: StoreOperation,
        store: String,
        host: String,
        detail: String,
    },
}

/// Problems with caller-supplied job payloads, detected before any remote call.
#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("certificate contents are not valid base64")]
    Base64(#[source] base64::DecodeError),

    #[error("payload is neither a PKCS#12 archive nor an X.509 certificate")]
    Unrecognized(#[source] openssl::error::ErrorStack),

    #[error("PKCS#12 archive could not be opened with the supplied password")]
    Password(#[source] openssl::error::ErrorStack),

    #[error("PKCS#12 archive contains no certificate")]
    NoCertificate,

    #[error("could not compute certificate thumbprint")]
    Digest(#[source] openssl::error::ErrorStack),

    #[error("'{0}' is not a hexadecimal thumbprint")]
    Thumbprint(String),

    #[error("{operation} job is missing required field '{field}'")]
    MissingField {
        operation: &'static str,
        field: &'static str,
    },
}

/// Flatten an error and its source chain into one line, joined by " - ".
pub fn flatten_error(err: &(dyn std::error::Error + 'static)) -> String {
    let mut message = err.to_string();
    let mut current = err.source();
    while let Some(cause) = current {
        let text = cause.to_string();
        if !text.is_empty() {
            message.push_str(" - ");
            message.push_str(&text);
        }
        current = cause.source();
    }
    message
}
