use std::time::Duration;

use serde_json::{Map, Value};
use tracing::debug;

use crate::error::ConfigError;

/// Authentication scheme used for the WinRM session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthScheme {
    /// NTLM through the `Negotiate` HTTP scheme.
    #[default]
    Negotiate,
    Basic,
}

/// Per-store behavioral flags, resolved once per job.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreConfig {
    /// Include the listener port in the SPN used for authentication.
    ///
    /// Some environments register the WinRM SPN without the port, in which
    /// case strict SPN matching fails unless this is left off.
    pub include_port_in_spn: bool,
    pub auth_scheme: AuthScheme,
    /// Per-request timeout. `None` waits indefinitely.
    pub timeout: Option<Duration>,
}

const KEY_SPN_WITH_PORT: &str = "spnwithport";
const KEY_AUTH_SCHEME: &str = "authscheme";
const KEY_TIMEOUT_SECONDS: &str = "timeoutseconds";

impl StoreConfig {
    /// Resolve store configuration from the raw store properties.
    ///
    /// Accepts a JSON object, a string holding a JSON object, or null. Keys
    /// are matched case-insensitively and unknown keys are ignored.
    pub fn resolve(raw: &Value) -> Result<Self, ConfigError> {
        match raw {
            Value::Null => Ok(Self::default()),
            Value::Object(map) => Self::from_map(map),
            Value::String(text) if text.trim().is_empty() => Ok(Self::default()),
            Value::String(text) => {
                let parsed: Value = serde_json::from_str(text).map_err(ConfigError::InvalidJson)?;
                match parsed {
                    Value::Object(map) => Self::from_map(&map),
                    Value::Null => Ok(Self::default()),
                    other => Err(ConfigError::NotAnObject(json_type(&other))),
                }
            }
            other => Err(ConfigError::NotAnObject(json_type(other))),
        }
    }

    fn from_map(map: &Map<String, Value>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        for (key, value) in map {
            match key.to_ascii_lowercase().as_str() {
                KEY_SPN_WITH_PORT => config.include_port_in_spn = read_bool(key, value)?,
                KEY_AUTH_SCHEME => config.auth_scheme = read_auth_scheme(key, value)?,
                KEY_TIMEOUT_SECONDS => config.timeout = read_timeout(key, value)?,
                _ => debug!(key = %key, "ignoring unrecognized store property"),
            }
        }

        Ok(config)
    }
}

fn read_bool(key: &str, value: &Value) -> Result<bool, ConfigError> {
    match value {
        Value::Null => Ok(false),
        Value::Bool(b) => Ok(*b),
        Value::String(s) if s.eq_ignore_ascii_case("true") => Ok(true),
        Value::String(s) if s.eq_ignore_ascii_case("false") || s.is_empty() => Ok(false),
        other => Err(invalid(key, "a boolean", other)),
    }
}

fn read_auth_scheme(key: &str, value: &Value) -> Result<AuthScheme, ConfigError> {
    match value {
        Value::Null => Ok(AuthScheme::default()),
        Value::String(s) => match s.to_ascii_lowercase().as_str() {
            "" | "negotiate" | "ntlm" => Ok(AuthScheme::Negotiate),
            "basic" => Ok(AuthScheme::Basic),
            _ => Err(invalid(key, "'negotiate' or 'basic'", value)),
        },
        other => Err(invalid(key, "'negotiate' or 'basic'", other)),
    }
}

fn read_timeout(key: &str, value: &Value) -> Result<Option<Duration>, ConfigError> {
    let seconds = match value {
        Value::Null => return Ok(None),
        Value::Number(n) => n.as_u64(),
        Value::String(s) if s.trim().is_empty() => return Ok(None),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    };

    match seconds {
        Some(0) => Ok(None),
        Some(secs) => Ok(Some(Duration::from_secs(secs))),
        None => Err(invalid(key, "a whole number of seconds", value)),
    }
}

fn invalid(key: &str, expected: &'static str, found: &Value) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        expected,
        found: found.to_string(),
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
