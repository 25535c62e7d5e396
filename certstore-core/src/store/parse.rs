use base64::prelude::*;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::types::{CertificateEntry, Thumbprint};

/// Certificates from list output.
///
/// Accepts a single object, an array, `null` or no output at all. Entries
/// without a usable thumbprint are skipped; entries whose data cannot be
/// decoded are kept with empty data.
pub fn inventory(stdout: &str) -> Result<Vec<CertificateEntry>, String> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }

    let value: Value = serde_json::from_str(trimmed).map_err(|e| format!("list output is not JSON: {}", e))?;
    let rows = match value {
        Value::Null => Vec::new(),
        Value::Array(rows) => rows,
        Value::Object(_) => vec![value],
        other => return Err(format!("unexpected list output: {}", other)),
    };

    Ok(rows.iter().filter_map(entry).collect())
}

fn entry(row: &Value) -> Option<CertificateEntry> {
    let Value::Object(row) = row else {
        debug!("skipping non-object inventory row");
        return None;
    };

    let thumbprint = match field(row, "Thumbprint") {
        Some(Value::String(raw)) => match Thumbprint::parse(raw) {
            Ok(thumbprint) => thumbprint,
            Err(_) => {
                warn!(thumbprint = %raw, "skipping certificate with invalid thumbprint");
                return None;
            }
        },
        _ => {
            debug!("skipping certificate without thumbprint");
            return None;
        }
    };

    let raw_data = decode_raw_data(field(row, "RawData")).unwrap_or_else(|detail| {
        warn!(thumbprint = %thumbprint, detail, "keeping certificate without its encoded data");
        Vec::new()
    });

    let has_private_key = match field(row, "HasPrivateKey") {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
        _ => false,
    };

    Some(CertificateEntry {
        thumbprint,
        raw_data,
        has_private_key,
    })
}

/// DER bytes from a base64 string or a JSON byte array.
fn decode_raw_data(value: Option<&Value>) -> Result<Vec<u8>, &'static str> {
    match value {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::String(encoded)) => BASE64_STANDARD
            .decode(encoded.trim())
            .map_err(|_| "RawData is not base64"),
        Some(Value::Array(bytes)) => bytes
            .iter()
            .map(|b| b.as_u64().and_then(|b| u8::try_from(b).ok()))
            .collect::<Option<Vec<u8>>>()
            .ok_or("RawData is not a byte array"),
        Some(_) => Err("RawData has an unexpected type"),
    }
}

fn field<'a>(row: &'a Map<String, Value>, name: &str) -> Option<&'a Value> {
    row.get(name).or_else(|| {
        row.iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value)
    })
}

/// Thumbprint reported by the add script: its last non-empty output line.
pub fn added_thumbprint(stdout: &str) -> Option<Thumbprint> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .last()
        .and_then(|line| Thumbprint::parse(line).ok())
}

/// What the remove script did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct RemoveReport {
    #[serde(rename = "Removed")]
    pub removed: bool,
    #[serde(rename = "Matches")]
    pub matches: u32,
}

pub fn remove_report(stdout: &str) -> Result<RemoveReport, String> {
    serde_json::from_str(stdout.trim()).map_err(|e| format!("remove output is not a report: {}", e))
}
