//! PowerShell invocation over a cmd shell
//!
//! Scripts are fixed templates. Caller values never appear in the command
//! line: they are serialized to JSON, base64-encoded and written to stdin,
//! where a fixed prelude decodes them into `$Params`.

use base64::prelude::*;
use quick_xml::de::from_str;
use serde::Deserialize;

use super::auth::utf16le;

const CLIXML_MARKER: &str = "#< CLIXML";

/// Wrap a template in the parameter prelude and a terminating error handler.
///
/// Any terminating error is written to stderr as plain text and the process
/// exits with code 1. Empty stdin is such an error.
pub fn wrap_script(template: &str) -> String {
    format!(
        "$ErrorActionPreference = 'Stop'\r\n\
         $ProgressPreference = 'SilentlyContinue'\r\n\
         try {{\r\n\
         $raw = ($input | Out-String).Trim()\r\n\
         if (-not $raw) {{ throw 'no parameters received on stdin' }}\r\n\
         $Params = [Text.Encoding]::UTF8.GetString([Convert]::FromBase64String($raw)) | ConvertFrom-Json\r\n\
         {}\r\n\
         }} catch {{\r\n\
         [Console]::Error.WriteLine($_.Exception.Message)\r\n\
         exit 1\r\n\
         }}\r\n",
        template.trim()
    )
}

/// `powershell.exe` command line running `script` via `-EncodedCommand`.
pub fn encode_command(script: &str) -> String {
    format!(
        "powershell.exe -NoProfile -NonInteractive -ExecutionPolicy Bypass -EncodedCommand {}",
        BASE64_STANDARD.encode(utf16le(script))
    )
}

/// Stdin bytes carrying `parameters` to the prelude.
pub fn encode_parameters(parameters: &serde_json::Value) -> Vec<u8> {
    let json = parameters.to_string();
    let mut stdin = BASE64_STANDARD.encode(json.as_bytes()).into_bytes();
    stdin.extend_from_slice(b"\r\n");
    stdin
}

/// Decode stderr, unwrapping CLIXML error records into plain text.
pub fn decode_stderr(raw: &[u8]) -> String {
    let text = String::from_utf8_lossy(raw);
    let trimmed = text.trim();
    match trimmed.strip_prefix(CLIXML_MARKER) {
        Some(clixml) => decode_clixml(clixml.trim()).unwrap_or_else(|| trimmed.to_string()),
        None => trimmed.to_string(),
    }
}

/// Serialized PowerShell streams; only `<S S="Error">` records matter here.
#[derive(Debug, Deserialize)]
struct ClixmlObjects {
    #[serde(rename = "S", default)]
    strings: Vec<ClixmlString>,
}

#[derive(Debug, Deserialize)]
struct ClixmlString {
    #[serde(rename = "@S")]
    stream: Option<String>,
    #[serde(rename = "$text", default)]
    text: String,
}

/// Error-stream strings from a CLIXML document. `None` if it cannot be read.
fn decode_clixml(xml: &str) -> Option<String> {
    let objects: ClixmlObjects = from_str(xml).ok()?;
    let message: String = objects
        .strings
        .iter()
        .filter(|s| s.stream.as_deref() == Some("Error"))
        .map(|s| s.text.as_str())
        .collect();

    Some(unescape_clixml_text(&message).trim().to_string())
}

/// Replace `_xHHHH_` escapes with the characters they encode.
fn unescape_clixml_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(start) = rest.find("_x") {
        out.push_str(&rest[..start]);
        let candidate = &rest[start..];
        let decoded = candidate
            .get(2..6)
            .filter(|_| candidate.as_bytes().get(6) == Some(&b'_'))
            .and_then(|hex| u32::from_str_radix(hex, 16).ok())
            .and_then(char::from_u32);

        match decoded {
            Some(c) => {
                out.push(c);
                rest = &candidate[7..];
            }
            None => {
                out.push_str("_x");
                rest = &candidate[2..];
            }
        }
    }
    out.push_str(rest);
    out
}
