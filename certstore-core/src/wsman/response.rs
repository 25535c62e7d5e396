use base64::prelude::*;
use quick_xml::de::from_str;
use serde::Deserialize;
use thiserror::Error;

use crate::error::ConnectionError;

/// WS-Management error code for an OperationTimeout expiring on Receive.
const WSMAN_OPERATION_TIMEOUT: &str = "2150858793";

/// A SOAP fault returned by the listener.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason}")]
pub struct SoapFault {
    /// SOAP fault code, e.g. `s:Receiver`.
    pub code: String,
    /// WS-Management subcode, e.g. `w:TimedOut`.
    pub subcode: Option<String>,
    pub reason: String,
    /// Numeric code from the WSManFault detail, when present.
    pub wsman_code: Option<String>,
}

impl SoapFault {
    pub fn is_operation_timeout(&self) -> bool {
        self.wsman_code.as_deref() == Some(WSMAN_OPERATION_TIMEOUT)
            || self
                .subcode
                .as_deref()
                .is_some_and(|s| s.rsplit(':').next() == Some("TimedOut"))
    }
}

/// Output gathered from one Receive response.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReceiveChunk {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub exit_code: Option<i32>,
    pub done: bool,
}

// Response documents are read with serde. Element and attribute names match
// on their local part, so the prefixes a listener picks do not matter.

#[derive(Debug, Deserialize)]
struct ResponseEnvelope {
    #[serde(rename = "Body", default)]
    body: ResponseBody,
}

#[derive(Debug, Default, Deserialize)]
struct ResponseBody {
    #[serde(rename = "Fault")]
    fault: Option<FaultElement>,
    #[serde(rename = "ResourceCreated")]
    resource_created: Option<ResourceCreated>,
    #[serde(rename = "Shell")]
    shell: Option<ShellElement>,
    #[serde(rename = "CommandResponse")]
    command_response: Option<CommandResponse>,
    #[serde(rename = "ReceiveResponse")]
    receive_response: Option<ReceiveResponse>,
}

#[derive(Debug, Deserialize)]
struct FaultElement {
    #[serde(rename = "Code")]
    code: Option<FaultCode>,
    #[serde(rename = "Reason")]
    reason: Option<FaultReason>,
    #[serde(rename = "Detail")]
    detail: Option<FaultDetail>,
}

#[derive(Debug, Deserialize)]
struct FaultCode {
    #[serde(rename = "Value", default)]
    value: String,
    #[serde(rename = "Subcode")]
    subcode: Option<FaultSubcode>,
}

#[derive(Debug, Deserialize)]
struct FaultSubcode {
    #[serde(rename = "Value", default)]
    value: String,
}

#[derive(Debug, Deserialize)]
struct FaultReason {
    #[serde(rename = "Text")]
    text: Option<TextElement>,
}

#[derive(Debug, Deserialize)]
struct FaultDetail {
    #[serde(rename = "WSManFault")]
    wsman_fault: Option<WsmanFault>,
}

#[derive(Debug, Deserialize)]
struct WsmanFault {
    #[serde(rename = "@Code")]
    code: Option<String>,
    #[serde(rename = "Message")]
    message: Option<TextElement>,
}

/// An element whose attributes are ignored and whose text is kept.
#[derive(Debug, Default, Deserialize)]
struct TextElement {
    #[serde(rename = "$text", default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct ResourceCreated {
    #[serde(rename = "ReferenceParameters")]
    reference_parameters: Option<ReferenceParameters>,
}

#[derive(Debug, Deserialize)]
struct ReferenceParameters {
    #[serde(rename = "SelectorSet")]
    selector_set: Option<SelectorSet>,
}

#[derive(Debug, Deserialize)]
struct SelectorSet {
    #[serde(rename = "Selector", default)]
    selectors: Vec<Selector>,
}

#[derive(Debug, Deserialize)]
struct Selector {
    #[serde(rename = "@Name")]
    name: Option<String>,
    #[serde(rename = "$text", default)]
    value: String,
}

#[derive(Debug, Deserialize)]
struct ShellElement {
    #[serde(rename = "ShellId")]
    shell_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CommandResponse {
    #[serde(rename = "CommandId")]
    command_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReceiveResponse {
    #[serde(rename = "Stream", default)]
    streams: Vec<StreamElement>,
    #[serde(rename = "CommandState")]
    command_state: Option<CommandState>,
}

#[derive(Debug, Deserialize)]
struct StreamElement {
    #[serde(rename = "@Name")]
    name: Option<String>,
    #[serde(rename = "$text", default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct CommandState {
    #[serde(rename = "@State", default)]
    state: String,
    #[serde(rename = "ExitCode")]
    exit_code: Option<String>,
}

fn body(xml: &str) -> Result<ResponseBody, ConnectionError> {
    from_str::<ResponseEnvelope>(xml)
        .map(|envelope| envelope.body)
        .map_err(|e| ConnectionError::MalformedResponse(e.to_string()))
}

fn non_empty(text: &str) -> Option<String> {
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

/// Extract a SOAP fault, if the document carries one.
pub fn fault(xml: &str) -> Option<SoapFault> {
    let fault = body(xml).ok()?.fault?;

    let (code, subcode) = match fault.code {
        Some(code) => (code.value.trim().to_string(), code.subcode.and_then(|s| non_empty(&s.value))),
        None => (String::new(), None),
    };
    let wsman_fault = fault.detail.and_then(|detail| detail.wsman_fault);
    let message = wsman_fault
        .as_ref()
        .and_then(|f| f.message.as_ref())
        .and_then(|m| non_empty(&m.text));
    let reason = fault
        .reason
        .and_then(|reason| reason.text)
        .and_then(|text| non_empty(&text.text))
        .or(message)
        .unwrap_or_else(|| "unspecified WS-Management fault".to_string());

    Some(SoapFault {
        code,
        subcode,
        reason,
        wsman_code: wsman_fault.and_then(|f| f.code),
    })
}

/// Shell id from a Create response.
pub fn shell_id(xml: &str) -> Result<String, ConnectionError> {
    let body = body(xml)?;
    let from_selector = body
        .resource_created
        .and_then(|created| created.reference_parameters)
        .and_then(|params| params.selector_set)
        .and_then(|set| {
            set.selectors
                .into_iter()
                .find(|selector| selector.name.as_deref() == Some("ShellId"))
        })
        .and_then(|selector| non_empty(&selector.value));

    from_selector
        .or_else(|| body.shell.and_then(|shell| shell.shell_id).and_then(|id| non_empty(&id)))
        .ok_or_else(|| ConnectionError::MalformedResponse("create response has no ShellId".to_string()))
}

/// Command id from a Command response.
pub fn command_id(xml: &str) -> Result<String, ConnectionError> {
    body(xml)?
        .command_response
        .and_then(|response| response.command_id)
        .and_then(|id| non_empty(&id))
        .ok_or_else(|| ConnectionError::MalformedResponse("command response has no CommandId".to_string()))
}

/// Decode streams and command state from a Receive response.
pub fn receive_chunk(xml: &str) -> Result<ReceiveChunk, ConnectionError> {
    let mut chunk = ReceiveChunk::default();
    let Some(response) = body(xml)?.receive_response else {
        return Err(ConnectionError::MalformedResponse(
            "receive response has no ReceiveResponse".to_string(),
        ));
    };

    for stream in &response.streams {
        let content = stream.content.trim();
        if content.is_empty() {
            continue;
        }
        let bytes = BASE64_STANDARD
            .decode(content)
            .map_err(|e| ConnectionError::MalformedResponse(format!("stream is not base64: {}", e)))?;
        match stream.name.as_deref() {
            Some("stderr") => chunk.stderr.extend_from_slice(&bytes),
            _ => chunk.stdout.extend_from_slice(&bytes),
        }
    }

    if let Some(state) = response.command_state {
        chunk.done = state.state.ends_with("/Done");
        if let Some(code) = state.exit_code {
            let code = code.trim();
            chunk.exit_code = Some(code.parse().map_err(|_| {
                ConnectionError::MalformedResponse(format!("invalid exit code '{}'", code))
            })?);
        }
    }

    Ok(chunk)
}
