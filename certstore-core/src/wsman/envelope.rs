use base64::prelude::*;
use quick_xml::se::to_string;
use serde::Serialize;
use uuid::Uuid;

use super::{
    ACTION_COMMAND, ACTION_CREATE, ACTION_DELETE, ACTION_RECEIVE, ACTION_SEND, ACTION_SIGNAL,
    ANONYMOUS_ADDRESS, CMD_RESOURCE_URI, SHELL_NS, SIGNAL_TERMINATE, SOAP_ENV_NS, WSA_NS, WSMAN_NS,
};
use crate::config::{MAX_ENVELOPE_SIZE, OPERATION_TIMEOUT, SHELL_CODEPAGE};
use crate::error::ConnectionError;

/// SOAP envelope for one WinRS request
#[derive(Debug, Serialize)]
#[serde(rename = "s:Envelope")]
pub struct Envelope<'a> {
    #[serde(rename = "@xmlns:s")]
    ns_soap: &'static str,
    #[serde(rename = "@xmlns:a")]
    ns_addressing: &'static str,
    #[serde(rename = "@xmlns:w")]
    ns_wsman: &'static str,
    #[serde(rename = "@xmlns:rsp")]
    ns_shell: &'static str,
    #[serde(rename = "s:Header")]
    header: Header<'a>,
    #[serde(rename = "s:Body")]
    body: Body<'a>,
}

#[derive(Debug, Serialize)]
struct Header<'a> {
    #[serde(rename = "a:To")]
    to: &'a str,
    #[serde(rename = "w:ResourceURI")]
    resource_uri: MustUnderstand<&'static str>,
    #[serde(rename = "a:ReplyTo")]
    reply_to: ReplyTo,
    #[serde(rename = "a:Action")]
    action: MustUnderstand<&'static str>,
    #[serde(rename = "a:MessageID")]
    message_id: String,
    #[serde(rename = "w:MaxEnvelopeSize")]
    max_envelope_size: MustUnderstand<u32>,
    #[serde(rename = "w:OperationTimeout")]
    operation_timeout: &'static str,
    #[serde(rename = "w:SelectorSet", skip_serializing_if = "Option::is_none")]
    selector_set: Option<SelectorSet<'a>>,
    #[serde(rename = "w:OptionSet", skip_serializing_if = "Option::is_none")]
    option_set: Option<OptionSet>,
}

#[derive(Debug, Serialize)]
struct MustUnderstand<T> {
    #[serde(rename = "@s:mustUnderstand")]
    must_understand: bool,
    #[serde(rename = "$text")]
    value: T,
}

impl<T> MustUnderstand<T> {
    fn new(value: T) -> Self {
        Self {
            must_understand: true,
            value,
        }
    }
}

#[derive(Debug, Serialize)]
struct ReplyTo {
    #[serde(rename = "a:Address")]
    address: MustUnderstand<&'static str>,
}

#[derive(Debug, Serialize)]
struct SelectorSet<'a> {
    #[serde(rename = "w:Selector")]
    selector: Selector<'a>,
}

#[derive(Debug, Serialize)]
struct Selector<'a> {
    #[serde(rename = "@Name")]
    name: &'static str,
    #[serde(rename = "$text")]
    value: &'a str,
}

#[derive(Debug, Serialize)]
struct OptionSet {
    #[serde(rename = "w:Option")]
    options: Vec<ShellOption>,
}

#[derive(Debug, Serialize)]
struct ShellOption {
    #[serde(rename = "@Name")]
    name: &'static str,
    #[serde(rename = "$text")]
    value: String,
}

#[derive(Debug, Default, Serialize)]
struct Body<'a> {
    #[serde(rename = "rsp:Shell", skip_serializing_if = "Option::is_none")]
    shell: Option<ShellBody>,
    #[serde(rename = "rsp:CommandLine", skip_serializing_if = "Option::is_none")]
    command_line: Option<CommandLine<'a>>,
    #[serde(rename = "rsp:Send", skip_serializing_if = "Option::is_none")]
    send: Option<SendBody<'a>>,
    #[serde(rename = "rsp:Receive", skip_serializing_if = "Option::is_none")]
    receive: Option<ReceiveBody<'a>>,
    #[serde(rename = "rsp:Signal", skip_serializing_if = "Option::is_none")]
    signal: Option<SignalBody<'a>>,
}

#[derive(Debug, Serialize)]
struct ShellBody {
    #[serde(rename = "rsp:InputStreams")]
    input_streams: &'static str,
    #[serde(rename = "rsp:OutputStreams")]
    output_streams: &'static str,
}

#[derive(Debug, Serialize)]
struct CommandLine<'a> {
    #[serde(rename = "rsp:Command")]
    command: &'a str,
}

#[derive(Debug, Serialize)]
struct SendBody<'a> {
    #[serde(rename = "rsp:Stream")]
    stream: InputStream<'a>,
}

#[derive(Debug, Serialize)]
struct InputStream<'a> {
    #[serde(rename = "@Name")]
    name: &'static str,
    #[serde(rename = "@CommandId")]
    command_id: &'a str,
    #[serde(rename = "@End", skip_serializing_if = "Option::is_none")]
    end: Option<bool>,
    #[serde(rename = "$text")]
    content: String,
}

#[derive(Debug, Serialize)]
struct ReceiveBody<'a> {
    #[serde(rename = "rsp:DesiredStream")]
    desired_stream: DesiredStream<'a>,
}

#[derive(Debug, Serialize)]
struct DesiredStream<'a> {
    #[serde(rename = "@CommandId")]
    command_id: &'a str,
    #[serde(rename = "$text")]
    streams: &'static str,
}

#[derive(Debug, Serialize)]
struct SignalBody<'a> {
    #[serde(rename = "@CommandId")]
    command_id: &'a str,
    #[serde(rename = "rsp:Code")]
    code: &'static str,
}

impl<'a> Envelope<'a> {
    fn new(to: &'a str, action: &'static str, shell_id: Option<&'a str>, body: Body<'a>) -> Self {
        Self {
            ns_soap: SOAP_ENV_NS,
            ns_addressing: WSA_NS,
            ns_wsman: WSMAN_NS,
            ns_shell: SHELL_NS,
            header: Header {
                to,
                resource_uri: MustUnderstand::new(CMD_RESOURCE_URI),
                reply_to: ReplyTo {
                    address: MustUnderstand::new(ANONYMOUS_ADDRESS),
                },
                action: MustUnderstand::new(action),
                message_id: format!("uuid:{}", Uuid::new_v4().to_string().to_uppercase()),
                max_envelope_size: MustUnderstand::new(MAX_ENVELOPE_SIZE),
                operation_timeout: OPERATION_TIMEOUT,
                selector_set: shell_id.map(|value| SelectorSet {
                    selector: Selector {
                        name: "ShellId",
                        value,
                    },
                }),
                option_set: None,
            },
            body,
        }
    }

    fn with_options(mut self, options: Vec<(&'static str, String)>) -> Self {
        self.header.option_set = Some(OptionSet {
            options: options
                .into_iter()
                .map(|(name, value)| ShellOption { name, value })
                .collect(),
        });
        self
    }

    /// Create a cmd shell with stdin and stdout/stderr streams.
    pub fn create_shell(to: &'a str) -> Self {
        let body = Body {
            shell: Some(ShellBody {
                input_streams: "stdin",
                output_streams: "stdout stderr",
            }),
            ..Body::default()
        };
        Self::new(to, ACTION_CREATE, None, body).with_options(vec![
            ("WINRS_NOPROFILE", "TRUE".to_string()),
            ("WINRS_CODEPAGE", SHELL_CODEPAGE.to_string()),
        ])
    }

    /// Start `command` in an existing shell.
    ///
    /// With `piped_stdin` the command reads a redirected stdin instead of a
    /// console handle, which is what `$input` needs to see the Send data.
    pub fn command(to: &'a str, shell_id: &'a str, command: &'a str, piped_stdin: bool) -> Self {
        let body = Body {
            command_line: Some(CommandLine { command }),
            ..Body::default()
        };
        Self::new(to, ACTION_COMMAND, Some(shell_id), body).with_options(vec![
            ("WINRS_CONSOLEMODE_STDIN", if piped_stdin { "FALSE" } else { "TRUE" }.to_string()),
            ("WINRS_SKIP_CMD_SHELL", "FALSE".to_string()),
        ])
    }

    /// Deliver a chunk of stdin to a running command.
    pub fn send_stdin(to: &'a str, shell_id: &'a str, command_id: &'a str, chunk: &[u8], end: bool) -> Self {
        let body = Body {
            send: Some(SendBody {
                stream: InputStream {
                    name: "stdin",
                    command_id,
                    end: end.then_some(true),
                    content: BASE64_STANDARD.encode(chunk),
                },
            }),
            ..Body::default()
        };
        Self::new(to, ACTION_SEND, Some(shell_id), body)
    }

    /// Poll for command output.
    pub fn receive(to: &'a str, shell_id: &'a str, command_id: &'a str) -> Self {
        let body = Body {
            receive: Some(ReceiveBody {
                desired_stream: DesiredStream {
                    command_id,
                    streams: "stdout stderr",
                },
            }),
            ..Body::default()
        };
        Self::new(to, ACTION_RECEIVE, Some(shell_id), body)
    }

    /// Terminate a command so the shell can release it.
    pub fn signal_terminate(to: &'a str, shell_id: &'a str, command_id: &'a str) -> Self {
        let body = Body {
            signal: Some(SignalBody {
                command_id,
                code: SIGNAL_TERMINATE,
            }),
            ..Body::default()
        };
        Self::new(to, ACTION_SIGNAL, Some(shell_id), body)
    }

    pub fn delete_shell(to: &'a str, shell_id: &'a str) -> Self {
        Self::new(to, ACTION_DELETE, Some(shell_id), Body::default())
    }

    pub fn action(&self) -> &'static str {
        self.header.action.value
    }

    /// Serialize to an XML document ready to post.
    pub fn render(&self) -> Result<String, ConnectionError> {
        let xml = to_string(self).map_err(|e| ConnectionError::Envelope(e.to_string()))?;
        Ok(format!(r#"<?xml version="1.0" encoding="UTF-8"?>{}"#, xml))
    }
}
