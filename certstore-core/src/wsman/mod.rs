//! WS-Management transport for the WinRS remote shell
//!
//! Envelope construction, response parsing, HTTP authentication, message
//! sealing and the WinRS shell lifecycle used to run PowerShell on a Windows
//! host.

pub mod auth;
pub mod client;
pub mod envelope;
pub mod powershell;
pub mod response;
pub mod security;
pub mod shell;

pub use auth::HttpAuth;
pub use client::WsmanClient;
pub use envelope::Envelope;
pub use response::SoapFault;
pub use shell::WinRmShell;

pub(crate) const SOAP_ENV_NS: &str = "http://www.w3.org/2003/05/soap-envelope";
pub(crate) const WSA_NS: &str = "http://schemas.xmlsoap.org/ws/2004/08/addressing";
pub(crate) const WSMAN_NS: &str = "http://schemas.dmtf.org/wbem/wsman/1/wsman.xsd";
pub(crate) const SHELL_NS: &str = "http://schemas.microsoft.com/wbem/wsman/1/windows/shell";

pub(crate) const ANONYMOUS_ADDRESS: &str =
    "http://schemas.xmlsoap.org/ws/2004/08/addressing/role/anonymous";
pub(crate) const CMD_RESOURCE_URI: &str = "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/cmd";

pub(crate) const ACTION_CREATE: &str = "http://schemas.xmlsoap.org/ws/2004/09/transfer/Create";
pub(crate) const ACTION_DELETE: &str = "http://schemas.xmlsoap.org/ws/2004/09/transfer/Delete";
pub(crate) const ACTION_COMMAND: &str = "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/Command";
pub(crate) const ACTION_SEND: &str = "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/Send";
pub(crate) const ACTION_RECEIVE: &str = "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/Receive";
pub(crate) const ACTION_SIGNAL: &str = "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/Signal";

pub(crate) const SIGNAL_TERMINATE: &str =
    "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/signal/terminate";
