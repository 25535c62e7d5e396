//! WinRS shell lifecycle against a local HTTP listener that plays the
//! WS-Management side of the exchange.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use base64::prelude::*;
use certstore_core::error::ConnectionError;
use certstore_core::wsman::security::{SessionSecurity, ENCRYPTED_CONTENT_TYPE};
use certstore_core::wsman::shell::ShellOutput;
use certstore_core::wsman::{WinRmShell, WsmanClient};
use certstore_core::{AuthScheme, ConnectionTarget, Credentials, StoreConfig};
use hmac::{Hmac, Mac};
use md4::{Digest, Md4};
use rc4::consts::U16;
use rc4::{KeyInit, Rc4, StreamCipher};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

const ENVELOPE_OPEN: &str = r#"<s:Envelope xmlns:s="http://www.w3.org/2003/05/soap-envelope" xmlns:w="http://schemas.dmtf.org/wbem/wsman/1/wsman.xsd" xmlns:rsp="http://schemas.microsoft.com/wbem/wsman/1/windows/shell"><s:Body>"#;
const ENVELOPE_CLOSE: &str = "</s:Body></s:Envelope>";

fn soap_body(inner: &str) -> String {
    format!("{}{}{}", ENVELOPE_OPEN, inner, ENVELOPE_CLOSE)
}

fn created() -> String {
    soap_body("<rsp:Shell><rsp:ShellId>S1</rsp:ShellId></rsp:Shell>")
}

fn command_started() -> String {
    soap_body("<rsp:CommandResponse><rsp:CommandId>C1</rsp:CommandId></rsp:CommandResponse>")
}

fn received(streams: &[(&str, &str)], state: &str, exit_code: Option<i32>) -> String {
    let mut inner = String::from("<rsp:ReceiveResponse>");
    for (name, text) in streams {
        inner.push_str(&format!(
            r#"<rsp:Stream Name="{}" CommandId="C1">{}</rsp:Stream>"#,
            name,
            BASE64_STANDARD.encode(text)
        ));
    }
    inner.push_str(&format!(
        r#"<rsp:CommandState CommandId="C1" State="http://schemas.microsoft.com/wbem/wsman/1/windows/shell/CommandState/{}">"#,
        state
    ));
    if let Some(code) = exit_code {
        inner.push_str(&format!("<rsp:ExitCode>{}</rsp:ExitCode>", code));
    }
    inner.push_str("</rsp:CommandState></rsp:ReceiveResponse>");
    soap_body(&inner)
}

fn fault(subcode: &str, wsman_code: &str, reason: &str) -> String {
    soap_body(&format!(
        r#"<s:Fault><s:Code><s:Value>s:Receiver</s:Value><s:Subcode><s:Value>{}</s:Value></s:Subcode></s:Code><s:Reason><s:Text xml:lang="">{}</s:Text></s:Reason><s:Detail><f:WSManFault xmlns:f="http://schemas.microsoft.com/wbem/wsman/1/wsmanfault" Code="{}" Machine="h1"><f:Message/></f:WSManFault></s:Detail></s:Fault>"#,
        subcode, reason, wsman_code
    ))
}

fn timed_out() -> String {
    fault(
        "w:TimedOut",
        "2150858793",
        "The WS-Management service cannot complete the operation within the time specified in OperationTimeout.",
    )
}

/// One request as seen by the listener.
#[derive(Debug, Clone)]
struct Request {
    authorization: Option<String>,
    content_type: Option<String>,
    body: Vec<u8>,
}

impl Request {
    fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    fn action(&self) -> Option<String> {
        action_of(&self.text())
    }
}

/// Last path segment of the WS-Addressing action, e.g. `Receive`.
fn action_of(xml: &str) -> Option<String> {
    let rest = &xml[xml.find("<a:Action")?..];
    let open = rest.find('>')? + 1;
    let close = rest.find("</a:Action>")?;
    rest[open..close].rsplit('/').next().map(str::to_string)
}

struct Reply {
    status: u16,
    headers: Vec<(&'static str, String)>,
    body: Vec<u8>,
}

impl Reply {
    fn soap(status: u16, xml: &str) -> Self {
        Self {
            status,
            headers: vec![("Content-Type", "application/soap+xml;charset=UTF-8".to_string())],
            body: xml.as_bytes().to_vec(),
        }
    }

    fn empty(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    fn unauthorized(www_authenticate: &str) -> Self {
        Self {
            status: 401,
            headers: vec![("WWW-Authenticate", www_authenticate.to_string())],
            body: Vec::new(),
        }
    }

    fn encode(&self) -> Vec<u8> {
        let reason = match self.status {
            200 => "OK",
            401 => "Unauthorized",
            _ => "Internal Server Error",
        };
        let mut head = format!(
            "HTTP/1.1 {} {}\r\nContent-Length: {}\r\n",
            self.status,
            reason,
            self.body.len()
        );
        for (name, value) in &self.headers {
            head.push_str(&format!("{}: {}\r\n", name, value));
        }
        head.push_str("\r\n");

        let mut out = head.into_bytes();
        out.extend_from_slice(&self.body);
        out
    }
}

type Handler = Box<dyn FnMut(&Request) -> Reply + Send>;

/// Keep-alive HTTP listener answering every request through one handler.
struct FakeListener {
    endpoint: String,
    requests: Arc<Mutex<Vec<Request>>>,
}

impl FakeListener {
    async fn start(handler: impl FnMut(&Request) -> Reply + Send + 'static) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = format!("http://{}/wsman", listener.local_addr().unwrap());
        let requests = Arc::new(Mutex::new(Vec::new()));
        let handler: Arc<Mutex<Handler>> = Arc::new(Mutex::new(Box::new(handler)));

        let log = requests.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(serve(stream, handler.clone(), log.clone()));
            }
        });

        Self { endpoint, requests }
    }

    /// Answers requests with `replies` in order.
    async fn scripted(replies: Vec<Reply>) -> Self {
        let mut replies = VecDeque::from(replies);
        Self::start(move |_| replies.pop_front().unwrap_or_else(|| Reply::empty(500))).await
    }

    fn requests(&self) -> Vec<Request> {
        self.requests.lock().unwrap().clone()
    }

    fn actions(&self) -> Vec<String> {
        self.requests().iter().filter_map(Request::action).collect()
    }

    fn target(&self, auth_scheme: AuthScheme) -> ConnectionTarget {
        let config = StoreConfig {
            auth_scheme,
            ..StoreConfig::default()
        };
        let mut target = ConnectionTarget::new("h1", &config);
        target.endpoint = self.endpoint.clone();
        target
    }

    fn client(&self, auth_scheme: AuthScheme) -> WsmanClient {
        WsmanClient::new(&self.target(auth_scheme), &Credentials::new("CORP\\svc", "Password1")).unwrap()
    }
}

async fn serve(mut stream: TcpStream, handler: Arc<Mutex<Handler>>, log: Arc<Mutex<Vec<Request>>>) {
    let mut buffer = Vec::new();
    while let Some(request) = read_request(&mut stream, &mut buffer).await {
        log.lock().unwrap().push(request.clone());
        let reply = {
            let mut handler = handler.lock().unwrap();
            (&mut *handler)(&request)
        };
        if stream.write_all(&reply.encode()).await.is_err() {
            return;
        }
    }
}

async fn read_request(stream: &mut TcpStream, buffer: &mut Vec<u8>) -> Option<Request> {
    let header_end = loop {
        if let Some(at) = find(buffer, b"\r\n\r\n") {
            break at + 4;
        }
        fill(stream, buffer).await?;
    };

    let head = String::from_utf8_lossy(&buffer[..header_end]).into_owned();
    let header = |name: &str| {
        head.lines()
            .skip(1)
            .filter_map(|line| line.split_once(':'))
            .find(|(key, _)| key.trim().eq_ignore_ascii_case(name))
            .map(|(_, value)| value.trim().to_string())
    };
    let length: usize = header("content-length").and_then(|v| v.parse().ok()).unwrap_or(0);

    while buffer.len() < header_end + length {
        fill(stream, buffer).await?;
    }

    let request = Request {
        authorization: header("authorization"),
        content_type: header("content-type"),
        body: buffer[header_end..header_end + length].to_vec(),
    };
    buffer.drain(..header_end + length);
    Some(request)
}

async fn fill(stream: &mut TcpStream, buffer: &mut Vec<u8>) -> Option<()> {
    let mut chunk = [0u8; 4096];
    let n = stream.read(&mut chunk).await.ok()?;
    if n == 0 {
        return None;
    }
    buffer.extend_from_slice(&chunk[..n]);
    Some(())
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|window| window == needle)
}

#[tokio::test]
async fn runs_a_command_through_the_shell_lifecycle() {
    let listener = FakeListener::scripted(vec![
        Reply::soap(200, &created()),
        Reply::soap(200, &command_started()),
        Reply::soap(200, &soap_body("<rsp:SendResponse/>")),
        Reply::soap(500, &timed_out()),
        Reply::soap(200, &received(&[("stdout", "hello ")], "Running", None)),
        Reply::soap(200, &received(&[("stdout", "world"), ("stderr", "oops")], "Done", Some(3))),
        Reply::soap(200, &soap_body("<rsp:SignalResponse/>")),
        Reply::soap(200, &soap_body("")),
    ])
    .await;

    let mut shell = WinRmShell::create(listener.client(AuthScheme::Basic)).await.unwrap();
    let stdin = br#"{"StorePath":"My"}"#;
    let output = shell.run("powershell.exe -EncodedCommand AAAA", stdin).await.unwrap();
    shell.close().await.unwrap();

    assert_eq!(
        output,
        ShellOutput {
            stdout: b"hello world".to_vec(),
            stderr: b"oops".to_vec(),
            exit_code: 3,
        }
    );
    assert_eq!(
        listener.actions(),
        ["Create", "Command", "Send", "Receive", "Receive", "Receive", "Signal", "Delete"]
    );

    let requests = listener.requests();
    assert!(requests
        .iter()
        .all(|r| r.authorization.as_deref().is_some_and(|a| a.starts_with("Basic "))));
    assert!(requests[1]
        .text()
        .contains(r#"<w:Option Name="WINRS_CONSOLEMODE_STDIN">FALSE</w:Option>"#));
    assert!(requests[2].text().contains(&BASE64_STANDARD.encode(stdin)));
    assert!(requests[6].text().contains("signal/terminate"));
    assert!(!shell.is_open());
}

#[tokio::test]
async fn closing_twice_deletes_the_shell_once() {
    let listener =
        FakeListener::scripted(vec![Reply::soap(200, &created()), Reply::soap(200, &soap_body(""))]).await;

    let mut shell = WinRmShell::create(listener.client(AuthScheme::Basic)).await.unwrap();
    shell.close().await.unwrap();
    shell.close().await.unwrap();

    assert_eq!(listener.actions(), ["Create", "Delete"]);
    assert!(matches!(
        shell.run("cmd", b"").await,
        Err(ConnectionError::Closed)
    ));
}

#[tokio::test]
async fn command_fault_is_reported_without_signalling() {
    let listener = FakeListener::scripted(vec![
        Reply::soap(200, &created()),
        Reply::soap(500, &fault("w:AccessDenied", "5", "Access is denied.")),
    ])
    .await;

    let shell = WinRmShell::create(listener.client(AuthScheme::Basic)).await.unwrap();
    match shell.run("cmd", b"").await {
        Err(ConnectionError::Fault(fault)) => {
            assert_eq!(fault.subcode.as_deref(), Some("w:AccessDenied"));
            assert_eq!(fault.reason, "Access is denied.");
            assert!(!fault.is_operation_timeout());
        }
        other => panic!("expected a fault, got {:?}", other),
    }
    assert_eq!(listener.actions(), ["Create", "Command"]);
}

#[tokio::test]
async fn rejected_basic_credentials() {
    let listener = FakeListener::scripted(vec![Reply::unauthorized("Basic realm=\"WSMAN\"")]).await;

    let err = WinRmShell::create(listener.client(AuthScheme::Basic)).await.unwrap_err();
    assert!(matches!(err, ConnectionError::AuthenticationRejected { .. }));
}

#[tokio::test]
async fn negotiate_offer_without_a_challenge_is_rejected() {
    let listener = FakeListener::scripted(vec![Reply::unauthorized("Negotiate")]).await;

    let err = WinRmShell::create(listener.client(AuthScheme::Negotiate)).await.unwrap_err();
    match err {
        ConnectionError::AuthenticationRejected { spn, .. } => assert_eq!(spn, "HTTP/h1"),
        other => panic!("expected rejection, got {:?}", other),
    }

    let requests = listener.requests();
    assert_eq!(requests.len(), 1);
    assert!(requests[0]
        .authorization
        .as_deref()
        .is_some_and(|a| a.starts_with("Negotiate TlRMTVNTUAAB")));
}

const NEGOTIATE_UNICODE: u32 = 0x0000_0001;
const NEGOTIATE_SIGN: u32 = 0x0000_0010;
const NEGOTIATE_SEAL: u32 = 0x0000_0020;
const NEGOTIATE_NTLM: u32 = 0x0000_0200;
const NEGOTIATE_EXTENDED_SESSIONSECURITY: u32 = 0x0008_0000;
const NEGOTIATE_TARGET_INFO: u32 = 0x0080_0000;
const NEGOTIATE_128: u32 = 0x2000_0000;
const NEGOTIATE_KEY_EXCH: u32 = 0x4000_0000;

const LISTENER_FLAGS: u32 = NEGOTIATE_UNICODE
    | NEGOTIATE_SIGN
    | NEGOTIATE_SEAL
    | NEGOTIATE_NTLM
    | NEGOTIATE_EXTENDED_SESSIONSECURITY
    | NEGOTIATE_TARGET_INFO
    | NEGOTIATE_128
    | NEGOTIATE_KEY_EXCH;

fn challenge_header() -> String {
    let mut target_info = Vec::new();
    target_info.extend_from_slice(&7u16.to_le_bytes());
    target_info.extend_from_slice(&8u16.to_le_bytes());
    target_info.extend_from_slice(&0x01D0_0000_0000_0000u64.to_le_bytes());
    target_info.extend_from_slice(&[0u8; 4]);

    let mut msg = b"NTLMSSP\0".to_vec();
    msg.extend_from_slice(&2u32.to_le_bytes());
    msg.extend_from_slice(&[0, 0, 0, 0, 48, 0, 0, 0]);
    msg.extend_from_slice(&LISTENER_FLAGS.to_le_bytes());
    msg.extend_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);
    msg.extend_from_slice(&[0u8; 8]);
    let len = target_info.len() as u16;
    msg.extend_from_slice(&len.to_le_bytes());
    msg.extend_from_slice(&len.to_le_bytes());
    msg.extend_from_slice(&48u32.to_le_bytes());
    msg.extend_from_slice(&target_info);

    format!("Negotiate {}", BASE64_STANDARD.encode(msg))
}

fn utf16le(text: &str) -> Vec<u8> {
    text.encode_utf16().flat_map(|c| c.to_le_bytes()).collect()
}

fn hmac_md5(key: &[u8], data: &[u8]) -> [u8; 16] {
    let mut mac = <Hmac::<md5::Md5> as Mac>::new_from_slice(key).unwrap();
    mac.update(data);
    mac.finalize().into_bytes().into()
}

fn u32_at(bytes: &[u8], offset: usize) -> usize {
    u32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap()) as usize
}

/// Session key the listener recovers from an AUTHENTICATE message for
/// `CORP\svc` / `Password1`.
fn recover_session_key(authenticate: &[u8]) -> [u8; 16] {
    let nt_hash = Md4::digest(utf16le("Password1"));
    let response_key = hmac_md5(&nt_hash, &utf16le("SVCCORP"));

    let nt_offset = u32_at(authenticate, 24);
    let base_key = hmac_md5(&response_key, &authenticate[nt_offset..nt_offset + 16]);

    let key_offset = u32_at(authenticate, 56);
    let mut key = [0u8; 16];
    key.copy_from_slice(&authenticate[key_offset..key_offset + 16]);
    Rc4::<U16>::new((&base_key).into()).apply_keystream(&mut key);
    key
}

#[tokio::test]
async fn negotiate_seals_every_envelope_after_the_handshake() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = seen.clone();
    let mut security: Option<SessionSecurity> = None;

    let listener = FakeListener::start(move |request| {
        if let Some(token) = request.authorization.as_deref().and_then(|a| a.strip_prefix("Negotiate ")) {
            let message = BASE64_STANDARD.decode(token).unwrap();
            return match message[8] {
                1 => Reply::unauthorized(&challenge_header()),
                _ => {
                    security = Some(SessionSecurity::server(&recover_session_key(&message), true));
                    Reply::empty(200)
                }
            };
        }

        let Some(server) = security.as_mut() else {
            return Reply::empty(401);
        };
        assert!(request.content_type.as_deref().is_some_and(|c| c.starts_with("multipart/encrypted")));
        let xml = server.decrypt_body(&request.body).unwrap();
        let action = action_of(&xml).unwrap_or_default();
        log.lock().unwrap().push(action.clone());

        let reply = match action.as_str() {
            "Create" => created(),
            _ => soap_body(""),
        };
        Reply {
            status: 200,
            headers: vec![("Content-Type", ENCRYPTED_CONTENT_TYPE.to_string())],
            body: server.encrypt_body(reply.as_bytes()).unwrap(),
        }
    })
    .await;

    let mut shell = WinRmShell::create(listener.client(AuthScheme::Negotiate)).await.unwrap();
    shell.close().await.unwrap();

    assert_eq!(*seen.lock().unwrap(), ["Create", "Delete"]);

    let requests = listener.requests();
    assert_eq!(requests.len(), 4);
    assert!(requests[..2].iter().all(|r| r.body.is_empty()));
    assert!(requests[2..].iter().all(|r| r.authorization.is_none()));
    assert!(requests[2..].iter().all(|r| !r.text().contains("Envelope")));
}

#[tokio::test]
async fn rejected_authenticate_message() {
    let listener = FakeListener::start(|request| {
        let token = request
            .authorization
            .as_deref()
            .and_then(|a| a.strip_prefix("Negotiate "))
            .map(|t| BASE64_STANDARD.decode(t).unwrap())
            .unwrap_or_default();
        match token.get(8) {
            Some(1) => Reply::unauthorized(&challenge_header()),
            _ => Reply::unauthorized("Negotiate"),
        }
    })
    .await;

    let err = WinRmShell::create(listener.client(AuthScheme::Negotiate)).await.unwrap_err();
    assert!(matches!(err, ConnectionError::AuthenticationRejected { .. }));
    assert_eq!(listener.requests().len(), 2);
}
