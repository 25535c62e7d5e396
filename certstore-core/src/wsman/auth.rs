//! HTTP authentication for the WinRM listener
//!
//! Basic and NTLMv2 over the `Negotiate` scheme. The NTLM AUTHENTICATE message
//! names the target SPN (`MsvAvTargetName`) so listeners enforcing SPN
//! matching see the principal composed for the session. A completed NTLM
//! handshake yields the [`SessionSecurity`] that seals every later message.

use hmac::{Hmac, Mac};
use md4::{Digest, Md4};
use secrecy::{ExposeSecret, SecretString};

use rc4::consts::U16;
use rc4::{KeyInit, Rc4, StreamCipher};

use super::security::SessionSecurity;
use crate::error::ConnectionError;
use crate::types::Credentials;
use crate::utils::windows_filetime_now;

type HmacMd5 = Hmac<md5::Md5>;

const NTLMSSP_SIGNATURE: &[u8; 8] = b"NTLMSSP\0";

const NEGOTIATE_UNICODE: u32 = 0x0000_0001;
const REQUEST_TARGET: u32 = 0x0000_0004;
const NEGOTIATE_SIGN: u32 = 0x0000_0010;
const NEGOTIATE_SEAL: u32 = 0x0000_0020;
const NEGOTIATE_NTLM: u32 = 0x0000_0200;
const NEGOTIATE_ALWAYS_SIGN: u32 = 0x0000_8000;
const NEGOTIATE_EXTENDED_SESSIONSECURITY: u32 = 0x0008_0000;
const NEGOTIATE_TARGET_INFO: u32 = 0x0080_0000;
const NEGOTIATE_128: u32 = 0x2000_0000;
const NEGOTIATE_KEY_EXCH: u32 = 0x4000_0000;
const NEGOTIATE_56: u32 = 0x8000_0000;

const NEGOTIATE_FLAGS: u32 = NEGOTIATE_UNICODE
    | REQUEST_TARGET
    | NEGOTIATE_SIGN
    | NEGOTIATE_SEAL
    | NEGOTIATE_NTLM
    | NEGOTIATE_ALWAYS_SIGN
    | NEGOTIATE_EXTENDED_SESSIONSECURITY
    | NEGOTIATE_TARGET_INFO
    | NEGOTIATE_128
    | NEGOTIATE_KEY_EXCH
    | NEGOTIATE_56;

/// Flags the listener must agree to before messages can be sealed.
const REQUIRED_FLAGS: u32 = NEGOTIATE_SIGN | NEGOTIATE_SEAL | NEGOTIATE_EXTENDED_SESSIONSECURITY | NEGOTIATE_128;

const AV_EOL: u16 = 0;
const AV_TIMESTAMP: u16 = 7;
const AV_TARGET_NAME: u16 = 9;

/// How requests to the listener are authenticated.
#[derive(Debug, Clone)]
pub enum HttpAuth {
    Basic {
        username: String,
        password: SecretString,
    },
    Ntlm(NtlmAuthenticator),
}

impl HttpAuth {
    pub fn basic(credentials: &Credentials) -> Self {
        HttpAuth::Basic {
            username: credentials.username.clone(),
            password: credentials.password.clone(),
        }
    }

    pub fn ntlm(credentials: &Credentials, spn: &str) -> Self {
        HttpAuth::Ntlm(NtlmAuthenticator::new(credentials, spn))
    }
}

/// NTLMv2 message builder bound to one principal and target SPN.
#[derive(Debug, Clone)]
pub struct NtlmAuthenticator {
    username: String,
    domain: String,
    password: SecretString,
    workstation: String,
    spn: String,
}

/// Fields of a CHALLENGE message needed to answer it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NtlmChallenge {
    pub flags: u32,
    pub server_challenge: [u8; 8],
    pub target_info: Vec<(u16, Vec<u8>)>,
}

impl NtlmChallenge {
    pub fn parse(message: &[u8]) -> Result<Self, ConnectionError> {
        if message.len() < 32 || &message[..8] != NTLMSSP_SIGNATURE {
            return Err(ConnectionError::Negotiation("not an NTLMSSP message".to_string()));
        }
        if read_u32(message, 8) != Some(2) {
            return Err(ConnectionError::Negotiation("expected an NTLM CHALLENGE message".to_string()));
        }

        let flags = read_u32(message, 20).unwrap_or_default();
        let mut server_challenge = [0u8; 8];
        server_challenge.copy_from_slice(&message[24..32]);

        let target_info = match (read_u16(message, 40), read_u32(message, 44)) {
            (Some(len), Some(offset)) if len > 0 => {
                let start = offset as usize;
                let end = start + len as usize;
                let block = message.get(start..end).ok_or_else(|| {
                    ConnectionError::Negotiation("target info lies outside the challenge".to_string())
                })?;
                parse_av_pairs(block)?
            }
            _ => Vec::new(),
        };

        Ok(Self {
            flags,
            server_challenge,
            target_info,
        })
    }

    fn av_value(&self, id: u16) -> Option<&[u8]> {
        self.target_info
            .iter()
            .find(|(av_id, _)| *av_id == id)
            .map(|(_, value)| value.as_slice())
    }
}

impl NtlmAuthenticator {
    /// Accepts `DOMAIN\user`, `user@domain` (sent as-is) or a bare user name.
    pub fn new(credentials: &Credentials, spn: &str) -> Self {
        let (domain, username) = match credentials.username.split_once('\\') {
            Some((domain, user)) => (domain.to_string(), user.to_string()),
            None => (String::new(), credentials.username.clone()),
        };

        let workstation = std::env::var("COMPUTERNAME")
            .or_else(|_| std::env::var("HOSTNAME"))
            .unwrap_or_default()
            .to_uppercase();

        Self {
            username,
            domain,
            password: credentials.password.clone(),
            workstation,
            spn: spn.to_string(),
        }
    }

    pub fn spn(&self) -> &str {
        &self.spn
    }

    /// NEGOTIATE (type 1) message.
    pub fn negotiate_message(&self) -> Vec<u8> {
        let mut message = NTLMSSP_SIGNATURE.to_vec();
        message.extend_from_slice(&1u32.to_le_bytes());
        message.extend_from_slice(&NEGOTIATE_FLAGS.to_le_bytes());
        // Domain and workstation are supplied in the AUTHENTICATE message instead
        message.extend_from_slice(&[0u8; 16]);
        message
    }

    /// AUTHENTICATE (type 3) message answering `challenge`, and the sealing
    /// state for the messages that follow it.
    pub fn authenticate_message(&self, challenge: &[u8]) -> Result<(Vec<u8>, SessionSecurity), ConnectionError> {
        let challenge = NtlmChallenge::parse(challenge)?;
        let client_challenge: [u8; 8] = rand::random();
        let exported_key: [u8; 16] = rand::random();
        let timestamp = challenge
            .av_value(AV_TIMESTAMP)
            .and_then(|v| v.try_into().ok())
            .map(u64::from_le_bytes)
            .unwrap_or_else(windows_filetime_now);

        self.authenticate_with(&challenge, client_challenge, timestamp, exported_key)
    }

    fn authenticate_with(
        &self,
        challenge: &NtlmChallenge,
        client_challenge: [u8; 8],
        timestamp: u64,
        exported_key: [u8; 16],
    ) -> Result<(Vec<u8>, SessionSecurity), ConnectionError> {
        let flags = NEGOTIATE_FLAGS & (challenge.flags | NEGOTIATE_UNICODE);
        if flags & REQUIRED_FLAGS != REQUIRED_FLAGS {
            return Err(ConnectionError::Negotiation(format!(
                "listener did not agree to message sealing (flags {:#010x})",
                challenge.flags
            )));
        }

        let response_key = self.ntowf_v2()?;
        let target_info = self.response_target_info(challenge);

        let mut temp = vec![0x01, 0x01, 0, 0, 0, 0, 0, 0];
        temp.extend_from_slice(&timestamp.to_le_bytes());
        temp.extend_from_slice(&client_challenge);
        temp.extend_from_slice(&[0u8; 4]);
        temp.extend_from_slice(&target_info);
        temp.extend_from_slice(&[0u8; 4]);

        let mut proof_input = challenge.server_challenge.to_vec();
        proof_input.extend_from_slice(&temp);
        let nt_proof = hmac_md5(&response_key, &proof_input)?;

        let mut nt_response = nt_proof.to_vec();
        nt_response.extend_from_slice(&temp);

        let session_base_key = hmac_md5(&response_key, &nt_proof)?;
        let key_exchange = flags & NEGOTIATE_KEY_EXCH != 0;
        let (session_key, encrypted_session_key) = if key_exchange {
            let mut encrypted = exported_key;
            Rc4::<U16>::new((&session_base_key).into()).apply_keystream(&mut encrypted);
            (exported_key, encrypted.to_vec())
        } else {
            (session_base_key, Vec::new())
        };

        let lm_response = if challenge.av_value(AV_TIMESTAMP).is_some() {
            vec![0u8; 24]
        } else {
            let mut input = challenge.server_challenge.to_vec();
            input.extend_from_slice(&client_challenge);
            let mut lm = hmac_md5(&response_key, &input)?.to_vec();
            lm.extend_from_slice(&client_challenge);
            lm
        };

        let domain = utf16le(&self.domain);
        let user = utf16le(&self.username);
        let workstation = utf16le(&self.workstation);

        const HEADER_LEN: u32 = 64;
        let mut payload = Vec::new();
        let mut append = |block: &[u8]| {
            let buf = security_buffer(block.len(), HEADER_LEN as usize + payload.len());
            payload.extend_from_slice(block);
            buf
        };
        let domain_buf = append(&domain);
        let user_buf = append(&user);
        let workstation_buf = append(&workstation);
        let lm_buf = append(&lm_response);
        let nt_buf = append(&nt_response);
        let session_key_buf = append(&encrypted_session_key);

        let mut message = NTLMSSP_SIGNATURE.to_vec();
        message.extend_from_slice(&3u32.to_le_bytes());
        for buf in [lm_buf, nt_buf, domain_buf, user_buf, workstation_buf, session_key_buf] {
            message.extend_from_slice(&buf);
        }
        message.extend_from_slice(&flags.to_le_bytes());
        message.extend_from_slice(&payload);

        Ok((message, SessionSecurity::client(&session_key, key_exchange)))
    }

    /// NTOWFv2: HMAC-MD5 keyed with the NT hash over UPPER(user) + domain.
    fn ntowf_v2(&self) -> Result<[u8; 16], ConnectionError> {
        let nt_hash = Md4::digest(utf16le(self.password.expose_secret()));
        let identity = format!("{}{}", self.username.to_uppercase(), self.domain);
        hmac_md5(&nt_hash, &utf16le(&identity))
    }

    /// Server target info with the SPN added, terminated by MsvAvEOL.
    fn response_target_info(&self, challenge: &NtlmChallenge) -> Vec<u8> {
        let mut block = Vec::new();
        for (id, value) in &challenge.target_info {
            if *id == AV_EOL || *id == AV_TARGET_NAME {
                continue;
            }
            push_av_pair(&mut block, *id, value);
        }
        if !self.spn.is_empty() {
            push_av_pair(&mut block, AV_TARGET_NAME, &utf16le(&self.spn));
        }
        push_av_pair(&mut block, AV_EOL, &[]);
        block
    }
}

fn parse_av_pairs(block: &[u8]) -> Result<Vec<(u16, Vec<u8>)>, ConnectionError> {
    let mut pairs = Vec::new();
    let mut offset = 0;
    while let (Some(id), Some(len)) = (read_u16(block, offset), read_u16(block, offset + 2)) {
        if id == AV_EOL {
            break;
        }
        let start = offset + 4;
        let value = block
            .get(start..start + len as usize)
            .ok_or_else(|| ConnectionError::Negotiation("truncated target info".to_string()))?;
        pairs.push((id, value.to_vec()));
        offset = start + len as usize;
    }
    Ok(pairs)
}

fn push_av_pair(block: &mut Vec<u8>, id: u16, value: &[u8]) {
    block.extend_from_slice(&id.to_le_bytes());
    block.extend_from_slice(&(value.len() as u16).to_le_bytes());
    block.extend_from_slice(value);
}

fn security_buffer(len: usize, offset: usize) -> [u8; 8] {
    let mut buf = [0u8; 8];
    buf[0..2].copy_from_slice(&(len as u16).to_le_bytes());
    buf[2..4].copy_from_slice(&(len as u16).to_le_bytes());
    buf[4..8].copy_from_slice(&(offset as u32).to_le_bytes());
    buf
}

fn read_u16(bytes: &[u8], offset: usize) -> Option<u16> {
    bytes
        .get(offset..offset + 2)
        .map(|b| u16::from_le_bytes([b[0], b[1]]))
}

fn read_u32(bytes: &[u8], offset: usize) -> Option<u32> {
    bytes
        .get(offset..offset + 4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

fn hmac_md5(key: &[u8], data: &[u8]) -> Result<[u8; 16], ConnectionError> {
    let mut mac = <HmacMd5 as Mac>::new_from_slice(key)
        .map_err(|e| ConnectionError::Negotiation(format!("HMAC-MD5 key rejected: {}", e)))?;
    mac.update(data);
    let mut out = [0u8; 16];
    out.copy_from_slice(&mac.finalize().into_bytes());
    Ok(out)
}

pub(crate) fn utf16le(text: &str) -> Vec<u8> {
    text.encode_utf16().flat_map(|c| c.to_le_bytes()).collect()
}
