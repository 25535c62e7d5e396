//! NTLM session security and MS-WSMV message encryption
//!
//! After the NTLM handshake every request body on the authenticated
//! connection is sealed (RC4) and signed (HMAC-MD5), then framed as a
//! `multipart/encrypted` document. Responses come back the same way.

use hmac::{Hmac, Mac};
use md5::Digest;
use rc4::consts::U16;
use rc4::{KeyInit, Rc4, StreamCipher};

use crate::error::ConnectionError;

type HmacMd5 = Hmac<md5::Md5>;

/// `Content-Type` of an encrypted WS-Management message.
pub const ENCRYPTED_CONTENT_TYPE: &str =
    "multipart/encrypted;protocol=\"application/HTTP-SPNEGO-session-encrypted\";boundary=\"Encrypted Boundary\"";

const BOUNDARY: &[u8] = b"--Encrypted Boundary";
const PROTOCOL: &str = "application/HTTP-SPNEGO-session-encrypted";
const OCTET_STREAM_HEADER: &[u8] = b"\tContent-Type: application/octet-stream\r\n";
const LENGTH_MARKER: &[u8] = b"Length=";

const SIGNATURE_LEN: usize = 16;
const SIGNATURE_VERSION: u32 = 1;

const CLIENT_SIGNING: &[u8] = b"session key to client-to-server signing key magic constant\0";
const SERVER_SIGNING: &[u8] = b"session key to server-to-client signing key magic constant\0";
const CLIENT_SEALING: &[u8] = b"session key to client-to-server sealing key magic constant\0";
const SERVER_SEALING: &[u8] = b"session key to server-to-client sealing key magic constant\0";

/// Sealing state for one authenticated connection.
///
/// Each direction has its own keys, RC4 stream and sequence number, so
/// messages must be sealed and unsealed in the order they are exchanged.
pub struct SessionSecurity {
    key_exchange: bool,
    signing_key: [u8; 16],
    verifying_key: [u8; 16],
    sealer: Rc4<U16>,
    unsealer: Rc4<U16>,
    send_sequence: u32,
    receive_sequence: u32,
}

impl SessionSecurity {
    /// Client side of a context whose exported session key is `session_key`.
    pub fn client(session_key: &[u8; 16], key_exchange: bool) -> Self {
        Self::with_keys(
            session_key,
            key_exchange,
            [CLIENT_SIGNING, SERVER_SIGNING, CLIENT_SEALING, SERVER_SEALING],
        )
    }

    /// Listener side of the same context.
    pub fn server(session_key: &[u8; 16], key_exchange: bool) -> Self {
        Self::with_keys(
            session_key,
            key_exchange,
            [SERVER_SIGNING, CLIENT_SIGNING, SERVER_SEALING, CLIENT_SEALING],
        )
    }

    fn with_keys(session_key: &[u8; 16], key_exchange: bool, [sign, verify, seal, unseal]: [&[u8]; 4]) -> Self {
        Self {
            key_exchange,
            signing_key: derive_key(session_key, sign),
            verifying_key: derive_key(session_key, verify),
            sealer: Rc4::new((&derive_key(session_key, seal)).into()),
            unsealer: Rc4::new((&derive_key(session_key, unseal)).into()),
            send_sequence: 0,
            receive_sequence: 0,
        }
    }

    /// Encrypt `message` and sign it. Returns the sealed bytes and the
    /// 16 byte signature.
    pub fn seal(&mut self, message: &[u8]) -> Result<(Vec<u8>, [u8; SIGNATURE_LEN]), ConnectionError> {
        let mut sealed = message.to_vec();
        self.sealer.apply_keystream(&mut sealed);

        let sequence = self.send_sequence;
        let mut checksum = checksum(&self.signing_key, sequence, message)?;
        if self.key_exchange {
            self.sealer.apply_keystream(&mut checksum);
        }
        self.send_sequence = self.send_sequence.wrapping_add(1);

        Ok((sealed, build_signature(&checksum, sequence)))
    }

    /// Decrypt `sealed` and verify its signature.
    pub fn unseal(&mut self, sealed: &[u8], signature: &[u8]) -> Result<Vec<u8>, ConnectionError> {
        if signature.len() != SIGNATURE_LEN {
            return Err(ConnectionError::MalformedResponse(format!(
                "message signature is {} bytes",
                signature.len()
            )));
        }

        let mut message = sealed.to_vec();
        self.unsealer.apply_keystream(&mut message);

        let sequence = self.receive_sequence;
        let mut expected = checksum(&self.verifying_key, sequence, &message)?;
        if self.key_exchange {
            self.unsealer.apply_keystream(&mut expected);
        }
        self.receive_sequence = self.receive_sequence.wrapping_add(1);

        if signature != build_signature(&expected, sequence) {
            return Err(ConnectionError::MalformedResponse(
                "sealed message failed signature verification".to_string(),
            ));
        }
        Ok(message)
    }

    /// Seal a SOAP body into a `multipart/encrypted` document.
    pub fn encrypt_body(&mut self, body: &[u8]) -> Result<Vec<u8>, ConnectionError> {
        let (sealed, signature) = self.seal(body)?;

        let mut out = Vec::with_capacity(body.len() + 256);
        out.extend_from_slice(BOUNDARY);
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(format!("\tContent-Type: {}\r\n", PROTOCOL).as_bytes());
        out.extend_from_slice(
            format!(
                "\tOriginalContent: type=application/soap+xml;charset=UTF-8;Length={}\r\n",
                body.len()
            )
            .as_bytes(),
        );
        out.extend_from_slice(BOUNDARY);
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(OCTET_STREAM_HEADER);
        out.extend_from_slice(&(SIGNATURE_LEN as u32).to_le_bytes());
        out.extend_from_slice(&signature);
        out.extend_from_slice(&sealed);
        out.extend_from_slice(BOUNDARY);
        out.extend_from_slice(b"--\r\n");
        Ok(out)
    }

    /// Unwrap and unseal a `multipart/encrypted` response document.
    pub fn decrypt_body(&mut self, payload: &[u8]) -> Result<String, ConnectionError> {
        let malformed = |detail: &str| ConnectionError::MalformedResponse(format!("encrypted response {}", detail));

        let length_at = find(payload, LENGTH_MARKER).ok_or_else(|| malformed("has no original length"))?;
        let digits: String = payload[length_at + LENGTH_MARKER.len()..]
            .iter()
            .take_while(|b| b.is_ascii_digit())
            .map(|b| char::from(*b))
            .collect();
        let length: usize = digits.parse().map_err(|_| malformed("has an invalid original length"))?;

        let data_at = find(payload, OCTET_STREAM_HEADER)
            .map(|at| at + OCTET_STREAM_HEADER.len())
            .ok_or_else(|| malformed("has no octet-stream part"))?;
        let data = &payload[data_at..];

        let signature_len = data
            .get(..4)
            .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]) as usize)
            .ok_or_else(|| malformed("is truncated"))?;
        let signature = data
            .get(4..4 + signature_len)
            .ok_or_else(|| malformed("is truncated"))?;
        let sealed = data
            .get(4 + signature_len..4 + signature_len + length)
            .ok_or_else(|| malformed("is shorter than its original length"))?;

        let message = self.unseal(sealed, signature)?;
        String::from_utf8(message).map_err(|_| malformed("is not UTF-8"))
    }
}

impl std::fmt::Debug for SessionSecurity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionSecurity")
            .field("key_exchange", &self.key_exchange)
            .field("send_sequence", &self.send_sequence)
            .field("receive_sequence", &self.receive_sequence)
            .finish_non_exhaustive()
    }
}

/// True when a response carries an encrypted body.
pub fn is_encrypted(content_type: &str) -> bool {
    content_type
        .trim_start()
        .to_ascii_lowercase()
        .starts_with("multipart/encrypted")
}

fn derive_key(session_key: &[u8; 16], magic: &[u8]) -> [u8; 16] {
    let mut hasher = md5::Md5::new();
    hasher.update(session_key);
    hasher.update(magic);
    hasher.finalize().into()
}

fn checksum(key: &[u8; 16], sequence: u32, message: &[u8]) -> Result<[u8; 8], ConnectionError> {
    let mut mac = <HmacMd5 as Mac>::new_from_slice(key)
        .map_err(|e| ConnectionError::Negotiation(format!("HMAC-MD5 key rejected: {}", e)))?;
    mac.update(&sequence.to_le_bytes());
    mac.update(message);
    let digest = mac.finalize().into_bytes();

    let mut out = [0u8; 8];
    out.copy_from_slice(&digest[..8]);
    Ok(out)
}

fn build_signature(checksum: &[u8; 8], sequence: u32) -> [u8; SIGNATURE_LEN] {
    let mut out = [0u8; SIGNATURE_LEN];
    out[..4].copy_from_slice(&SIGNATURE_VERSION.to_le_bytes());
    out[4..12].copy_from_slice(checksum);
    out[12..].copy_from_slice(&sequence.to_le_bytes());
    out
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|window| window == needle)
}
