use std::fmt::Write;

use base64::prelude::*;
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkcs12::Pkcs12;
use openssl::x509::{X509Ref, X509};
use secrecy::{ExposeSecret, SecretString};

use crate::error::PayloadError;
use crate::types::Thumbprint;

/// Encoding an add payload arrived in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadFormat {
    Pkcs12,
    Der,
    Pem,
}

/// What an add payload contains, determined locally before any remote call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadSummary {
    pub thumbprint: Thumbprint,
    /// Subject common name, empty when the subject has none.
    pub subject: String,
    pub has_private_key: bool,
    pub format: PayloadFormat,
}

/// Decode base64 certificate contents, ignoring embedded whitespace.
pub fn decode_contents(contents: &str) -> Result<Vec<u8>, PayloadError> {
    let cleaned: String = contents.chars().filter(|c| !c.is_whitespace()).collect();
    BASE64_STANDARD.decode(cleaned).map_err(PayloadError::Base64)
}

/// Open a PKCS#12 archive, falling back to a bare DER or PEM certificate.
pub fn inspect_payload(bytes: &[u8], password: Option<&SecretString>) -> Result<PayloadSummary, PayloadError> {
    if let Ok(pkcs12) = Pkcs12::from_der(bytes) {
        let password = password.map(|p| p.expose_secret()).unwrap_or("");
        let parsed = pkcs12.parse2(password).map_err(PayloadError::Password)?;
        let cert = parsed.cert.ok_or(PayloadError::NoCertificate)?;
        return summarize(&cert, parsed.pkey.is_some(), PayloadFormat::Pkcs12);
    }

    match X509::from_der(bytes) {
        Ok(cert) => summarize(&cert, false, PayloadFormat::Der),
        Err(der_error) => match X509::from_pem(bytes) {
            Ok(cert) => summarize(&cert, false, PayloadFormat::Pem),
            Err(_) => Err(PayloadError::Unrecognized(der_error)),
        },
    }
}

fn summarize(cert: &X509Ref, has_private_key: bool, format: PayloadFormat) -> Result<PayloadSummary, PayloadError> {
    Ok(PayloadSummary {
        thumbprint: certificate_thumbprint(cert)?,
        subject: common_name(cert),
        has_private_key,
        format,
    })
}

/// SHA-1 thumbprint of a certificate, as Windows reports it.
pub fn certificate_thumbprint(cert: &X509Ref) -> Result<Thumbprint, PayloadError> {
    let digest = cert.digest(MessageDigest::sha1()).map_err(PayloadError::Digest)?;
    let hex = digest.iter().fold(String::new(), |mut acc, b| {
        let _ = write!(acc, "{:02X}", b);
        acc
    });
    Thumbprint::parse(&hex)
}

fn common_name(cert: &X509Ref) -> String {
    cert.subject_name()
        .entries_by_nid(Nid::COMMONNAME)
        .next()
        .map(|cn| String::from_utf8_lossy(cn.data().as_slice()).into_owned())
        .unwrap_or_default()
}
