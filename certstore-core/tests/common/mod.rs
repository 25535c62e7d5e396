#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use base64::prelude::*;
use certstore_core::crypto::inspect_payload;
use certstore_core::error::ConnectionError;
use certstore_core::session::{CommandOutput, ConnectionTarget, RemoteCommand, RemoteSession, SessionConnector};
use certstore_core::store::script;
use certstore_core::types::Credentials;
use certstore_core::{CertificateEntry, Thumbprint};
use secrecy::SecretString;
use serde_json::json;

/// How the simulated host misbehaves.
#[derive(Debug, Clone, Default)]
pub enum Fault {
    #[default]
    None,
    Unreachable,
    ScriptFails {
        exit_code: i32,
        stderr: String,
    },
    Panics,
}

/// A simulated Windows host with named stores and call counters.
#[derive(Debug, Default)]
pub struct FakeHost {
    pub stores: BTreeMap<String, Vec<CertificateEntry>>,
    pub fault: Fault,
    pub opens: usize,
    pub runs: usize,
    pub closes: usize,
    pub targets: Vec<ConnectionTarget>,
}

#[derive(Debug, Clone, Default)]
pub struct FakeConnector {
    pub host: Arc<Mutex<FakeHost>>,
}

impl FakeConnector {
    pub fn with_store(store: &str, thumbprints: &[&str]) -> Self {
        let connector = Self::default();
        connector.host().stores.insert(
            store.to_string(),
            thumbprints
                .iter()
                .map(|tp| CertificateEntry {
                    thumbprint: Thumbprint::parse(tp).unwrap(),
                    raw_data: vec![0x30, 0x03, 0x02, 0x01, 0x01],
                    has_private_key: false,
                })
                .collect(),
        );
        connector
    }

    pub fn with_fault(self, fault: Fault) -> Self {
        self.host().fault = fault;
        self
    }

    pub fn host(&self) -> std::sync::MutexGuard<'_, FakeHost> {
        self.host.lock().unwrap()
    }

    pub fn counts(&self) -> (usize, usize, usize) {
        let host = self.host();
        (host.opens, host.runs, host.closes)
    }
}

#[async_trait]
impl SessionConnector for FakeConnector {
    type Session = FakeSession;

    async fn open(&self, target: &ConnectionTarget, _credentials: &Credentials) -> Result<FakeSession, ConnectionError> {
        let mut host = self.host();
        host.targets.push(target.clone());
        if let Fault::Unreachable = host.fault {
            return Err(ConnectionError::Negotiation(format!("no route to {}", target.host)));
        }
        host.opens += 1;
        Ok(FakeSession {
            host: Arc::clone(&self.host),
            open: true,
        })
    }
}

#[derive(Debug)]
pub struct FakeSession {
    host: Arc<Mutex<FakeHost>>,
    open: bool,
}

#[async_trait]
impl RemoteSession for FakeSession {
    async fn run(&mut self, command: &RemoteCommand) -> Result<CommandOutput, ConnectionError> {
        if !self.open {
            return Err(ConnectionError::Closed);
        }
        let mut host = self.host.lock().unwrap();
        host.runs += 1;

        match host.fault.clone() {
            Fault::Panics => {
                drop(host);
                panic!("simulated handler crash");
            }
            Fault::ScriptFails { exit_code, stderr } => {
                return Ok(CommandOutput {
                    stdout: String::new(),
                    stderr,
                    exit_code,
                })
            }
            Fault::None | Fault::Unreachable => {}
        }

        let params = &command.parameters;
        let store_path = params["StorePath"].as_str().unwrap_or_default().to_string();
        let store = host.stores.entry(store_path).or_default();

        let stdout = match command.name {
            script::LIST_NAME => {
                let rows: Vec<_> = store
                    .iter()
                    .map(|e| {
                        json!({
                            "Thumbprint": e.thumbprint.as_str(),
                            "RawData": BASE64_STANDARD.encode(&e.raw_data),
                            "HasPrivateKey": e.has_private_key,
                        })
                    })
                    .collect();
                serde_json::to_string(&rows).unwrap()
            }
            script::ADD_NAME => {
                let pfx = BASE64_STANDARD.decode(params["Pfx"].as_str().unwrap()).unwrap();
                let password = params["Password"]
                    .as_str()
                    .map(|p| SecretString::new(p.to_string().into_boxed_str()));
                let summary = inspect_payload(&pfx, password.as_ref()).unwrap();
                store.retain(|e| e.thumbprint != summary.thumbprint);
                store.push(CertificateEntry {
                    thumbprint: summary.thumbprint.clone(),
                    raw_data: pfx,
                    has_private_key: summary.has_private_key,
                });
                format!("{}\r\n", summary.thumbprint)
            }
            script::REMOVE_NAME => {
                let wanted = Thumbprint::parse(params["Thumbprint"].as_str().unwrap()).unwrap();
                let matches = store.iter().filter(|e| e.thumbprint == wanted).count();
                if let Some(index) = store.iter().position(|e| e.thumbprint == wanted) {
                    store.remove(index);
                }
                json!({ "Removed": matches > 0, "Matches": matches }).to_string()
            }
            other => panic!("unexpected command {}", other),
        };

        Ok(CommandOutput {
            stdout,
            stderr: String::new(),
            exit_code: 0,
        })
    }

    async fn close(&mut self) -> Result<(), ConnectionError> {
        if self.open {
            self.open = false;
            self.host.lock().unwrap().closes += 1;
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

/// A password-protected PFX with a fresh self-signed certificate.
pub fn generate_pfx(cn: &str, password: &str) -> Vec<u8> {
    use openssl::asn1::Asn1Time;
    use openssl::bn::BigNum;
    use openssl::ec::{EcGroup, EcKey};
    use openssl::hash::MessageDigest;
    use openssl::nid::Nid;
    use openssl::pkcs12::Pkcs12;
    use openssl::pkey::PKey;
    use openssl::x509::{X509NameBuilder, X509};

    let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).unwrap();
    let key = PKey::from_ec_key(EcKey::generate(&group).unwrap()).unwrap();

    let mut name = X509NameBuilder::new().unwrap();
    name.append_entry_by_text("CN", cn).unwrap();
    let name = name.build();

    let mut builder = X509::builder().unwrap();
    builder.set_version(2).unwrap();
    builder
        .set_serial_number(&BigNum::from_u32(7).unwrap().to_asn1_integer().unwrap())
        .unwrap();
    builder.set_subject_name(&name).unwrap();
    builder.set_issuer_name(&name).unwrap();
    builder.set_pubkey(&key).unwrap();
    builder.set_not_before(&Asn1Time::days_from_now(0).unwrap()).unwrap();
    builder.set_not_after(&Asn1Time::days_from_now(30).unwrap()).unwrap();
    builder.sign(&key, MessageDigest::sha256()).unwrap();
    let cert = builder.build();

    Pkcs12::builder()
        .name(cn)
        .pkey(&key)
        .cert(&cert)
        .build2(password)
        .unwrap()
        .to_der()
        .unwrap()
}
