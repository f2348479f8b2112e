#![allow(dead_code)]

use certscan::error::SinkError;
use certscan::model::ScanResult;
use certscan::output::ResultSink;
use openssl::asn1::Asn1Time;
use openssl::bn::BigNum;
use openssl::ec::{EcGroup, EcKey};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{PKey, Private};
use openssl::rsa::Rsa;
use openssl::ssl::{Ssl, SslAcceptor, SslMethod, SslVersion};
use openssl::x509::{X509Name, X509NameBuilder, X509};
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_openssl::SslStream;

pub struct Identity {
    pub key: PKey<Private>,
    pub cert: X509,
}

fn name(cn: &str) -> X509Name {
    let mut builder = X509NameBuilder::new().unwrap();
    builder.append_entry_by_text("O", "Test Org").unwrap();
    builder.append_entry_by_text("CN", cn).unwrap();
    builder.build()
}

fn rsa_key() -> PKey<Private> {
    PKey::from_rsa(Rsa::generate(2048).unwrap()).unwrap()
}

fn p256_key() -> PKey<Private> {
    let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).unwrap();
    PKey::from_ec_key(EcKey::generate(&group).unwrap()).unwrap()
}

/// Leaf for `subject_cn` signed by `issuer`, or self-signed without one.
pub fn issue(subject_cn: &str, issuer: Option<&Identity>) -> Identity {
    issue_with_key(subject_cn, issuer, rsa_key())
}

/// Same as [`issue`] but the leaf carries a P-256 key.
pub fn issue_ec(subject_cn: &str, issuer: Option<&Identity>) -> Identity {
    issue_with_key(subject_cn, issuer, p256_key())
}

fn issue_with_key(subject_cn: &str, issuer: Option<&Identity>, key: PKey<Private>) -> Identity {
    let mut builder = X509::builder().unwrap();
    builder.set_version(2).unwrap();
    let serial = BigNum::from_u32(rand::random::<u32>() | 1).unwrap();
    builder
        .set_serial_number(&serial.to_asn1_integer().unwrap())
        .unwrap();
    builder.set_subject_name(&name(subject_cn)).unwrap();
    match issuer {
        Some(ca) => builder.set_issuer_name(ca.cert.subject_name()).unwrap(),
        None => builder.set_issuer_name(&name(subject_cn)).unwrap(),
    }
    builder.set_pubkey(&key).unwrap();
    builder
        .set_not_before(&Asn1Time::days_from_now(0).unwrap())
        .unwrap();
    builder
        .set_not_after(&Asn1Time::days_from_now(30).unwrap())
        .unwrap();
    let signer = issuer.map(|ca| &ca.key).unwrap_or(&key);
    builder.sign(signer, MessageDigest::sha256()).unwrap();
    Identity {
        cert: builder.build(),
        key,
    }
}

/// TLS 1.2 acceptor that can only complete RSA-authenticated suites.
pub fn rsa_acceptor(identity: &Identity) -> Arc<SslAcceptor> {
    let mut builder = SslAcceptor::mozilla_intermediate_v5(SslMethod::tls()).unwrap();
    builder.set_private_key(&identity.key).unwrap();
    builder.set_certificate(&identity.cert).unwrap();
    builder.check_private_key().unwrap();
    builder
        .set_max_proto_version(Some(SslVersion::TLS1_2))
        .unwrap();
    builder
        .set_cipher_list("ECDHE-RSA-AES128-GCM-SHA256:ECDHE-RSA-AES256-GCM-SHA384:AES128-SHA")
        .unwrap();
    Arc::new(builder.build())
}

/// TLS 1.2 acceptor holding an ECDSA and an RSA certificate. OpenSSL picks
/// the one matching the suite the client offered.
pub fn dual_acceptor(ecdsa: &Identity, rsa: &Identity) -> Arc<SslAcceptor> {
    let mut builder = SslAcceptor::mozilla_intermediate_v5(SslMethod::tls()).unwrap();
    for identity in [ecdsa, rsa] {
        builder.set_private_key(&identity.key).unwrap();
        builder.set_certificate(&identity.cert).unwrap();
        builder.check_private_key().unwrap();
    }
    builder
        .set_max_proto_version(Some(SslVersion::TLS1_2))
        .unwrap();
    builder
        .set_cipher_list("ECDHE-ECDSA-AES128-GCM-SHA256:ECDHE-RSA-AES128-GCM-SHA256")
        .unwrap();
    Arc::new(builder.build())
}

pub async fn accept_tls<S>(acceptor: &SslAcceptor, stream: S) -> Option<SslStream<S>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let ssl = Ssl::new(acceptor.context()).ok()?;
    let mut tls = SslStream::new(ssl, stream).ok()?;
    Pin::new(&mut tls).accept().await.ok()?;
    Some(tls)
}

/// Serves TLS on every connection until the test ends.
pub async fn spawn_tls_server(acceptor: Arc<SslAcceptor>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((socket, _)) = listener.accept().await else {
                break;
            };
            let acceptor = acceptor.clone();
            tokio::spawn(async move {
                if let Some(mut tls) = accept_tls(&acceptor, socket).await {
                    let _ = tls.shutdown().await;
                }
            });
        }
    });
    addr
}

/// Reads up to and including the next CRLF, one byte at a time so nothing
/// past the line is consumed.
pub async fn read_line(socket: &mut TcpStream) -> String {
    let mut line = Vec::new();
    let mut byte = [0u8; 1];
    while !line.ends_with(b"\r\n") {
        match socket.read(&mut byte).await {
            Ok(1) => line.push(byte[0]),
            _ => break,
        }
    }
    String::from_utf8_lossy(&line).into_owned()
}

pub async fn write(socket: &mut TcpStream, data: &str) {
    socket.write_all(data.as_bytes()).await.unwrap();
}

#[derive(Default)]
pub struct RecordingSink {
    pub batches: Mutex<Vec<Vec<ScanResult>>>,
}

impl RecordingSink {
    pub fn results(&self) -> Vec<ScanResult> {
        self.batches.lock().unwrap().iter().flatten().cloned().collect()
    }
}

#[async_trait::async_trait]
impl ResultSink for RecordingSink {
    async fn send(&self, results: Vec<ScanResult>) -> Result<(), SinkError> {
        assert!(!results.is_empty(), "empty batch forwarded");
        self.batches.lock().unwrap().push(results);
        Ok(())
    }
}
