use crate::error::ProbeError;
use anyhow::anyhow;
use openssl::ssl::{SslConnector, SslMethod, SslVerifyMode};
use std::pin::Pin;
use std::sync::OnceLock;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::timeout;
use tokio_openssl::SslStream;

/// Runs a TLS client handshake over an already negotiated plaintext stream
/// and returns the peer chain as DER, leaf first.
pub async fn upgrade_and_collect<S>(
    stream: S,
    server_name: &str,
    handshake_timeout: Duration,
) -> Result<Vec<Vec<u8>>, ProbeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let connector = upgrade_connector().map_err(|err| ProbeError::Handshake(err.to_string()))?;

    let ssl = connector
        .configure()
        .map(|mut cfg| {
            cfg.set_verify_hostname(false);
            cfg
        })
        .and_then(|cfg| cfg.into_ssl(server_name))
        .map_err(|err| ProbeError::Handshake(format!("failed to configure TLS session: {err}")))?;
    let mut tls_stream = SslStream::new(ssl, stream)
        .map_err(|err| ProbeError::Handshake(format!("failed to initialize TLS stream: {err}")))?;

    match timeout(handshake_timeout, Pin::new(&mut tls_stream).connect()).await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => return Err(ProbeError::Handshake(err.to_string())),
        Err(_) => {
            return Err(ProbeError::Handshake(format!(
                "TLS handshake timed out after {handshake_timeout:?}"
            )))
        }
    }

    let ssl = tls_stream.ssl();
    let mut chain = Vec::new();
    if let Some(stack) = ssl.peer_cert_chain() {
        for cert in stack {
            match cert.to_der() {
                Ok(der) => chain.push(der),
                Err(err) => tracing::debug!(error = %err, "skipping unencodable peer certificate"),
            }
        }
    }
    if chain.is_empty() {
        if let Some(leaf) = ssl.peer_certificate() {
            if let Ok(der) = leaf.to_der() {
                chain.push(der);
            }
        }
    }
    if chain.is_empty() {
        return Err(ProbeError::NoCertificates);
    }
    Ok(chain)
}

fn upgrade_connector() -> anyhow::Result<&'static SslConnector> {
    static CONNECTOR: OnceLock<anyhow::Result<SslConnector>> = OnceLock::new();

    CONNECTOR
        .get_or_init(|| {
            let mut builder =
                SslConnector::builder(SslMethod::tls_client()).map_err(|e| anyhow!(e))?;
            // Discovery, not trust: accept whatever chain the server presents,
            // including legacy ones the default security level refuses.
            builder.set_verify(SslVerifyMode::NONE);
            builder.set_security_level(0);
            Ok(builder.build())
        })
        .as_ref()
        .map_err(|err| anyhow!("failed to create TLS connector: {err}"))
}
