use super::flight::read_server_flight;
use super::hello::ClientHelloBuilder;
use super::dial;
use crate::error::ProbeError;
use crate::model::{CipherFamily, Config, PortTarget, ProbeOutcome, DEFAULT_OVERALL_TIMEOUT};
use std::net::IpAddr;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::time::timeout;
use tracing::{debug, instrument};

/// One raw handshake per call, offering a single cipher family. The prober
/// stops as soon as the server's Certificate message is in; it never derives
/// keys, so nothing the server sends is verified.
#[derive(Debug, Clone)]
pub struct HandshakeProber {
    dial_timeout: Duration,
    read_timeout: Duration,
    overall_timeout: Duration,
}

impl HandshakeProber {
    pub fn new(dial_timeout: Duration, read_timeout: Duration) -> Self {
        Self {
            dial_timeout,
            read_timeout,
            overall_timeout: DEFAULT_OVERALL_TIMEOUT,
        }
    }

    pub fn from_config(cfg: &Config) -> Self {
        Self::new(cfg.dial_timeout, cfg.read_timeout).with_overall_timeout(cfg.overall_timeout)
    }

    /// Caps the whole attempt, however slowly the server trickles bytes.
    pub fn with_overall_timeout(mut self, overall_timeout: Duration) -> Self {
        self.overall_timeout = overall_timeout;
        self
    }

    #[instrument(skip(self), fields(target = %target))]
    pub async fn probe(
        &self,
        target: &PortTarget,
        family: CipherFamily,
    ) -> Result<ProbeOutcome, ProbeError> {
        match timeout(self.overall_timeout, self.handshake(target, family)).await {
            Ok(res) => res,
            Err(_) => Err(ProbeError::Handshake(format!(
                "handshake not finished within {} ms",
                self.overall_timeout.as_millis()
            ))),
        }
    }

    async fn handshake(
        &self,
        target: &PortTarget,
        family: CipherFamily,
    ) -> Result<ProbeOutcome, ProbeError> {
        let mut stream = dial(target.addr(), self.dial_timeout).await?;

        let hello = ClientHelloBuilder::for_family(family, sni_name(&target.hostname)).build();
        stream
            .write_all(&hello)
            .await
            .map_err(|err| ProbeError::Handshake(format!("failed to send ClientHello: {err}")))?;

        let flight = read_server_flight(&mut stream, self.read_timeout).await?;
        if let Some(hello) = flight.server_hello {
            if !family.cipher_suites().contains(&hello.cipher_suite) {
                return Err(ProbeError::Handshake(format!(
                    "server selected suite {:#06x} that was not offered",
                    hello.cipher_suite
                )));
            }
            debug!(
                suite = format_args!("{:#06x}", hello.cipher_suite),
                version = format_args!("{:#06x}", hello.version),
                certs = flight.certificates.len(),
                "handshake reached certificate"
            );
        }

        Ok(ProbeOutcome::new(Some(family), flight.certificates))
    }
}

/// SNI carries DNS names only; literal addresses are not announced.
fn sni_name(hostname: &str) -> Option<&str> {
    let name = hostname.trim_end_matches('.');
    if name.is_empty() || name.parse::<IpAddr>().is_ok() {
        None
    } else {
        Some(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    #[test]
    fn sni_skips_addresses() {
        assert_eq!(sni_name("example.com"), Some("example.com"));
        assert_eq!(sni_name("example.com."), Some("example.com"));
        assert_eq!(sni_name("10.0.0.1"), None);
        assert_eq!(sni_name("::1"), None);
        assert_eq!(sni_name(""), None);
    }

    #[tokio::test]
    async fn rejects_suite_outside_family() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await;
            // ServerHello picking an RSA suite, answered to an ECDSA hello.
            let mut body = vec![0x03, 0x03];
            body.extend_from_slice(&[0u8; 32]);
            body.push(0);
            body.extend_from_slice(&[0xc0, 0x2f, 0x00]);
            let mut hs = vec![0x02, 0x00, 0x00, body.len() as u8];
            hs.extend_from_slice(&body);
            hs.extend_from_slice(&[0x0b, 0, 0, 7, 0, 0, 4, 0, 0, 1, 0x30]);
            let mut record = vec![0x16, 0x03, 0x03, 0x00, hs.len() as u8];
            record.extend_from_slice(&hs);
            let _ = socket.write_all(&record).await;
        });

        let prober = HandshakeProber::new(Duration::from_secs(1), Duration::from_secs(1));
        let target = PortTarget {
            ip: addr.ip(),
            hostname: String::new(),
            port: addr.port(),
        };
        let err = prober.probe(&target, CipherFamily::Ecdsa).await.unwrap_err();
        match err {
            ProbeError::Handshake(msg) => assert!(msg.contains("not offered")),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn trickling_server_is_cut_off_by_overall_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await;
            // One-byte handshake records announcing a 64 KiB message, each
            // arriving well inside the read timeout.
            let mut body = vec![0x04, 0x00, 0xff, 0xff];
            body.resize(0xffff + 4, 0);
            for byte in body {
                let record = [0x16, 0x03, 0x03, 0x00, 0x01, byte];
                if socket.write_all(&record).await.is_err() {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        });

        let prober = HandshakeProber::new(Duration::from_secs(1), Duration::from_millis(300))
            .with_overall_timeout(Duration::from_secs(1));
        let target = PortTarget {
            ip: addr.ip(),
            hostname: String::new(),
            port: addr.port(),
        };
        let res = tokio::time::timeout(
            Duration::from_secs(5),
            prober.probe(&target, CipherFamily::Rsa),
        )
        .await
        .expect("handshake attempt must give up on its own");
        match res {
            Err(ProbeError::Handshake(msg)) => assert!(msg.contains("not finished within")),
            other => panic!("unexpected result {other:?}"),
        }
    }
}
