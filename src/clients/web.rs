use super::{log_probe_error, Attempt, ProtocolHandler};
use crate::model::{CipherFamily, Config, PortTarget, ScanResult};
use crate::probe::HandshakeProber;
use async_trait::async_trait;

/// Direct TLS: one handshake per cipher family, each on its own connection.
pub(crate) struct WebTlsHandler;

#[async_trait]
impl ProtocolHandler for WebTlsHandler {
    fn name(&self) -> &'static str {
        "web-tls"
    }

    async fn attempt(&self, target: &PortTarget, cfg: &Config) -> Attempt {
        let prober = HandshakeProber::from_config(cfg);
        let mut results = Vec::with_capacity(CipherFamily::ALL.len());

        for family in CipherFamily::ALL {
            match prober.probe(target, family).await {
                Ok(outcome) => results.push(ScanResult::from_outcome(target, outcome)),
                Err(err) => log_probe_error(target, family.as_str(), &err),
            }
        }

        Attempt::Handled(results)
    }
}
