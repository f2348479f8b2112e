mod registry;
pub mod smtp;
mod stub;
mod web;

pub use registry::handler_for;
pub use smtp::StartTlsUpgrader;

use crate::error::ProbeError;
use crate::model::{Config, PortTarget, ScanResult};
use async_trait::async_trait;
use tracing::{debug, info, warn};

/// Outcome of handing a port to a protocol handler. `NotImplemented` is kept
/// apart from an empty `Handled` so "never scanned" and "scanned, nothing
/// found" do not collapse into each other.
#[derive(Debug)]
pub enum Attempt {
    Handled(Vec<ScanResult>),
    NotImplemented,
}

impl Attempt {
    pub fn into_results(self) -> Vec<ScanResult> {
        match self {
            Attempt::Handled(results) => results,
            Attempt::NotImplemented => Vec::new(),
        }
    }
}

#[async_trait]
pub trait ProtocolHandler: Send + Sync {
    fn name(&self) -> &'static str;

    async fn attempt(&self, target: &PortTarget, cfg: &Config) -> Attempt;
}

/// Errors end here, as a log line at the level their kind deserves.
pub(crate) fn log_probe_error(target: &PortTarget, label: &str, err: &ProbeError) {
    let stage = err.stage();
    match err {
        ProbeError::Dial { .. } | ProbeError::DialTimeout { .. } => {
            debug!(%target, label, stage, error = %err, "target unreachable")
        }
        ProbeError::Handshake(_) | ProbeError::NoCertificates => {
            debug!(%target, label, stage, error = %err, "no certificates collected")
        }
        ProbeError::Unsupported(_) => {
            info!(%target, label, stage, error = %err, "capability missing")
        }
        ProbeError::Protocol(_) => {
            warn!(%target, label, stage, error = %err, "unexpected server response")
        }
    }
}
