mod channel;
mod webhook;

pub use channel::StdoutSink;
pub use webhook::{WebhookSink, REGISTRATION_HINT};

use crate::error::SinkError;
use crate::model::{Config, ScanResult};
use crate::util::{machine_id, primary_ip};
use async_trait::async_trait;
use serde::Serialize;

/// Destination for filtered, non-empty result batches. One call per port.
#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn send(&self, results: Vec<ScanResult>) -> Result<(), SinkError>;
}

/// Who is reporting. Resolved once at startup and stamped on every payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentIdentity {
    pub primary_ip: String,
    pub machine_id: String,
}

impl AgentIdentity {
    pub fn detect(cfg: &Config) -> Self {
        Self {
            primary_ip: primary_ip().map(|ip| ip.to_string()).unwrap_or_default(),
            machine_id: machine_id(&cfg.machine_id),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct Payload<'a> {
    #[serde(skip_serializing_if = "is_blank")]
    pub primary_ip: &'a str,
    #[serde(skip_serializing_if = "is_blank")]
    pub machine_id: &'a str,
    pub scan_results: &'a [ScanResult],
}

fn is_blank(value: &&str) -> bool {
    value.is_empty()
}

impl<'a> Payload<'a> {
    pub fn new(identity: &'a AgentIdentity, scan_results: &'a [ScanResult]) -> Self {
        Self {
            primary_ip: &identity.primary_ip,
            machine_id: &identity.machine_id,
            scan_results,
        }
    }
}
