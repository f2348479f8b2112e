use crate::model::{Config, PortTarget, ScanResult};
use async_trait::async_trait;
use std::sync::Arc;

use super::dispatch::Dispatcher;

/// Network work for a single port. The scheduler only sees the harvested
/// results, so tests can swap in processors that never touch a socket.
#[async_trait]
pub trait PortProcessor: Send + Sync {
    async fn process_port(
        &self,
        target: PortTarget,
        protocol: Option<String>,
        cfg: Arc<Config>,
    ) -> Vec<ScanResult>;
}

#[derive(Clone, Debug, Default)]
pub struct DefaultProcessor;

#[async_trait]
impl PortProcessor for DefaultProcessor {
    async fn process_port(
        &self,
        target: PortTarget,
        protocol: Option<String>,
        cfg: Arc<Config>,
    ) -> Vec<ScanResult> {
        Dispatcher::new(cfg)
            .dispatch(&target, protocol.as_deref())
            .await
            .into_results()
    }
}
