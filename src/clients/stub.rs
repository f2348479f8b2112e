use super::{Attempt, ProtocolHandler};
use crate::model::{Config, PortTarget, Protocol};
use async_trait::async_trait;
use tracing::debug;

/// Placeholder for protocols that need their own upgrade dance. Performs no
/// I/O at all.
pub(crate) struct UnimplementedHandler(pub Protocol);

#[async_trait]
impl ProtocolHandler for UnimplementedHandler {
    fn name(&self) -> &'static str {
        self.0.as_str()
    }

    async fn attempt(&self, target: &PortTarget, _cfg: &Config) -> Attempt {
        debug!(%target, protocol = %self.0, "protocol handler not implemented");
        Attempt::NotImplemented
    }
}
