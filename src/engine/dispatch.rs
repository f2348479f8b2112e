use crate::clients::{handler_for, Attempt};
use crate::model::{Config, PortClassification, PortTarget, Protocol};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchRejection {
    #[error("no protocol configured for unclassified port {0}")]
    Unresolved(u16),
    #[error("unknown protocol {0:?}")]
    Unknown(String),
    #[error("protocol {0} is not in the allow-list")]
    NotAllowed(Protocol),
}

/// Effective protocol for one port. An explicit value wins; otherwise the
/// port classification decides.
pub fn resolve_protocol(
    configured: Option<&str>,
    port: u16,
    classes: &PortClassification,
) -> Result<Protocol, DispatchRejection> {
    match configured.map(str::trim).filter(|p| !p.is_empty()) {
        Some(name) => name
            .parse()
            .map_err(|_| DispatchRejection::Unknown(name.to_string())),
        None if classes.smtp_ports.contains(&port) => Ok(Protocol::Smtp),
        None if classes.web_ports.contains(&port) => Ok(Protocol::Http1),
        None => Err(DispatchRejection::Unresolved(port)),
    }
}

pub fn check_allowed(
    protocol: Protocol,
    allowed: &[Protocol],
) -> Result<Protocol, DispatchRejection> {
    if allowed.contains(&protocol) {
        Ok(protocol)
    } else {
        Err(DispatchRejection::NotAllowed(protocol))
    }
}

#[derive(Clone)]
pub struct Dispatcher {
    cfg: Arc<Config>,
}

impl Dispatcher {
    pub fn new(cfg: Arc<Config>) -> Self {
        Self { cfg }
    }

    pub fn select(
        &self,
        port: u16,
        configured: Option<&str>,
    ) -> Result<Protocol, DispatchRejection> {
        let protocol = resolve_protocol(configured, port, &self.cfg.port_classes)?;
        check_allowed(protocol, &self.cfg.allowed_protocols)
    }

    /// Runs the handler for the port and hands back whatever it harvested.
    /// Rejections and unimplemented protocols yield no results and no I/O.
    #[instrument(skip(self), fields(target = %target))]
    pub async fn dispatch(&self, target: &PortTarget, configured: Option<&str>) -> Attempt {
        let protocol = match self.select(target.port, configured) {
            Ok(protocol) => protocol,
            Err(rejection) => {
                warn!(%target, reason = %rejection, "port not scanned");
                return Attempt::Handled(Vec::new());
            }
        };

        let handler = handler_for(protocol);
        debug!(%target, %protocol, handler = handler.name(), "dispatching");
        handler.attempt(target, &self.cfg).await
    }
}
