use std::net::SocketAddr;

/// Terminal outcomes of a single probe attempt. None of them is retried in
/// place; the next scan cycle is the retry.
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("dial {addr} failed: {source}")]
    Dial {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("dial {addr} timed out")]
    DialTimeout { addr: SocketAddr },

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("server presented no certificates")]
    NoCertificates,
}

impl ProbeError {
    pub fn stage(&self) -> &'static str {
        match self {
            ProbeError::Dial { .. } | ProbeError::DialTimeout { .. } => "dial",
            ProbeError::Protocol(_) => "protocol",
            ProbeError::Unsupported(_) => "capability",
            ProbeError::Handshake(_) => "handshake",
            ProbeError::NoCertificates => "certificates",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("failed to serialize payload: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("webhook request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("webhook returned status {status}")]
    Status { status: u16 },

    /// 403 without a configured token. Scanning on would only repeat it.
    #[error("webhook {url} rejected the request and no token is configured")]
    Unauthorized { url: String },

    #[error("output worker not available")]
    Closed,
}

impl SinkError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, SinkError::Unauthorized { .. })
    }
}
