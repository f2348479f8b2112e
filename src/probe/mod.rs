pub mod flight;
pub mod hello;
mod tls;
mod upgrade;

pub use tls::HandshakeProber;
pub use upgrade::upgrade_and_collect;

use crate::error::ProbeError;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;

pub async fn dial(addr: SocketAddr, dial_timeout: Duration) -> Result<TcpStream, ProbeError> {
    match timeout(dial_timeout, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(source)) => Err(ProbeError::Dial { addr, source }),
        Err(_) => Err(ProbeError::DialTimeout { addr }),
    }
}
