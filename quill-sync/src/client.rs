//! Client transport: dial the hub.

use std::time::Duration;

use tokio::net::TcpStream;

use crate::config::PeerAddr;
use crate::error::TransportError;

/// Open a TCP stream to `addr`, giving up after `timeout`. No retry.
pub async fn dial(addr: &PeerAddr, timeout: Duration) -> Result<TcpStream, TransportError> {
    let target = addr.to_string();
    log::debug!("dialing {target}");
    let connect = TcpStream::connect((addr.host.as_str(), addr.port));
    match tokio::time::timeout(timeout, connect).await {
        Ok(Ok(stream)) => {
            if let Err(e) = stream.set_nodelay(true) {
                log::debug!("set_nodelay failed for {target}: {e}");
            }
            Ok(stream)
        }
        Ok(Err(source)) => Err(TransportError::Connect {
            addr: target,
            source,
        }),
        Err(_) => Err(TransportError::Timeout(target)),
    }
}
