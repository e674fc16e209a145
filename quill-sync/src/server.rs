//! Hub transport: bind a TCP port and hand every accepted stream to the
//! engine as a new peer.
//!
//! ```text
//!  Client A ──┐
//!             ├── accept loop ── PeerSession ── SessionEvent ──┐
//!  Client B ──┘                                                 ▼
//!                                              SyncEngine (behind one Mutex)
//!                                                   │
//!                                         ConnectionRegistry::broadcast
//!                                          ┌────────┼────────┐
//!                                          ▼        ▼        ▼
//!                                      Client A  Client B  Client C
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::config::NodeConfig;
use crate::engine::SyncEngine;
use crate::error::TransportError;
use crate::session::{PeerSession, SessionEvent};
use crate::surface::EditorSurface;

/// A bound hub socket.
pub struct HubListener {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl HubListener {
    /// Bind `addr` (`host:port`).
    pub async fn bind(addr: &str) -> Result<Self, TransportError> {
        let listen_err = |source| TransportError::Listen {
            addr: addr.to_string(),
            source,
        };
        let listener = TcpListener::bind(addr).await.map_err(listen_err)?;
        let local_addr = listener.local_addr().map_err(listen_err)?;
        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// Actual bound address (resolves port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept peers until `shutdown` fires.
    ///
    /// Each peer is registered and sent the bootstrap delta before its
    /// reader starts, so nothing it sends can arrive ahead of its
    /// registration.
    pub async fn run<S>(
        self,
        engine: Arc<Mutex<SyncEngine<S>>>,
        events: mpsc::UnboundedSender<SessionEvent>,
        config: NodeConfig,
        shutdown: CancellationToken,
    ) where
        S: EditorSurface + Send + 'static,
    {
        loop {
            let (stream, addr) = tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        log::warn!("accept failed: {e}");
                        continue;
                    }
                },
            };
            log::debug!("new TCP connection from {addr}");
            if let Err(e) = stream.set_nodelay(true) {
                log::debug!("set_nodelay failed for {addr}: {e}");
            }

            let (conn, session) = PeerSession::new(stream, Some(addr), &config);
            let accepted = engine.lock().await.accept(conn);
            match accepted {
                Ok(()) => {
                    session.start(events.clone());
                }
                Err(e) => log::warn!("rejected peer {addr}: {e}"),
            }
        }
        log::info!("hub on {} stopped accepting", self.local_addr);
    }
}
