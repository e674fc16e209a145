//! A running sync process: one engine, its transports, and the task that
//! feeds session events into it.
//!
//! All engine access goes through a single `tokio::sync::Mutex`. Session
//! readers never touch the engine directly; they queue events on one
//! channel and the dispatch task applies them one at a time, so frames
//! from a given peer are processed in arrival order.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;

use crate::client;
use crate::config::{NodeConfig, PeerAddr};
use crate::engine::{Phase, SyncEngine};
use crate::error::SyncError;
use crate::patch::Delta;
use crate::registry::ConnectionId;
use crate::server::HubListener;
use crate::session::{PeerSession, SessionEvent};
use crate::surface::EditorSurface;

/// Handle to a running node. Clones share the same engine.
pub struct SyncNode<S> {
    engine: Arc<Mutex<SyncEngine<S>>>,
    events: mpsc::UnboundedSender<SessionEvent>,
    config: NodeConfig,
    shutdown: CancellationToken,
}

impl<S> Clone for SyncNode<S> {
    fn clone(&self) -> Self {
        Self {
            engine: self.engine.clone(),
            events: self.events.clone(),
            config: self.config.clone(),
            shutdown: self.shutdown.clone(),
        }
    }
}

impl<S> SyncNode<S>
where
    S: EditorSurface + Send + 'static,
{
    /// Build an idle node around `surface` and spawn its dispatch task.
    /// Must be called inside a tokio runtime.
    pub fn start(surface: S, config: NodeConfig) -> Self {
        let engine = Arc::new(Mutex::new(SyncEngine::new(surface)));
        let (events, rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();
        tokio::spawn(dispatch(engine.clone(), rx, shutdown.clone()));
        Self {
            engine,
            events,
            config,
            shutdown,
        }
    }

    /// Become the hub on `port`. Resolves once the socket is bound; the
    /// accept loop keeps running in the background.
    pub async fn listen(&self, port: u16) -> Result<SocketAddr, SyncError> {
        self.ensure_running()?;
        self.engine.lock().await.begin_listen()?;

        let addr = format!("{}:{port}", self.config.bind_host);
        let listener = match HubListener::bind(&addr).await {
            Ok(listener) => listener,
            Err(e) => {
                self.engine.lock().await.listen_failed(&e);
                return Err(e.into());
            }
        };
        let local = listener.local_addr();
        self.engine.lock().await.listen_succeeded(local);

        tokio::spawn(listener.run(
            self.engine.clone(),
            self.events.clone(),
            self.config.clone(),
            self.shutdown.child_token(),
        ));
        Ok(local)
    }

    /// Join the hub at `addr`. On success the local document is reset and
    /// filled by the hub's bootstrap delta shortly after.
    pub async fn connect(&self, addr: &PeerAddr) -> Result<ConnectionId, SyncError> {
        self.ensure_running()?;
        self.engine.lock().await.begin_connect()?;

        let stream = match client::dial(addr, self.config.connect_timeout).await {
            Ok(stream) => stream,
            Err(e) => {
                self.engine.lock().await.connect_failed(&e);
                return Err(e.into());
            }
        };
        let peer = stream.peer_addr().ok();
        let (conn, session) = PeerSession::new(stream, peer, &self.config);
        let id = conn.id();
        self.engine.lock().await.connect_succeeded(conn)?;
        session.start(self.events.clone());
        Ok(id)
    }

    /// Publish the surface's current text, if it changed.
    pub async fn local_edit(&self) -> Result<Option<Delta>, SyncError> {
        self.engine.lock().await.local_edit()
    }

    pub async fn phase(&self) -> Phase {
        self.engine.lock().await.phase()
    }

    pub async fn baseline(&self) -> String {
        self.engine.lock().await.baseline().to_string()
    }

    pub async fn connection_count(&self) -> usize {
        self.engine.lock().await.connection_count()
    }

    /// Exclusive access to the engine.
    pub async fn engine(&self) -> MutexGuard<'_, SyncEngine<S>> {
        self.engine.lock().await
    }

    /// Stop accepting, close every connection and stop dispatching.
    ///
    /// Terminal: the dispatch task is gone, so later `listen`/`connect`
    /// calls fail with [`SyncError::Shutdown`]. Start a new node instead.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.engine.lock().await.shutdown();
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    fn ensure_running(&self) -> Result<(), SyncError> {
        if self.is_shut_down() {
            return Err(SyncError::Shutdown);
        }
        Ok(())
    }
}

async fn dispatch<S>(
    engine: Arc<Mutex<SyncEngine<S>>>,
    mut events: mpsc::UnboundedReceiver<SessionEvent>,
    shutdown: CancellationToken,
) where
    S: EditorSurface + Send + 'static,
{
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            event = events.recv() => match event {
                Some(event) => engine.lock().await.handle_event(event),
                None => break,
            },
        }
    }
    log::debug!("dispatch stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::MemorySurface;
    use std::time::Duration;

    #[tokio::test]
    async fn test_listen_on_ephemeral_port() {
        let config = NodeConfig {
            bind_host: "127.0.0.1".into(),
            ..NodeConfig::default()
        };
        let node = SyncNode::start(MemorySurface::new(), config);
        let addr = node.listen(0).await.unwrap();
        assert_ne!(addr.port(), 0);
        assert_eq!(node.phase().await, Phase::Listening);

        // Already a hub.
        assert!(matches!(
            node.listen(0).await,
            Err(SyncError::InvalidPhase { .. })
        ));
        node.shutdown().await;
        assert_eq!(node.phase().await, Phase::Idle);
    }

    #[tokio::test]
    async fn test_connect_refused_returns_to_idle() {
        let port = {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let surface = MemorySurface::new();
        let config = NodeConfig {
            connect_timeout: Duration::from_secs(2),
            ..NodeConfig::default()
        };
        let node = SyncNode::start(surface.clone(), config);
        let addr = PeerAddr::parse(&format!("127.0.0.1:{port}")).unwrap();

        assert!(node.connect(&addr).await.is_err());
        assert_eq!(node.phase().await, Phase::Idle);
        assert_eq!(surface.status(), "connection error!");
    }

    #[tokio::test]
    async fn test_calls_after_shutdown_rejected() {
        let config = NodeConfig {
            bind_host: "127.0.0.1".into(),
            ..NodeConfig::default()
        };
        let node = SyncNode::start(MemorySurface::new(), config);
        node.listen(0).await.unwrap();
        node.shutdown().await;
        assert!(node.is_shut_down());

        assert!(matches!(node.listen(0).await, Err(SyncError::Shutdown)));
        let addr = PeerAddr::parse("127.0.0.1:9").unwrap();
        assert!(matches!(node.connect(&addr).await, Err(SyncError::Shutdown)));
        // Rejected before touching the engine.
        assert_eq!(node.phase().await, Phase::Idle);
        assert_eq!(node.engine().await.role(), None);
    }
}
