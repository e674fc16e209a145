//! Live connections and fan-out on the hub.
//!
//! A [`Connection`] is the write side of one peer: an unbounded queue of
//! pre-encoded frames drained by that peer's writer task, plus a
//! cancellation token that tears the whole session down.
//!
//! Writes are fire-and-forget. Nothing waits for a queue to drain and a
//! slow peer's queue grows without bound; there is no backpressure.

use std::fmt;
use std::net::SocketAddr;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::TransportError;

/// Identity of one connection. Two connections to the same address are
/// still distinct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Write handle for one peer.
#[derive(Debug, Clone)]
pub struct Connection {
    id: ConnectionId,
    peer_addr: Option<SocketAddr>,
    outbound: mpsc::UnboundedSender<Bytes>,
    shutdown: CancellationToken,
}

impl Connection {
    pub fn new(
        peer_addr: Option<SocketAddr>,
        outbound: mpsc::UnboundedSender<Bytes>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            id: ConnectionId::new(),
            peer_addr,
            outbound,
            shutdown,
        }
    }

    /// A connection whose frames land in the returned receiver.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Bytes>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(None, tx, CancellationToken::new()), rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    /// Queue one encoded frame.
    pub fn send(&self, frame: Bytes) -> Result<(), TransportError> {
        if self.shutdown.is_cancelled() {
            return Err(TransportError::Write(self.id));
        }
        self.outbound
            .send(frame)
            .map_err(|_| TransportError::Write(self.id))
    }

    /// Tear down the session behind this handle.
    pub fn close(&self) {
        self.shutdown.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled() || self.outbound.is_closed()
    }
}

/// Hub-side set of live connections, in accept order.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: Vec<Connection>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, conn: Connection) {
        if self.contains(conn.id()) {
            return;
        }
        self.connections.push(conn);
    }

    /// Remove a connection; absent ids are ignored.
    pub fn remove(&mut self, id: ConnectionId) -> Option<Connection> {
        let pos = self.connections.iter().position(|c| c.id() == id)?;
        Some(self.connections.remove(pos))
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.connections.iter().any(|c| c.id() == id)
    }

    pub fn get(&self, id: ConnectionId) -> Option<&Connection> {
        self.connections.iter().find(|c| c.id() == id)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn ids(&self) -> Vec<ConnectionId> {
        self.connections.iter().map(Connection::id).collect()
    }

    /// Queue `frame` on every connection except `omit`.
    ///
    /// Each write stands alone: a failed target is logged and skipped, and
    /// stays registered until its own close notification removes it.
    /// Returns how many targets accepted the frame.
    pub fn broadcast(&self, frame: &Bytes, omit: Option<ConnectionId>) -> usize {
        let mut delivered = 0;
        for conn in &self.connections {
            if Some(conn.id()) == omit {
                continue;
            }
            match conn.send(frame.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => log::debug!("broadcast skipped {}: {e}", conn.id()),
            }
        }
        log::trace!(
            "broadcast {} bytes to {delivered}/{} connections",
            frame.len(),
            self.connections.len()
        );
        delivered
    }

    /// Close and forget every connection.
    pub fn clear(&mut self) {
        for conn in self.connections.drain(..) {
            conn.close();
        }
    }
}
