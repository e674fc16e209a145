//! The synchronization state machine.
//!
//! ```text
//!            begin_connect            connect_succeeded
//!   Idle ───────────────────► Connecting ─────────────────► Connected
//!    ▲  ▲                         │                             │
//!    │  └──── connect_failed ─────┘                             │
//!    │  └──────────────────── connection_closed ────────────────┘
//!    │
//!    │ begin_listen + listen_succeeded
//!    └────────────────────────► Listening (hub, any number of peers)
//! ```
//!
//! The engine owns the baseline, the last text it believes its peers also
//! have. Local edits are diffed against it and shipped; remote deltas are
//! applied to it and the result pushed into the editor surface. Everything
//! here is synchronous: the caller serializes access (see `SyncNode`).

use std::fmt;
use std::net::SocketAddr;

use crate::config::Role;
use crate::error::{FrameError, SyncError, TransportError};
use crate::frame::{encode_delta, Message};
use crate::patch::{Applied, Delta, DiffPatcher, Patcher};
use crate::registry::{Connection, ConnectionId, ConnectionRegistry};
use crate::session::SessionEvent;
use crate::surface::EditorSurface;

/// Connection phase of an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Connecting,
    Connected,
    Listening,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Idle => "idle",
            Phase::Connecting => "connecting",
            Phase::Connected => "connected",
            Phase::Listening => "listening",
        };
        f.write_str(name)
    }
}

/// One document's sync state, generic over the editor it drives and the
/// delta strategy it uses.
pub struct SyncEngine<S, P = DiffPatcher> {
    surface: S,
    patcher: P,
    role: Option<Role>,
    phase: Phase,
    baseline: String,
    /// Hub side: every accepted peer.
    registry: ConnectionRegistry,
    /// Client side: the hub.
    upstream: Option<Connection>,
}

impl<S: EditorSurface> SyncEngine<S> {
    pub fn new(surface: S) -> Self {
        Self::with_patcher(surface, DiffPatcher::default())
    }
}

impl<S: EditorSurface, P: Patcher> SyncEngine<S, P> {
    pub fn with_patcher(surface: S, patcher: P) -> Self {
        Self {
            surface,
            patcher,
            role: None,
            phase: Phase::Idle,
            baseline: String::new(),
            registry: ConnectionRegistry::new(),
            upstream: None,
        }
    }

    pub fn role(&self) -> Option<Role> {
        self.role
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn baseline(&self) -> &str {
        &self.baseline
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn surface_mut(&mut self) -> &mut S {
        &mut self.surface
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Live peers: registered connections on a hub, 0 or 1 on a client.
    pub fn connection_count(&self) -> usize {
        match self.role {
            Some(Role::Server) => self.registry.len(),
            Some(Role::Client) => usize::from(self.upstream.is_some()),
            None => 0,
        }
    }

    pub fn upstream_id(&self) -> Option<ConnectionId> {
        self.upstream.as_ref().map(Connection::id)
    }

    /// Delta that builds the baseline from nothing; what a new peer is
    /// bootstrapped with.
    pub fn first_delta(&self) -> Delta {
        self.patcher.first_delta(&self.baseline)
    }

    // ── Client lifecycle ────────────────────────────────────────

    pub fn begin_connect(&mut self) -> Result<(), SyncError> {
        self.ensure_unassigned("connect")?;
        self.role = Some(Role::Client);
        self.set_phase(Phase::Connecting);
        self.surface.set_status("connecting");
        Ok(())
    }

    /// The dial succeeded. The local document is cleared; the hub's
    /// bootstrap delta fills it.
    pub fn connect_succeeded(&mut self, conn: Connection) -> Result<(), SyncError> {
        if self.phase != Phase::Connecting {
            conn.close();
            return Err(SyncError::InvalidPhase {
                phase: self.phase,
                operation: "complete connect",
            });
        }
        log::info!("connected to hub as {}", conn.id());
        self.upstream = Some(conn);
        self.baseline.clear();
        self.surface.set_text("");
        self.set_phase(Phase::Connected);
        self.surface.set_status("connected");
        Ok(())
    }

    /// The dial failed. No retry.
    pub fn connect_failed(&mut self, err: &TransportError) {
        log::warn!("connect failed: {err}");
        self.role = None;
        self.set_phase(Phase::Idle);
        self.surface.set_status("connection error!");
    }

    // ── Hub lifecycle ───────────────────────────────────────────

    pub fn begin_listen(&mut self) -> Result<(), SyncError> {
        self.ensure_unassigned("listen")?;
        self.role = Some(Role::Server);
        self.surface.set_status("setting up server");
        Ok(())
    }

    /// The listening socket is bound; peers may now be accepted.
    pub fn listen_succeeded(&mut self, addr: SocketAddr) {
        log::info!("hub listening on {addr}");
        self.set_phase(Phase::Listening);
        self.surface.set_status("server ready");
    }

    pub fn listen_failed(&mut self, err: &TransportError) {
        log::error!("{err}");
        self.role = None;
        self.set_phase(Phase::Idle);
        self.surface.set_status(&format!("can't start server, {err}"));
    }

    /// Register a freshly accepted peer and bootstrap it with the whole
    /// document.
    ///
    /// A pending local edit is published to the existing peers first, so
    /// the newcomer starts from the same baseline everybody else has.
    pub fn accept(&mut self, conn: Connection) -> Result<(), SyncError> {
        if self.phase != Phase::Listening {
            conn.close();
            return Err(SyncError::InvalidPhase {
                phase: self.phase,
                operation: "accept",
            });
        }
        let bootstrap = self
            .local_edit()
            .and_then(|_| Ok(encode_delta(&self.first_delta())?))
            .and_then(|frame| Ok(conn.send(frame)?));
        if let Err(e) = bootstrap {
            conn.close();
            return Err(e);
        }
        log::info!(
            "accepted peer {} from {}",
            conn.id(),
            conn.peer_addr()
                .map_or_else(|| "unknown".to_string(), |a| a.to_string())
        );
        self.registry.add(conn);
        self.surface.set_status("new client connected");
        Ok(())
    }

    // ── Delta flow ──────────────────────────────────────────────

    /// Publish the user's latest text.
    ///
    /// Returns the delta that went out, or `None` when there was nothing
    /// to send (unchanged text, or not connected/listening yet).
    pub fn local_edit(&mut self) -> Result<Option<Delta>, SyncError> {
        if !matches!(self.phase, Phase::Connected | Phase::Listening) {
            return Ok(None);
        }
        let text = self.surface.text();
        let delta = self.patcher.compute(&self.baseline, &text);
        if delta.is_noop() {
            return Ok(None);
        }
        let frame = encode_delta(&delta)?;
        self.baseline = text;

        match (self.role, &self.upstream) {
            (Some(Role::Client), Some(upstream)) => {
                if let Err(e) = upstream.send(frame) {
                    self.surface.set_status(&format!("send failed, {e}"));
                    return Err(e.into());
                }
            }
            (Some(Role::Server), _) => {
                self.registry.broadcast(&frame, None);
            }
            _ => {}
        }
        log::debug!("published delta of {} patches", delta.patches().len());
        Ok(Some(delta))
    }

    /// Apply a frame received from `from`.
    ///
    /// The baseline moves by the delta (best effort), the editor is
    /// rewritten with the cursor kept in place, and a hub relays the frame
    /// to everybody but the sender. Frames from connections no longer
    /// tracked are ignored. A body that is not a delta costs the sender
    /// its connection.
    pub fn receive(
        &mut self,
        from: ConnectionId,
        message: &Message,
    ) -> Result<Option<Applied>, SyncError> {
        if !self.is_tracked(from) {
            log::debug!("ignoring frame from untracked connection {from}");
            return Ok(None);
        }
        let delta = match message.delta() {
            Ok(delta) => delta,
            Err(e) => {
                log::warn!("dropping connection {from}: {e}");
                self.drop_connection(from);
                return Err(e.into());
            }
        };

        let applied = self.patcher.apply(&self.baseline, &delta);
        if !applied.all_applied() {
            log::debug!("delta from {from} partially applied: {:?}", applied.results);
        }
        self.baseline = applied.text.clone();

        let cursor = self.surface.cursor();
        self.surface.set_text(&self.baseline);
        self.surface.set_cursor(cursor);

        if self.role == Some(Role::Server) {
            self.registry.broadcast(&message.to_frame(), Some(from));
        }
        Ok(Some(applied))
    }

    /// Route one session event.
    pub fn handle_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Message { id, message } => {
                if let Err(e) = self.receive(id, &message) {
                    log::warn!("frame from {id} rejected: {e}");
                }
            }
            SessionEvent::Closed { id, error } => self.connection_closed(id, error.as_ref()),
        }
    }

    // ── Teardown ────────────────────────────────────────────────

    /// A session ended, cleanly or with `error`. Idempotent.
    pub fn connection_closed(&mut self, id: ConnectionId, error: Option<&FrameError>) {
        match error {
            Some(e) => log::warn!("connection {id} closed: {e}"),
            None => log::debug!("connection {id} closed"),
        }
        self.drop_connection(id);
    }

    /// Close and forget one connection.
    pub fn drop_connection(&mut self, id: ConnectionId) {
        if let Some(conn) = self.registry.remove(id) {
            conn.close();
            log::info!("peer {id} removed, {} remaining", self.registry.len());
            return;
        }
        if self.upstream_id() == Some(id) {
            if let Some(conn) = self.upstream.take() {
                conn.close();
            }
            self.role = None;
            self.set_phase(Phase::Idle);
            self.surface.set_status("disconnected");
        }
    }

    /// Close every connection and return to `Idle`.
    pub fn shutdown(&mut self) {
        self.registry.clear();
        if let Some(conn) = self.upstream.take() {
            conn.close();
        }
        self.role = None;
        self.set_phase(Phase::Idle);
    }

    fn is_tracked(&self, id: ConnectionId) -> bool {
        match self.role {
            Some(Role::Server) => self.registry.contains(id),
            Some(Role::Client) => self.upstream_id() == Some(id),
            None => false,
        }
    }

    fn ensure_unassigned(&self, operation: &'static str) -> Result<(), SyncError> {
        if self.role.is_some() || self.phase != Phase::Idle {
            return Err(SyncError::InvalidPhase {
                phase: self.phase,
                operation,
            });
        }
        Ok(())
    }

    fn set_phase(&mut self, phase: Phase) {
        if self.phase != phase {
            log::info!("phase {} -> {}", self.phase, phase);
            self.phase = phase;
        }
    }
}
