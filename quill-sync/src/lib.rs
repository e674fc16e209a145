//! # quill-sync: Hub-and-spoke text synchronization
//!
//! One process listens as the hub, any number of clients dial it. Every
//! participant keeps a baseline of the shared document and exchanges
//! char-level deltas against it; the hub relays each delta to everyone
//! except its sender. Deltas are applied best effort: an edit whose
//! surroundings moved is relocated fuzzily or skipped, never rejected.
//! This is not a CRDT and convergence is not guaranteed under concurrent
//! edits.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   Content-Length   ┌──────────────┐
//! │ client node  │ ◄────────────────► │   hub node   │
//! │ SyncEngine   │    framed JSON     │  SyncEngine  │
//! └──────┬───────┘       deltas       └──────┬───────┘
//!        │                                   │
//!        ▼                                   ▼
//! ┌──────────────┐                   ┌──────────────────┐
//! │EditorSurface │                   │ConnectionRegistry│
//! │ (text+cursor)│                   │(broadcast-except)│
//! └──────────────┘                   └──────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`frame`]: `Content-Length` framing and the streaming decoder
//! - [`patch`]: delta compute/apply with fuzzy relocation
//! - [`registry`]: hub-side connections and fan-out
//! - [`session`]: reader/writer tasks for one framed stream
//! - [`engine`]: the sync state machine
//! - [`node`]: engine + transports + event dispatch
//! - [`server`] / [`client`]: TCP listen and dial
//! - [`surface`]: the editor collaborator
//! - [`config`]: role/address input and tuning

pub mod client;
pub mod config;
pub mod engine;
pub mod error;
pub mod frame;
pub mod node;
pub mod patch;
pub mod registry;
pub mod server;
pub mod session;
pub mod surface;

// Re-exports for convenience
pub use config::{parse_listen_port, NodeConfig, PeerAddr, Role};
pub use engine::{Phase, SyncEngine};
pub use error::{ConfigError, FrameError, SyncError, TransportError};
pub use frame::{encode_delta, encode_frame, FrameCodec, FrameDecoder, Header, Message};
pub use node::SyncNode;
pub use patch::{Applied, Delta, DiffPatcher, Edit, Patch, Patcher};
pub use registry::{Connection, ConnectionId, ConnectionRegistry};
pub use server::HubListener;
pub use session::{PeerSession, SessionEvent};
pub use surface::{Cursor, EditorSurface, MemorySurface};
