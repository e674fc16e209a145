//! One framed peer connection.
//!
//! A session owns a byte stream and splits it into two tasks:
//!
//! ```text
//!  stream ──► reader (FramedRead + FrameCodec) ──► SessionEvent ──► engine
//!  stream ◄── writer ◄── outbound queue ◄── Connection::send
//! ```
//!
//! Frames from one peer reach the event channel in the order they were
//! read. Either task cancelling the session token ends both; the reader
//! then reports exactly one `Closed` event.

use std::net::SocketAddr;

use bytes::Bytes;
use futures_util::StreamExt;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;

use crate::config::NodeConfig;
use crate::error::FrameError;
use crate::frame::{FrameCodec, Message};
use crate::registry::{Connection, ConnectionId};

/// What a session reports to its owner.
#[derive(Debug)]
pub enum SessionEvent {
    /// A complete frame arrived.
    Message { id: ConnectionId, message: Message },
    /// The session ended. `error` is set when the peer sent something
    /// unparseable or the stream failed.
    Closed {
        id: ConnectionId,
        error: Option<FrameError>,
    },
}

impl SessionEvent {
    pub fn id(&self) -> ConnectionId {
        match self {
            SessionEvent::Message { id, .. } | SessionEvent::Closed { id, .. } => *id,
        }
    }
}

/// A stream waiting to be driven.
pub struct PeerSession<T> {
    id: ConnectionId,
    stream: T,
    codec: FrameCodec,
    outbound: mpsc::UnboundedReceiver<Bytes>,
    shutdown: CancellationToken,
}

impl<T> PeerSession<T>
where
    T: AsyncRead + AsyncWrite + Send + 'static,
{
    /// Wrap `stream`. The returned [`Connection`] is the write handle the
    /// engine keeps; nothing is read until [`PeerSession::start`].
    pub fn new(stream: T, peer_addr: Option<SocketAddr>, config: &NodeConfig) -> (Connection, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();
        let conn = Connection::new(peer_addr, tx, shutdown.clone());
        let session = Self {
            id: conn.id(),
            stream,
            codec: FrameCodec::new(config.max_frame_len, config.max_header_len),
            outbound: rx,
            shutdown,
        };
        (conn, session)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Spawn the reader and writer tasks. The handle resolves once the
    /// reader has reported `Closed`.
    pub fn start(self, events: mpsc::UnboundedSender<SessionEvent>) -> JoinHandle<()> {
        let Self {
            id,
            stream,
            codec,
            mut outbound,
            shutdown,
        } = self;
        let (read_half, mut write_half) = tokio::io::split(stream);

        let writer_shutdown = shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = writer_shutdown.cancelled() => break,
                    frame = outbound.recv() => {
                        let Some(frame) = frame else { break };
                        if let Err(e) = write_half.write_all(&frame).await {
                            log::debug!("write to {id} failed: {e}");
                            writer_shutdown.cancel();
                            break;
                        }
                    }
                }
            }
            let _ = write_half.shutdown().await;
        });

        tokio::spawn(async move {
            let mut frames = FramedRead::new(read_half, codec);
            let error = loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break None,
                    next = frames.next() => match next {
                        Some(Ok(message)) => {
                            log::trace!("frame of {} bytes from {id}", message.body.len());
                            if events.send(SessionEvent::Message { id, message }).is_err() {
                                break None;
                            }
                        }
                        Some(Err(e)) => break Some(e),
                        None => break None,
                    },
                }
            };
            shutdown.cancel();
            let _ = events.send(SessionEvent::Closed { id, error });
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::encode_frame;
    use std::time::Duration;
    use tokio::io::AsyncReadExt;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(2);

    fn session_pair() -> (
        Connection,
        PeerSession<tokio::io::DuplexStream>,
        tokio::io::DuplexStream,
    ) {
        let (ours, theirs) = tokio::io::duplex(1024);
        let (conn, session) = PeerSession::new(ours, None, &NodeConfig::default());
        (conn, session, theirs)
    }

    #[tokio::test]
    async fn test_frames_arrive_in_order() {
        let (conn, session, mut peer) = session_pair();
        let (tx, mut rx) = mpsc::unbounded_channel();
        session.start(tx);

        let mut wire = encode_frame(b"first").to_vec();
        wire.extend_from_slice(&encode_frame(b"second"));
        peer.write_all(&wire).await.unwrap();

        for expected in [&b"first"[..], &b"second"[..]] {
            match timeout(WAIT, rx.recv()).await.unwrap().unwrap() {
                SessionEvent::Message { id, message } => {
                    assert_eq!(id, conn.id());
                    assert_eq!(&message.body[..], expected);
                }
                other => panic!("unexpected event {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_send_reaches_peer() {
        let (conn, session, mut peer) = session_pair();
        let (tx, _rx) = mpsc::unbounded_channel();
        session.start(tx);

        let frame = encode_frame(b"[]");
        conn.send(frame.clone()).unwrap();

        let mut buf = vec![0u8; frame.len()];
        timeout(WAIT, peer.read_exact(&mut buf)).await.unwrap().unwrap();
        assert_eq!(buf, frame.to_vec());
    }

    #[tokio::test]
    async fn test_garbage_header_closes_with_error() {
        let (conn, session, mut peer) = session_pair();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = session.start(tx);

        peer.write_all(b"Garbage\n\n").await.unwrap();

        match timeout(WAIT, rx.recv()).await.unwrap().unwrap() {
            SessionEvent::Closed { id, error } => {
                assert_eq!(id, conn.id());
                assert!(matches!(error, Some(FrameError::MissingContentLength)));
            }
            other => panic!("unexpected event {other:?}"),
        }
        timeout(WAIT, handle).await.unwrap().unwrap();
        assert!(conn.is_closed());
    }

    #[tokio::test]
    async fn test_peer_eof_closes_cleanly() {
        let (conn, session, peer) = session_pair();
        let (tx, mut rx) = mpsc::unbounded_channel();
        session.start(tx);

        drop(peer);
        match timeout(WAIT, rx.recv()).await.unwrap().unwrap() {
            SessionEvent::Closed { id, error } => {
                assert_eq!(id, conn.id());
                assert!(error.is_none());
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_close_from_engine_side() {
        let (conn, session, mut peer) = session_pair();
        let (tx, mut rx) = mpsc::unbounded_channel();
        session.start(tx);

        conn.close();
        let event = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
        assert!(matches!(event, SessionEvent::Closed { error: None, .. }));

        // The writer shut its half down: the peer sees EOF.
        let mut buf = Vec::new();
        let n = timeout(WAIT, peer.read_to_end(&mut buf)).await.unwrap().unwrap();
        assert_eq!(n, 0);
    }
}
