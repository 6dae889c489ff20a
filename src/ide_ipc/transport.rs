//! Message-oriented transport to the agent.
//!
//! A [`Connection`] is a pair of channels: an [`Outbox`] for text frames going
//! out and a receiver of [`TransportEvent`]s coming in. The WebSocket backend
//! pumps those channels from two background tasks; [`memory_pair`] wires them
//! to an in-process peer instead.
//!
//! Hard failures are reported exactly once as [`TransportEvent::Failed`].
//! Nothing here reconnects.

use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{
    self,
    protocol::{frame::coding::CloseCode, CloseFrame},
};

use crate::error::TransportError;

/// Close code sent when the client hangs up on purpose.
const NORMAL_CLOSE: u16 = 1000;
/// Close code reported when the peer vanished without a close frame.
const ABNORMAL_CLOSE: u16 = 1006;

/// Something the transport delivers to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Frame(String),
    Failed(TransportError),
}

#[derive(Debug)]
enum Outbound {
    Text(String),
    Close,
}

/// Sending half of a connection. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Outbox {
    tx: mpsc::UnboundedSender<Outbound>,
    queued: Arc<AtomicUsize>,
}

impl Outbox {
    /// Queue a text frame for sending.
    pub fn send(&self, frame: String) -> Result<(), TransportError> {
        self.queued.fetch_add(1, Ordering::SeqCst);
        self.tx.send(Outbound::Text(frame)).map_err(|_| {
            self.queued.fetch_sub(1, Ordering::SeqCst);
            TransportError::Send("connection writer has stopped".to_string())
        })
    }

    /// Ask the connection to close once everything already queued is sent.
    pub fn close(&self) {
        if self.tx.send(Outbound::Close).is_err() {
            tracing::debug!("Close requested on a connection that is already gone");
        }
    }

    /// Number of frames accepted by [`Outbox::send`] but not yet written.
    pub fn queued(&self) -> usize {
        self.queued.load(Ordering::SeqCst)
    }
}

/// An open connection to the agent.
#[derive(Debug)]
pub struct Connection {
    pub outbox: Outbox,
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
}

/// Reports the first failure and swallows the rest.
#[derive(Debug)]
struct FailureLatch {
    events: mpsc::UnboundedSender<TransportEvent>,
    tripped: AtomicBool,
    closing: AtomicBool,
}

impl FailureLatch {
    fn report(&self, error: TransportError) {
        if self.closing.load(Ordering::SeqCst) {
            tracing::debug!("Ignoring {error} after local close");
            return;
        }
        if self.tripped.swap(true, Ordering::SeqCst) {
            tracing::debug!("Suppressing repeated transport failure: {error}");
            return;
        }
        tracing::error!("Transport failure: {error}");
        let _ = self.events.send(TransportEvent::Failed(error));
    }
}

/// Open a WebSocket connection to `url`.
pub async fn connect(url: &str) -> Result<Connection, TransportError> {
    let (stream, _response) =
        tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| TransportError::Connect {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

    tracing::info!("Connected to {url}");

    let (sink, source) = stream.split();
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let queued = Arc::new(AtomicUsize::new(0));
    let latch = Arc::new(FailureLatch {
        events: event_tx,
        tripped: AtomicBool::new(false),
        closing: AtomicBool::new(false),
    });

    tokio::spawn(write_loop(sink, out_rx, queued.clone(), latch.clone()));
    tokio::spawn(read_loop(source, latch));

    Ok(Connection {
        outbox: Outbox { tx: out_tx, queued },
        events: event_rx,
    })
}

async fn write_loop<S>(
    mut sink: S,
    mut rx: mpsc::UnboundedReceiver<Outbound>,
    queued: Arc<AtomicUsize>,
    latch: Arc<FailureLatch>,
) where
    S: futures::Sink<tungstenite::Message, Error = tungstenite::Error> + Unpin,
{
    while let Some(outbound) = rx.recv().await {
        match outbound {
            Outbound::Text(frame) => {
                let result = sink.send(tungstenite::Message::Text(frame)).await;
                queued.fetch_sub(1, Ordering::SeqCst);
                if let Err(e) = result {
                    latch.report(TransportError::Send(e.to_string()));
                    return;
                }
            }
            Outbound::Close => break,
        }
    }

    // Either `close()` was called or every outbox handle is gone.
    latch.closing.store(true, Ordering::SeqCst);
    let frame = CloseFrame {
        code: CloseCode::from(NORMAL_CLOSE),
        reason: "".into(),
    };
    if let Err(e) = sink.send(tungstenite::Message::Close(Some(frame))).await {
        tracing::debug!("Close frame not sent: {e}");
    }
    tracing::info!("Connection closed by client");
}

async fn read_loop<S>(mut source: S, latch: Arc<FailureLatch>)
where
    S: futures::Stream<Item = Result<tungstenite::Message, tungstenite::Error>> + Unpin,
{
    loop {
        match source.next().await {
            Some(Ok(tungstenite::Message::Text(text))) => {
                if latch.events.send(TransportEvent::Frame(text)).is_err() {
                    return;
                }
            }
            Some(Ok(tungstenite::Message::Binary(bytes))) => match String::from_utf8(bytes) {
                Ok(text) => {
                    if latch.events.send(TransportEvent::Frame(text)).is_err() {
                        return;
                    }
                }
                Err(e) => tracing::warn!("Dropping non UTF-8 binary frame: {e}"),
            },
            Some(Ok(tungstenite::Message::Close(frame))) => {
                let (code, reason) = frame.map_or((ABNORMAL_CLOSE, String::new()), |f| {
                    (f.code.into(), f.reason.to_string())
                });
                latch.report(TransportError::Closed { code, reason });
                return;
            }
            // Pings are answered by tungstenite itself
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                latch.report(TransportError::Receive(e.to_string()));
                return;
            }
            None => {
                latch.report(TransportError::Closed {
                    code: ABNORMAL_CLOSE,
                    reason: "stream ended".to_string(),
                });
                return;
            }
        }
    }
}

/// The far end of an in-memory connection.
#[derive(Debug)]
pub struct MemoryPeer {
    outbound: mpsc::UnboundedReceiver<Outbound>,
    events: mpsc::UnboundedSender<TransportEvent>,
    queued: Arc<AtomicUsize>,
    closed: bool,
}

impl MemoryPeer {
    /// Next frame written by the client, or `None` once it closed or hung up.
    pub async fn recv(&mut self) -> Option<String> {
        if self.closed {
            return None;
        }
        match self.outbound.recv().await {
            Some(Outbound::Text(frame)) => {
                self.queued.fetch_sub(1, Ordering::SeqCst);
                Some(frame)
            }
            Some(Outbound::Close) | None => {
                self.closed = true;
                None
            }
        }
    }

    /// Like [`MemoryPeer::recv`] but never waits.
    pub fn try_recv(&mut self) -> Option<String> {
        if self.closed {
            return None;
        }
        match self.outbound.try_recv() {
            Ok(Outbound::Text(frame)) => {
                self.queued.fetch_sub(1, Ordering::SeqCst);
                Some(frame)
            }
            Ok(Outbound::Close) => {
                self.closed = true;
                None
            }
            Err(_) => None,
        }
    }

    /// Deliver a frame to the client.
    pub fn push(&self, frame: impl Into<String>) {
        let _ = self.events.send(TransportEvent::Frame(frame.into()));
    }

    /// Simulate a hard connection failure.
    pub fn fail(&self, error: TransportError) {
        let _ = self.events.send(TransportEvent::Failed(error));
    }

    /// Whether the client sent a close request.
    pub const fn is_closed(&self) -> bool {
        self.closed
    }
}

/// A connected pair without any socket underneath.
pub fn memory_pair() -> (Connection, MemoryPeer) {
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let queued = Arc::new(AtomicUsize::new(0));

    let connection = Connection {
        outbox: Outbox {
            tx: out_tx,
            queued: queued.clone(),
        },
        events: event_rx,
    };
    let peer = MemoryPeer {
        outbound: out_rx,
        events: event_tx,
        queued,
        closed: false,
    };
    (connection, peer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_pair_tracks_queue_depth() {
        let (connection, mut peer) = memory_pair();
        connection.outbox.send("a".to_string()).unwrap();
        connection.outbox.send("b".to_string()).unwrap();
        assert_eq!(connection.outbox.queued(), 2);

        assert_eq!(peer.recv().await.as_deref(), Some("a"));
        assert_eq!(connection.outbox.queued(), 1);
        assert_eq!(peer.recv().await.as_deref(), Some("b"));
        assert_eq!(connection.outbox.queued(), 0);
    }

    #[tokio::test]
    async fn test_memory_pair_delivers_frames_and_failures() {
        let (mut connection, peer) = memory_pair();
        peer.push("hello");
        peer.fail(TransportError::Receive("boom".to_string()));

        assert_eq!(
            connection.events.recv().await,
            Some(TransportEvent::Frame("hello".to_string()))
        );
        assert_eq!(
            connection.events.recv().await,
            Some(TransportEvent::Failed(TransportError::Receive(
                "boom".to_string()
            )))
        );
    }

    #[tokio::test]
    async fn test_close_ends_peer_stream() {
        let (connection, mut peer) = memory_pair();
        connection.outbox.send("last".to_string()).unwrap();
        connection.outbox.close();

        assert_eq!(peer.recv().await.as_deref(), Some("last"));
        assert_eq!(peer.recv().await, None);
        assert!(peer.is_closed());
    }

    #[tokio::test]
    async fn test_send_after_peer_dropped_fails_without_leaking_count() {
        let (connection, peer) = memory_pair();
        drop(peer);
        assert!(connection.outbox.send("x".to_string()).is_err());
        assert_eq!(connection.outbox.queued(), 0);
    }

    #[tokio::test]
    async fn test_connect_unreachable_host_returns_error() {
        let result = connect("ws://127.0.0.1:1/ide/ws").await;
        assert!(matches!(result, Err(TransportError::Connect { .. })));
    }

    #[tokio::test]
    async fn test_connect_invalid_url_returns_error() {
        assert!(connect("not-a-url").await.is_err());
    }
}
