// ── Duplex transport abstraction ──
//
// The sync engine never touches sockets directly. A `Connector` opens a
// `Link`: an outbound text sink plus an inbound stream of lifecycle
// events. The WebSocket connector is one implementation; `Link::duplex`
// gives an in-memory pair for tests and embedding.

use std::future::Future;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::Error;

const LINK_CHANNEL_CAPACITY: usize = 256;

/// Something that happened on an open link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// A text frame from the peer.
    Message(String),
    /// A transport-level error. A `Closed` event (or end of stream) follows.
    Error(String),
    /// The link closed, either side.
    Closed { code: Option<u16>, reason: String },
}

/// Factory for duplex links. Implementations must be cheap to call
/// repeatedly: the connection manager opens a fresh link per attempt.
pub trait Connector: Send + Sync + 'static {
    fn open(&self, url: &Url) -> impl Future<Output = Result<Link, Error>> + Send;
}

// ── Link ─────────────────────────────────────────────────────────────

/// An open duplex link.
pub struct Link {
    sender: LinkSender,
    inbound: mpsc::Receiver<LinkEvent>,
}

impl Link {
    pub fn new(
        outbound: mpsc::Sender<String>,
        inbound: mpsc::Receiver<LinkEvent>,
        closer: CancellationToken,
    ) -> Self {
        Self {
            sender: LinkSender { outbound, closer },
            inbound,
        }
    }

    /// In-memory link pair. The [`LinkPeer`] plays the server side.
    pub fn duplex() -> (Self, LinkPeer) {
        let (out_tx, out_rx) = mpsc::channel(LINK_CHANNEL_CAPACITY);
        let (in_tx, in_rx) = mpsc::channel(LINK_CHANNEL_CAPACITY);
        let closer = CancellationToken::new();

        let link = Self::new(out_tx, in_rx, closer.clone());
        let peer = LinkPeer {
            events: in_tx,
            frames: out_rx,
            closer,
        };
        (link, peer)
    }

    /// Cloneable handle for sending on this link.
    pub fn sender(&self) -> LinkSender {
        self.sender.clone()
    }

    /// Next inbound event, or `None` once the transport side is gone.
    pub async fn next_event(&mut self) -> Option<LinkEvent> {
        self.inbound.recv().await
    }

    /// Ask the transport to close. Idempotent.
    pub fn close(&self) {
        self.sender.close();
    }
}

/// Send half of a [`Link`].
#[derive(Clone)]
pub struct LinkSender {
    outbound: mpsc::Sender<String>,
    closer: CancellationToken,
}

impl LinkSender {
    pub fn is_open(&self) -> bool {
        !self.closer.is_cancelled() && !self.outbound.is_closed()
    }

    /// Queue a text frame. Never waits: a full queue drops the frame.
    pub fn send(&self, text: String) -> Result<(), Error> {
        if self.closer.is_cancelled() {
            return Err(Error::LinkClosed);
        }
        self.outbound.try_send(text).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => Error::Backpressure,
            mpsc::error::TrySendError::Closed(_) => Error::LinkClosed,
        })
    }

    pub fn close(&self) {
        self.closer.cancel();
    }
}

// ── In-memory peer ───────────────────────────────────────────────────

/// The far end of an in-memory [`Link`].
pub struct LinkPeer {
    events: mpsc::Sender<LinkEvent>,
    frames: mpsc::Receiver<String>,
    closer: CancellationToken,
}

impl LinkPeer {
    /// Deliver a text frame to the client.
    pub async fn send_text(&self, text: impl Into<String>) -> bool {
        self.events.send(LinkEvent::Message(text.into())).await.is_ok()
    }

    /// Deliver an arbitrary lifecycle event to the client.
    pub async fn emit(&self, event: LinkEvent) -> bool {
        self.events.send(event).await.is_ok()
    }

    /// Next frame the client sent, or `None` once the client dropped the link.
    pub async fn recv_frame(&mut self) -> Option<String> {
        self.frames.recv().await
    }

    /// Non-blocking variant of [`recv_frame`](Self::recv_frame).
    pub fn try_recv_frame(&mut self) -> Option<String> {
        self.frames.try_recv().ok()
    }

    /// Whether the client asked to close.
    pub fn is_closed_by_client(&self) -> bool {
        self.closer.is_cancelled()
    }

    /// Close from the server side.
    pub async fn close(self, code: u16, reason: &str) {
        let _ = self
            .events
            .send(LinkEvent::Closed {
                code: Some(code),
                reason: reason.to_owned(),
            })
            .await;
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn duplex_moves_frames_both_ways() {
        let (mut link, mut peer) = Link::duplex();

        assert!(peer.send_text("hello").await);
        assert_eq!(link.next_event().await, Some(LinkEvent::Message("hello".into())));

        link.sender().send("world".into()).unwrap();
        assert_eq!(peer.recv_frame().await.as_deref(), Some("world"));
    }

    #[tokio::test]
    async fn send_after_close_fails() {
        let (link, peer) = Link::duplex();
        let sender = link.sender();
        assert!(sender.is_open());

        link.close();
        assert!(!sender.is_open());
        assert!(peer.is_closed_by_client());
        assert!(matches!(sender.send("x".into()), Err(Error::LinkClosed)));
    }

    #[tokio::test]
    async fn peer_close_emits_closed_event() {
        let (mut link, peer) = Link::duplex();
        peer.close(1000, "bye").await;
        assert_eq!(
            link.next_event().await,
            Some(LinkEvent::Closed {
                code: Some(1000),
                reason: "bye".into()
            })
        );
    }
}
