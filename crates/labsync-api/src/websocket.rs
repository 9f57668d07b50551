//! WebSocket transport for the lab server.
//!
//! [`WsConnector`] opens a `tokio-tungstenite` connection and bridges it to
//! a [`Link`]: a background pump task forwards outbound text frames to the
//! socket and turns inbound frames into [`LinkEvent`]s. Reconnection is
//! *not* handled here -- the connection manager in `labsync-core` owns the
//! lifecycle and simply asks for a fresh link per attempt.
//!
//! # Example
//!
//! ```rust,ignore
//! use labsync_api::{Connector, LinkEvent, WsConnector};
//! use url::Url;
//!
//! let url = Url::parse("ws://127.0.0.1:8000/ws/3f0c")?;
//! let mut link = WsConnector::default().open(&url).await?;
//!
//! while let Some(LinkEvent::Message(text)) = link.next_event().await {
//!     println!("{text}");
//! }
//! ```

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::Error;
use crate::transport::{Connector, Link, LinkEvent};

const FRAME_CHANNEL_CAPACITY: usize = 256;

/// Opens WebSocket links.
#[derive(Debug, Clone, Default)]
pub struct WsConnector;

impl Connector for WsConnector {
    async fn open(&self, url: &Url) -> Result<Link, Error> {
        tracing::info!(url = %url, "Connecting to WebSocket");

        let (ws_stream, _response) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| Error::WebSocketConnect(e.to_string()))?;

        tracing::info!("WebSocket connected");

        let (out_tx, out_rx) = mpsc::channel(FRAME_CHANNEL_CAPACITY);
        let (in_tx, in_rx) = mpsc::channel(FRAME_CHANNEL_CAPACITY);
        let closer = CancellationToken::new();

        tokio::spawn(pump(ws_stream, out_rx, in_tx, closer.clone()));

        Ok(Link::new(out_tx, in_rx, closer))
    }
}

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

// ── Frame pump ───────────────────────────────────────────────────────

/// Shuttle frames between the socket and the link channels until either
/// side goes away. Always ends by emitting exactly one `Closed` event.
async fn pump(
    ws_stream: WsStream,
    mut out_rx: mpsc::Receiver<String>,
    in_tx: mpsc::Sender<LinkEvent>,
    closer: CancellationToken,
) {
    let (mut write, mut read) = ws_stream.split();

    let closed = loop {
        tokio::select! {
            biased;
            () = closer.cancelled() => {
                if let Err(e) = write.close().await {
                    tracing::debug!(error = %e, "WebSocket close handshake failed");
                }
                break LinkEvent::Closed { code: None, reason: "closed by client".into() };
            }
            outbound = out_rx.recv() => {
                let Some(text) = outbound else {
                    let _ = write.close().await;
                    break LinkEvent::Closed { code: None, reason: "link dropped".into() };
                };
                if let Err(e) = write.send(tungstenite::Message::text(text)).await {
                    let _ = in_tx.send(LinkEvent::Error(e.to_string())).await;
                    break LinkEvent::Closed { code: None, reason: e.to_string() };
                }
            }
            frame = read.next() => {
                match frame {
                    Some(Ok(tungstenite::Message::Text(text))) => {
                        if in_tx.send(LinkEvent::Message(text.as_str().to_owned())).await.is_err() {
                            // Receiver dropped: nobody is listening any more.
                            let _ = write.close().await;
                            break LinkEvent::Closed { code: None, reason: "link dropped".into() };
                        }
                    }
                    Some(Ok(tungstenite::Message::Ping(_))) => {
                        // tungstenite handles pong replies automatically
                        tracing::trace!("WebSocket ping");
                    }
                    Some(Ok(tungstenite::Message::Close(frame))) => {
                        let (code, reason) = frame.map_or((None, String::new()), |cf| {
                            (Some(u16::from(cf.code)), cf.reason.as_str().to_owned())
                        });
                        tracing::info!(?code, %reason, "WebSocket close frame received");
                        break LinkEvent::Closed { code, reason };
                    }
                    Some(Err(e)) => {
                        let _ = in_tx.send(LinkEvent::Error(e.to_string())).await;
                        break LinkEvent::Closed { code: None, reason: e.to_string() };
                    }
                    None => {
                        tracing::info!("WebSocket stream ended");
                        break LinkEvent::Closed { code: None, reason: "stream ended".into() };
                    }
                    _ => {
                        // Binary, Pong, Frame -- ignore
                    }
                }
            }
        }
    };

    closer.cancel();
    let _ = in_tx.send(closed).await;
    tracing::debug!("WebSocket pump exiting");
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn open_fails_against_closed_port() {
        // Port 9 (discard) is essentially never listening on loopback.
        let url = Url::parse("ws://127.0.0.1:9/ws/test").unwrap();
        let err = WsConnector.open(&url).await.err();
        assert!(matches!(err, Some(Error::WebSocketConnect(_))));
    }
}
