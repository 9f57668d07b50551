//! Wire protocol and transports for the labsync state mirror.
//!
//! - **[`protocol`]**: JSON message shapes exchanged with the lab server:
//!   hydration (`initial_state`), incremental updates (`patch`), command
//!   rejections (`command_error`), and client commands.
//! - **[`transport`]**: the [`Connector`] / [`Link`] duplex abstraction the
//!   sync engine drives. Anything that can move text frames in both
//!   directions can stand in for the WebSocket.
//! - **[`websocket`]**: the `tokio-tungstenite` backed [`WsConnector`].

pub mod error;
pub mod protocol;
pub mod transport;
pub mod websocket;

pub use error::Error;
pub use protocol::{
    ClientMessage, PatchOp, PatchOperation, ServerMessage, Snapshot, version_string,
};
pub use transport::{Connector, Link, LinkEvent, LinkPeer, LinkSender};
pub use websocket::WsConnector;
