//! WebSocket Room Host
//!
//! A browser joins a tutoring session over a single WebSocket:
//!
//! - `protocol`: The JSON message format for client-server communication.
//! - `room`: The [`crate::room::Room`] implementation over one socket.
//! - `session`: The connection lifecycle, from `init` handshake to session close.

pub mod protocol;
pub mod room;
pub mod session;

pub use room::WsRoom;
pub use session::ws_handler;
