//! Voice Tutor Agent Library Crate
//!
//! Everything the `tutor-agent` binary runs: configuration, shared worker state,
//! the session lifecycle, the Gemini-backed conversational engine, and the
//! WebSocket room host. The binary is a thin wrapper around this library.

pub mod config;
pub mod engine;
pub mod room;
pub mod router;
pub mod session;
pub mod state;
pub mod ws;
