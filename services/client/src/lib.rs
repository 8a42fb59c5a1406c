//! Murmur Client Library Crate
//!
//! The async half of the Murmur voice-chat client: configuration, the
//! WebSocket transport seam, the collaborator interfaces for audio capture
//! and playback, and the connection controller that keeps a conversation
//! alive across drops and suspensions. The `murmur` binary is a thin
//! wrapper around this library.

pub mod capture;
pub mod config;
pub mod controller;
pub mod playback;
pub mod transport;
