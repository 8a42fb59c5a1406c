//! Murmur Core
//!
//! Pure, I/O-free conversation logic for the Murmur voice-chat client:
//! the wire protocol, the observable conversation state and its message
//! router, and the durable session mirror used for resumption. The async
//! connection machinery in `murmur-client` drives everything in here.

pub mod protocol;
pub mod router;
pub mod session;
pub mod status;
