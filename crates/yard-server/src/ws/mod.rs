//! WebSocket protocol layer (RFC 6455).
//!
//! - [`frame`]: wire-level frame codec with incremental decoding
//! - [`close`]: close handshake payloads and status codes
//! - [`session`]: the post-upgrade bidirectional pump
//! - [`upgrade`]: the `http.upgrade` handshake glue

pub mod close;
pub mod frame;
pub mod session;
pub mod upgrade;

pub use close::CloseCode;
pub use frame::{apply_mask, Frame, Opcode};
pub use session::{DataEndpoint, FrameSender, Session};
pub use upgrade::{compute_accept_key, UpgradeHandler};
