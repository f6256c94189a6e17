//! Embeddable HTTP/1.x server with bus-dispatched handlers and a
//! WebSocket upgrade path.
//!
//! The server accepts TCP connections on configured listeners, parses
//! HTTP/1.x requests, and routes every request over a [`yard_bus::Bus`]
//! instead of a hard-wired router. Handlers subscribe to topics:
//!
//! - `http.route` -- pre-body routing; return a `3xx`-`9xx` status in
//!   `ret_value` to short-circuit, or a handler name for later stages
//! - `http.preserve` -- offer a custom request body sink (capability
//!   slot `"Stream"`, a `Box<dyn Write + Send>`)
//! - `http.upgrade` -- claim the connection with a [`Runnable`] in the
//!   `"Runnable"` slot; [`ws::UpgradeHandler`] subscribes here
//! - `http.serve` -- produce the response: `status` and `ohdr_*`
//!   parameters, plus a body in `ret_value` or a `Box<dyn Read + Send>`
//!   in the `"Stream"` slot
//! - `websocket.init` -- attach a [`ws::DataEndpoint`] to accept an
//!   upgraded session
//! - `socket.ssl` -- offered every accepted socket of a TLS-configured
//!   listener before any HTTP is spoken
//!
//! Concurrency is one thread per listener for accepting, one per
//! connection for the request loop, and the connection's thread carries
//! on as the session thread after an upgrade. Requests on a connection
//! are strictly sequential.

pub mod config;
pub mod error;
pub mod http;
pub mod server;
pub mod ws;

mod connection;
mod io;
mod listener;

pub use config::ListenerConfig;
pub use connection::Runnable;
pub use error::{Error, Result};
pub use server::Server;

// The bus is part of this crate's API surface; re-export it so
// embedders do not have to name the crate twice.
pub use yard_bus as bus;
