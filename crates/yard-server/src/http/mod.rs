//! HTTP/1.x request and response model.
//!
//! - [`headers`]: ordered, case-insensitive header multimap
//! - [`request`]: request parsing and dispatch-parameter fill
//! - [`response`]: status table, header serialization, response assembly
//! - [`body`]: the body source/sink variants of the handler contract

pub mod body;
pub mod headers;
pub mod request;
pub mod response;

pub use body::{BodySink, BodySource, GuardedSink, SinkError};
pub use headers::Headers;
pub use request::Request;
pub use response::{reason_phrase, Response};
