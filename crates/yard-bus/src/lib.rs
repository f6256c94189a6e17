//! Named-topic synchronous message bus.
//!
//! The bus is the only wiring mechanism between the server core and its
//! handlers: a registry of topic names, each holding a priority-ordered
//! list of subscribers. Dispatch walks the subscribers in order until one
//! claims the message.
//!
//! - [`Params`]: ordered string multimap carried by every message
//! - [`Message`]: mutable bag of name, parameters, return value and
//!   typed capability slots
//! - [`Bus`]: the topic registry and its [`dispatch`](Bus::dispatch) loop
//! - [`Handler`]: the subscriber trait

pub mod bus;
pub mod message;
pub mod params;

pub use bus::{Bus, Handler};
pub use message::Message;
pub use params::Params;
