//! HTTP to WebSocket upgrade glue (RFC 6455 Section 4.2).
//!
//! [`UpgradeHandler`] subscribes to `http.upgrade`. When a request
//! qualifies it computes the `Sec-WebSocket-Accept` key, asks the
//! `websocket.init` subscribers for a [`DataEndpoint`], negotiates the
//! subprotocol, and leaves a ready [`Session`] in the message's
//! `"Runnable"` slot for the connection to hand its socket to.

use std::sync::{Arc, Weak};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use sha1::{Digest, Sha1};
use tracing::debug;

use yard_bus::{Bus, Handler, Message};

use crate::connection::Runnable;
use crate::ws::session::{DataEndpoint, Session};

/// Key-concatenation GUID fixed by RFC 6455 Section 4.2.2.
const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Compute the `Sec-WebSocket-Accept` value for a client key:
/// base64 of the SHA-1 of the trimmed key concatenated with the GUID.
pub fn compute_accept_key(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.trim().as_bytes());
    hasher.update(WS_GUID.as_bytes());
    BASE64.encode(hasher.finalize())
}

/// The `http.upgrade` subscriber performing the WebSocket handshake.
pub struct UpgradeHandler {
    bus: Weak<Bus>,
}

impl UpgradeHandler {
    /// Subscribe a new upgrade handler on `bus`.
    pub fn install(bus: &Arc<Bus>) {
        bus.install(
            "http.upgrade",
            Arc::new(Self {
                bus: Arc::downgrade(bus),
            }),
        );
    }

    /// Validate the handshake requirements; `None` means the request is
    /// not a WebSocket upgrade this handler will claim.
    fn validate(msg: &Message) -> Option<String> {
        if msg.params.get("method") != Some("GET") {
            return None;
        }
        // RFC 6455 requires HTTP/1.1 or later
        if !(msg.params.get("version")? > "1.0") {
            return None;
        }
        if !msg
            .params
            .get("hdr_Upgrade")?
            .trim()
            .eq_ignore_ascii_case("websocket")
        {
            return None;
        }
        if msg.params.get("hdr_Sec-WebSocket-Version")?.trim() != "13" {
            return None;
        }
        let key = msg.params.get("hdr_Sec-WebSocket-Key")?.trim();
        if key.is_empty() {
            return None;
        }
        Some(key.to_string())
    }
}

impl Handler for UpgradeHandler {
    fn priority(&self) -> i32 {
        100
    }

    fn handle(&self, msg: &mut Message) -> bool {
        let Some(bus) = self.bus.upgrade() else {
            return false;
        };
        let Some(key) = Self::validate(msg) else {
            return false;
        };
        msg.params
            .set("ohdr_Sec-WebSocket-Accept", &compute_accept_key(&key));

        // Offer the session to whoever owns this endpoint.
        let mut init = Message::new("websocket.init");
        for name in ["address", "local", "server", "uri"] {
            if let Some(value) = msg.params.get(name) {
                init.params.set(name, value);
            }
        }
        if let Some(protocols) = msg.params.get("hdr_Sec-WebSocket-Protocol") {
            init.params.set("protocol", protocols);
        }
        if !bus.dispatch(&mut init) {
            debug!(uri = msg.params.get_or("uri", ""), "no websocket.init taker");
            return false;
        }
        let Some(endpoint) = init.take_slot::<Box<dyn DataEndpoint>>("DataEndpoint") else {
            debug!("websocket.init handled without a DataEndpoint");
            return false;
        };

        let subprotocol = init.ret_value.trim();
        if !subprotocol.is_empty() {
            msg.params.set("ohdr_Sec-WebSocket-Protocol", subprotocol);
        }

        let timeout = init
            .params
            .get_u64("timeout")
            .or_else(|| msg.params.get_u64("timeout"))
            .unwrap_or(0);
        let ping = init.params.get_u64("ping").unwrap_or(0);

        let session = Session::new(endpoint, timeout, ping);
        msg.set_slot("Runnable", Box::new(session) as Box<dyn Runnable>);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::session::FrameSender;

    #[test]
    fn accept_key_vectors() {
        assert_eq!(
            compute_accept_key("dGhlIHNhbXBsZSBub25jZQ=="),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
        assert_eq!(
            compute_accept_key("x3JJHMbDL1EzLkh9GBhXDw=="),
            "HSmrc0sMlYUkAGmm5OPpG2HaGWk="
        );
        // surrounding whitespace on the wire is trimmed before hashing
        assert_eq!(
            compute_accept_key(" dGhlIHNhbXBsZSBub25jZQ== "),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }

    struct NullEndpoint;

    impl DataEndpoint for NullEndpoint {
        fn connected(&mut self, _sender: FrameSender) {}
        fn deliver(&mut self, _payload: &[u8]) {}
        fn disconnected(&mut self, _code: u16, _reason: &str) {}
    }

    fn upgrade_msg() -> Message {
        let mut msg = Message::new("http.upgrade");
        msg.params.set("method", "GET");
        msg.params.set("version", "1.1");
        msg.params.set("uri", "/ws/echo");
        msg.params.set("address", "127.0.0.1:50000");
        msg.params.set("local", "127.0.0.1:5038");
        msg.params.set("hdr_Upgrade", "websocket");
        msg.params.set("hdr_Connection", "Upgrade");
        msg.params
            .set("hdr_Sec-WebSocket-Key", "dGhlIHNhbXBsZSBub25jZQ==");
        msg.params.set("hdr_Sec-WebSocket-Version", "13");
        msg
    }

    #[test]
    fn successful_upgrade_attaches_runnable() {
        let bus = Arc::new(Bus::new());
        UpgradeHandler::install(&bus);
        bus.install_fn("websocket.init", 100, |m| {
            assert_eq!(m.params.get("uri"), Some("/ws/echo"));
            m.set_slot(
                "DataEndpoint",
                Box::new(NullEndpoint) as Box<dyn DataEndpoint>,
            );
            m.ret_value = "echo".into();
            true
        });

        let mut msg = upgrade_msg();
        msg.params.set("hdr_Sec-WebSocket-Protocol", "echo, superecho");
        assert!(bus.dispatch(&mut msg));
        assert_eq!(
            msg.params.get("ohdr_Sec-WebSocket-Accept"),
            Some("s3pPLMBiTxaQ9kYGzzhZRbK+xOo=")
        );
        assert_eq!(msg.params.get("ohdr_Sec-WebSocket-Protocol"), Some("echo"));
        assert!(msg.take_slot::<Box<dyn Runnable>>("Runnable").is_some());
    }

    #[test]
    fn unclaimed_init_declines_the_upgrade() {
        let bus = Arc::new(Bus::new());
        UpgradeHandler::install(&bus);
        let mut msg = upgrade_msg();
        assert!(!bus.dispatch(&mut msg));
        assert!(!msg.has_slot("Runnable"));
    }

    #[test]
    fn handshake_requirements_are_enforced() {
        let bus = Arc::new(Bus::new());
        UpgradeHandler::install(&bus);
        bus.install_fn("websocket.init", 100, |m| {
            m.set_slot(
                "DataEndpoint",
                Box::new(NullEndpoint) as Box<dyn DataEndpoint>,
            );
            true
        });

        let mut msg = upgrade_msg();
        msg.params.set("method", "POST");
        assert!(!bus.dispatch(&mut msg));

        let mut msg = upgrade_msg();
        msg.params.set("version", "1.0");
        assert!(!bus.dispatch(&mut msg));

        let mut msg = upgrade_msg();
        msg.params.set("hdr_Upgrade", "h2c");
        assert!(!bus.dispatch(&mut msg));

        let mut msg = upgrade_msg();
        msg.params.set("hdr_Sec-WebSocket-Version", "8");
        assert!(!bus.dispatch(&mut msg));

        let mut msg = upgrade_msg();
        msg.params.set("hdr_Sec-WebSocket-Key", "  ");
        assert!(!bus.dispatch(&mut msg));

        // the well-formed variant still passes
        let mut msg = upgrade_msg();
        assert!(bus.dispatch(&mut msg));
    }
}
