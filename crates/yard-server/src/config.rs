//! Per-listener configuration.
//!
//! The server takes its configuration as a flat `key = value` view, one
//! set per listener. [`ListenerConfig::from_params`] reads such a view
//! from a bus parameter map and applies the documented defaults and
//! clamps; embedders that construct the struct directly can call
//! [`ListenerConfig::clamped`] to get the same normalization.

use yard_bus::Params;

/// Largest chunk the response writer will emit in one frame. Bounded so
/// the chunk-size prefix always fits four hex digits.
pub const MAX_SEND_CHUNK_CEIL: usize = 65535;

/// Smallest usable send chunk.
pub const MAX_SEND_CHUNK_FLOOR: usize = 10;

/// Configuration for one listening endpoint.
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    /// Bind address, default `127.0.0.1`.
    pub addr: String,
    /// Bind port, default 5038. Port 0 binds an ephemeral port.
    pub port: u16,
    /// Set `TCP_NODELAY` on accepted sockets, default true.
    pub nodelay: bool,
    /// When set, accepted sockets are offered to the `socket.ssl`
    /// dispatch with this context name before any HTTP is spoken.
    pub ssl_context: Option<String>,
    /// Passed through to the `socket.ssl` dispatch unchanged.
    pub verify: Option<String>,
    /// Requests served per connection before keep-alive is refused;
    /// 0 means unlimited.
    pub max_requests: u32,
    /// Request body cap in bytes, default 10 KiB.
    pub max_req_body: u64,
    /// Socket inactivity deadline in seconds, default 10; 0 disables.
    pub timeout: u64,
    /// Response chunk cap in bytes, clamped to [10, 65535], default 8192.
    pub max_send_chunk: usize,
    /// Tag echoed as the `server` parameter of every dispatch.
    pub server: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1".into(),
            port: 5038,
            nodelay: true,
            ssl_context: None,
            verify: None,
            max_requests: 0,
            max_req_body: 10 * 1024,
            timeout: 10,
            max_send_chunk: 8192,
            server: String::new(),
        }
    }
}

impl ListenerConfig {
    /// Build a configuration from a flat parameter view, falling back to
    /// the defaults for absent or unparseable keys.
    pub fn from_params(params: &Params) -> Self {
        let d = Self::default();
        Self {
            addr: params.get_or("addr", &d.addr).to_string(),
            port: params
                .get_u64("port")
                .and_then(|p| u16::try_from(p).ok())
                .unwrap_or(d.port),
            nodelay: params.get_bool("nodelay").unwrap_or(d.nodelay),
            ssl_context: params
                .get("sslcontext")
                .filter(|v| !v.is_empty())
                .map(str::to_string),
            verify: params.get("verify").map(str::to_string),
            max_requests: params
                .get_u64("maxrequests")
                .and_then(|v| u32::try_from(v).ok())
                .unwrap_or(d.max_requests),
            max_req_body: params.get_u64("maxreqbody").unwrap_or(d.max_req_body),
            timeout: params.get_u64("timeout").unwrap_or(d.timeout),
            max_send_chunk: params
                .get_u64("maxsendchunk")
                .map(|v| v as usize)
                .unwrap_or(d.max_send_chunk),
            server: params.get_or("server", "").to_string(),
        }
        .clamped()
    }

    /// Apply the documented bounds to the tunable fields.
    pub fn clamped(mut self) -> Self {
        self.max_send_chunk = self
            .max_send_chunk
            .clamp(MAX_SEND_CHUNK_FLOOR, MAX_SEND_CHUNK_CEIL);
        self
    }

    /// `addr:port` string suitable for `TcpListener::bind`.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.addr, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = ListenerConfig::default();
        assert_eq!(c.bind_addr(), "127.0.0.1:5038");
        assert!(c.nodelay);
        assert_eq!(c.max_req_body, 10 * 1024);
        assert_eq!(c.timeout, 10);
        assert_eq!(c.max_send_chunk, 8192);
        assert_eq!(c.max_requests, 0);
    }

    #[test]
    fn send_chunk_clamped_low() {
        let mut p = Params::new();
        p.set("maxsendchunk", "5");
        assert_eq!(ListenerConfig::from_params(&p).max_send_chunk, 10);
    }

    #[test]
    fn send_chunk_clamped_high() {
        let mut p = Params::new();
        p.set("maxsendchunk", "70000");
        assert_eq!(ListenerConfig::from_params(&p).max_send_chunk, 65535);
    }

    #[test]
    fn from_params_reads_all_keys() {
        let mut p = Params::new();
        p.set("addr", "0.0.0.0");
        p.set("port", "8080");
        p.set("nodelay", "no");
        p.set("sslcontext", "front");
        p.set("verify", "peer");
        p.set("maxrequests", "3");
        p.set("maxreqbody", "4096");
        p.set("timeout", "30");
        p.set("server", "edge");
        let c = ListenerConfig::from_params(&p);
        assert_eq!(c.bind_addr(), "0.0.0.0:8080");
        assert!(!c.nodelay);
        assert_eq!(c.ssl_context.as_deref(), Some("front"));
        assert_eq!(c.verify.as_deref(), Some("peer"));
        assert_eq!(c.max_requests, 3);
        assert_eq!(c.max_req_body, 4096);
        assert_eq!(c.timeout, 30);
        assert_eq!(c.server, "edge");
    }

    #[test]
    fn empty_ssl_context_means_plain() {
        let mut p = Params::new();
        p.set("sslcontext", "");
        assert!(ListenerConfig::from_params(&p).ssl_context.is_none());
    }
}
