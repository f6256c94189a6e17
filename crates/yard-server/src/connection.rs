//! Per-connection request loop.
//!
//! Each accepted socket gets a thread running [`Connection::run`]: read
//! a request head, route it over the bus, possibly hand the socket to an
//! upgraded session, otherwise stream the body in, serve, stream the
//! response out, and either loop for the next request or close. Exactly
//! one request is in flight per connection at any time.

use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::Arc;
use std::thread;

use tracing::{debug, info, warn};

use yard_bus::{Bus, Message};

use crate::config::ListenerConfig;
use crate::error::{Error, Result};
use crate::http::body::{BodySink, BodySource, GuardedSink, SinkError};
use crate::http::request::Request;
use crate::http::response::Response;
use crate::io::{self, Deadline, BODY_BUF_SIZE, HDR_BUFFER_SIZE, IO_TICK};
use crate::server::{ConnectionGuard, Shared};

/// A value that takes over a connection's socket after a 101 response.
///
/// The `http.upgrade` dispatch returns one of these in the `"Runnable"`
/// capability slot; the connection writes the switching-protocols
/// response, surrenders its socket and lets the runnable use the thread.
pub trait Runnable: Send {
    fn run(self: Box<Self>, stream: TcpStream);
}

// ── Connection header flags ─────────────────────────────────────────────

/// Bitset over the recognized `Connection` header tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct ConnFlags(u16);

impl ConnFlags {
    pub(crate) const KEEP_ALIVE: u16 = 1;
    pub(crate) const CLOSE: u16 = 2;
    pub(crate) const TE: u16 = 4;
    pub(crate) const TRAILERS: u16 = 8;
    pub(crate) const UPGRADE: u16 = 16;

    const TOKENS: [(u16, &'static str); 5] = [
        (Self::KEEP_ALIVE, "keep-alive"),
        (Self::CLOSE, "close"),
        (Self::TE, "te"),
        (Self::TRAILERS, "trailers"),
        (Self::UPGRADE, "upgrade"),
    ];

    /// Parse a `Connection` header value: comma-separated tokens,
    /// case-insensitive, unknown tokens ignored.
    pub(crate) fn parse(header: &str) -> Self {
        let mut flags = Self::default();
        for token in header.split(',') {
            let token = token.trim().to_ascii_lowercase();
            if let Some((bit, _)) = Self::TOKENS.iter().find(|(_, name)| *name == token) {
                flags.0 |= bit;
            }
        }
        flags
    }

    pub(crate) fn contains(&self, bit: u16) -> bool {
        self.0 & bit != 0
    }

    pub(crate) fn set(&mut self, bit: u16) {
        self.0 |= bit;
    }

    pub(crate) fn clear(&mut self, bit: u16) {
        self.0 &= !bit;
    }

    /// Serialize the set bits back into a header value, symbolic names
    /// joined by commas.
    pub(crate) fn header_value(&self) -> String {
        let names: Vec<&str> = Self::TOKENS
            .iter()
            .filter(|(bit, _)| self.contains(*bit))
            .map(|(_, name)| *name)
            .collect();
        names.join(",")
    }
}

// ── The connection itself ───────────────────────────────────────────────

enum Next {
    KeepAlive,
    Close,
    Handoff(Box<dyn Runnable>),
}

pub(crate) struct Connection {
    stream: Option<TcpStream>,
    peer: SocketAddr,
    local: SocketAddr,
    cfg: ListenerConfig,
    bus: Arc<Bus>,
    shared: Arc<Shared>,
    _guard: ConnectionGuard,
    rcv: Vec<u8>,
    keepalive: bool,
    flags: ConnFlags,
    /// Requests left before keep-alive is refused; `None` = unlimited.
    remaining_requests: Option<u32>,
    deadline: Deadline,
}

impl Connection {
    /// Register the connection and start its thread.
    pub(crate) fn spawn(
        stream: TcpStream,
        cfg: ListenerConfig,
        bus: Arc<Bus>,
        shared: Arc<Shared>,
    ) -> Result<()> {
        let peer = stream.peer_addr()?;
        let local = stream.local_addr()?;
        let guard = shared.register_connection(peer.to_string());
        let conn = Connection {
            stream: Some(stream),
            peer,
            local,
            deadline: Deadline::new(cfg.timeout),
            remaining_requests: (cfg.max_requests > 0).then_some(cfg.max_requests),
            cfg,
            bus,
            shared,
            _guard: guard,
            rcv: Vec::new(),
            keepalive: false,
            flags: ConnFlags::default(),
        };
        thread::Builder::new()
            .name(format!("http-conn-{}", peer.port()))
            .spawn(move || conn.run())?;
        Ok(())
    }

    fn run(mut self) {
        let peer = self.peer;
        match self.serve_loop() {
            Ok(Some(runnable)) => {
                debug!(peer = %peer, "connection upgraded");
                if let Some(stream) = self.stream.take() {
                    runnable.run(stream);
                }
            }
            Ok(None) => {}
            Err(Error::Closed) => debug!(peer = %peer, "peer closed the connection"),
            Err(Error::Timeout) => debug!(peer = %peer, "connection timed out"),
            Err(e) => warn!(peer = %peer, error = %e, "connection failed"),
        }
        info!(peer = %peer, "connection closed");
    }

    fn stream(&mut self) -> &mut TcpStream {
        self.stream.as_mut().expect("socket already surrendered")
    }

    /// Serve requests until the connection ends; a returned runnable
    /// means the socket is being surrendered to an upgraded session.
    fn serve_loop(&mut self) -> Result<Option<Box<dyn Runnable>>> {
        self.deadline.reset();
        loop {
            if self.shared.stop_requested() {
                return Ok(None);
            }
            let head_end = self.read_head()?;
            let request = match Request::parse(&self.rcv[..head_end]) {
                Ok(req) => req,
                Err(e) => {
                    debug!(peer = %self.peer, error = %e, "unparseable request");
                    self.send_error(400, "1.0", None);
                    return Ok(None);
                }
            };
            self.rcv.drain(..head_end);
            match self.process_request(request)? {
                Next::KeepAlive => {
                    self.deadline.reset();
                }
                Next::Close => return Ok(None),
                Next::Handoff(runnable) => return Ok(Some(runnable)),
            }
        }
    }

    /// Fill the receive buffer until it holds a complete request head;
    /// returns the offset just past the empty line.
    fn read_head(&mut self) -> Result<usize> {
        loop {
            if let Some(at) = io::find_empty_line(&self.rcv) {
                return Ok(at);
            }
            let mut buf = [0u8; HDR_BUFFER_SIZE];
            let n = {
                let deadline = &mut self.deadline;
                io::read_some(
                    self.stream.as_mut().expect("socket already surrendered"),
                    &mut buf,
                    deadline,
                    IO_TICK,
                )?
            };
            self.rcv.extend_from_slice(&buf[..n]);
        }
    }

    fn process_request(&mut self, req: Request) -> Result<Next> {
        // keep-alive default by version, then Connection header overrides
        self.keepalive = req.version.as_str() > "1.0";
        self.flags = ConnFlags::parse(req.headers.get("Connection").unwrap_or(""));
        if self.flags.contains(ConnFlags::KEEP_ALIVE) {
            self.keepalive = true;
        }
        if self.flags.contains(ConnFlags::CLOSE) {
            self.keepalive = false;
        }
        let body_expected = req.body_expected();

        // ── routing ─────────────────────────────────────────────────
        let mut msg = Message::new("http.route");
        let server_tag = if self.cfg.server.is_empty() {
            self.local.to_string()
        } else {
            self.cfg.server.clone()
        };
        msg.params.set("server", &server_tag);
        msg.params.set("address", &self.peer.to_string());
        msg.params.set("ip_host", &self.peer.ip().to_string());
        msg.params.set("ip_port", &self.peer.port().to_string());
        msg.params.set("local", &self.local.to_string());
        msg.params.set("local_host", &self.local.ip().to_string());
        msg.params.set("local_port", &self.local.port().to_string());
        msg.params.set("keepalive", bool_text(self.keepalive));
        msg.params.set("reqbody", bool_text(body_expected));
        req.fill(&mut msg);
        if self.bus.dispatch(&mut msg) {
            let rv = std::mem::take(&mut msg.ret_value);
            if let Some(status) = error_status(&rv) {
                self.send_error(status, &req.version, Some(&msg));
                return Ok(Next::Close);
            }
            msg.params.set("handler", &rv);
        }

        // ── upgrade ─────────────────────────────────────────────────
        if self.flags.contains(ConnFlags::UPGRADE) && req.headers.contains("Upgrade") {
            msg.retarget("http.upgrade");
            msg.params.set("timeout", &self.cfg.timeout.to_string());
            if self.bus.dispatch(&mut msg) {
                let Some(runnable) = msg.take_slot::<Box<dyn Runnable>>("Runnable") else {
                    return Ok(Next::Close);
                };
                let mut rsp = Response::new(&req.version);
                rsp.apply(&msg);
                rsp.status = 101;
                rsp.headers.set("Connection", "Upgrade");
                rsp.headers.set("Upgrade", "websocket");
                rsp.content_length = Some(0);
                self.send_response(&mut rsp)?;
                return Ok(Next::Handoff(runnable));
            }
            self.flags.clear(ConnFlags::UPGRADE);
        }

        // ── body sink offer ─────────────────────────────────────────
        msg.retarget("http.preserve");
        let mut external_sink: Option<Box<dyn Write + Send>> = None;
        if self.bus.dispatch(&mut msg) {
            external_sink = msg.take_slot::<Box<dyn Write + Send>>("Stream");
        }

        // ── body read ───────────────────────────────────────────────
        let mut content: Option<Vec<u8>> = None;
        if body_expected {
            let max = msg
                .params
                .get_u64("maxreqbody")
                .unwrap_or(self.cfg.max_req_body);
            if req.content_length.is_some_and(|len| len > max) {
                self.send_error(413, &req.version, None);
                return Ok(Next::Close);
            }
            let in_memory = external_sink.is_none();
            let sink = match external_sink.take() {
                Some(w) => BodySink::External(w),
                None => BodySink::memory(),
            };
            let mut guarded = GuardedSink::new(sink, max);
            if !self.read_request_body(req.content_length, &req.version, &mut guarded)? {
                return Ok(Next::Close);
            }
            if in_memory {
                content = guarded.into_memory();
            }
        }

        // ── serve ───────────────────────────────────────────────────
        msg.retarget("http.serve");
        msg.ret_value.clear();
        if let Some(body) = &content {
            msg.params.set("content", &String::from_utf8_lossy(body));
        }
        if !self.bus.dispatch(&mut msg) {
            self.send_error(404, &req.version, None);
            return Ok(Next::Close);
        }

        // keep-alive may be overridden by the handler, and runs out with
        // the request budget
        self.keepalive = msg.params.get_bool("keepalive").unwrap_or(self.keepalive);
        if let Some(remaining) = self.remaining_requests.as_mut() {
            *remaining = remaining.saturating_sub(1);
            if *remaining == 0 {
                self.keepalive = false;
            }
        }
        if self.keepalive {
            self.flags.clear(ConnFlags::CLOSE);
            self.flags.set(ConnFlags::KEEP_ALIVE);
        } else {
            self.flags.clear(ConnFlags::KEEP_ALIVE);
            self.flags.set(ConnFlags::CLOSE);
        }

        // ── response ────────────────────────────────────────────────
        let mut rsp = Response::new(&req.version);
        rsp.headers.set("Connection", &self.flags.header_value());
        rsp.apply(&msg);
        if !msg.ret_value.is_empty() {
            rsp.set_inline_body(std::mem::take(&mut msg.ret_value).into_bytes());
        } else if let Some(reader) = msg.take_slot::<Box<dyn Read + Send>>("Stream") {
            rsp.body = BodySource::Stream(reader);
        } else {
            rsp.content_length = Some(0);
            rsp.synthesize_missing_body();
        }
        self.send_response(&mut rsp)?;

        if !self.keepalive {
            let _ = self.stream().shutdown(Shutdown::Both);
            return Ok(Next::Close);
        }
        Ok(Next::KeepAlive)
    }

    /// Drain the request body into the sink. Returns `false` when a
    /// violation was answered with an error response; the connection
    /// then closes.
    fn read_request_body(
        &mut self,
        content_length: Option<u64>,
        version: &str,
        sink: &mut GuardedSink,
    ) -> Result<bool> {
        let mut remaining = content_length;
        let until_eof = !self.keepalive && remaining.is_none();

        // body bytes that arrived together with the headers
        if !self.rcv.is_empty() {
            let take = match remaining {
                Some(len) => self.rcv.len().min(len as usize),
                None => self.rcv.len(),
            };
            let buffered: Vec<u8> = self.rcv.drain(..take).collect();
            if let Some(status) = sink_refusal(sink.write(&buffered)) {
                self.send_error(status, version, None);
                return Ok(false);
            }
            if let Some(len) = remaining.as_mut() {
                *len -= take as u64;
            }
        }

        let mut buf = [0u8; BODY_BUF_SIZE];
        loop {
            let want = match remaining {
                Some(0) => break,
                Some(len) => (len as usize).min(BODY_BUF_SIZE),
                None => BODY_BUF_SIZE,
            };
            let n = {
                let deadline = &mut self.deadline;
                match io::read_some(
                    self.stream.as_mut().expect("socket already surrendered"),
                    &mut buf[..want],
                    deadline,
                    IO_TICK,
                ) {
                    Ok(n) => n,
                    Err(Error::Closed) if until_eof => break,
                    Err(Error::Closed | Error::Timeout | Error::Io(_)) => {
                        self.send_error(400, version, None);
                        return Ok(false);
                    }
                    Err(e) => return Err(e),
                }
            };
            if let Some(status) = sink_refusal(sink.write(&buf[..n])) {
                self.send_error(status, version, None);
                return Ok(false);
            }
            if let Some(len) = remaining.as_mut() {
                *len -= n as u64;
            }
        }
        if sink_refusal(sink.finish()).is_some() {
            self.send_error(500, version, None);
            return Ok(false);
        }
        Ok(true)
    }

    /// Write the response head, then the body: raw when the length is
    /// known, chunked when it is not.
    fn send_response(&mut self, rsp: &mut Response) -> Result<()> {
        let chunked = rsp.content_length.is_none();
        if chunked {
            rsp.headers.set("Transfer-Encoding", "chunked");
        } else {
            rsp.headers
                .set("Content-Length", &rsp.content_length.unwrap_or(0).to_string());
        }
        let mut head = Vec::new();
        rsp.serialize_head(&mut head);
        self.write(&head)?;

        match std::mem::replace(&mut rsp.body, BodySource::Empty) {
            BodySource::Empty => {
                if chunked {
                    self.write(b"0\r\n\r\n")?;
                }
            }
            BodySource::Inline(bytes) => {
                if chunked {
                    for chunk in bytes.chunks(self.cfg.max_send_chunk) {
                        self.write_chunk(chunk)?;
                    }
                    self.write(b"0\r\n\r\n")?;
                } else {
                    self.write(&bytes)?;
                }
            }
            BodySource::Stream(mut reader) => {
                let mut buf = vec![0u8; self.cfg.max_send_chunk];
                if chunked {
                    loop {
                        let n = reader.read(&mut buf)?;
                        if n == 0 {
                            break;
                        }
                        self.write_chunk(&buf[..n])?;
                    }
                    self.write(b"0\r\n\r\n")?;
                } else {
                    let mut left = rsp.content_length.unwrap_or(0);
                    while left > 0 {
                        let want = (left as usize).min(buf.len());
                        let n = reader.read(&mut buf[..want])?;
                        if n == 0 {
                            // the handler promised more bytes than it had
                            return Err(Error::Io(ErrorKind::UnexpectedEof.into()));
                        }
                        self.write(&buf[..n])?;
                        left -= n as u64;
                    }
                }
            }
        }
        Ok(())
    }

    /// Frame one chunk: lowercase hex size, CRLF, data, CRLF, written as
    /// a single buffer.
    fn write_chunk(&mut self, data: &[u8]) -> Result<()> {
        let mut framed = Vec::with_capacity(data.len() + 8);
        framed.extend_from_slice(format!("{:x}\r\n", data.len()).as_bytes());
        framed.extend_from_slice(data);
        framed.extend_from_slice(b"\r\n");
        self.write(&framed)
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        let deadline = &mut self.deadline;
        io::write_all(
            self.stream.as_mut().expect("socket already surrendered"),
            data,
            deadline,
            IO_TICK,
        )
    }

    /// Emit a terminal error response: `Connection: close`, any handler
    /// headers, and the synthesized status body. Send failures are
    /// irrelevant because the connection closes either way.
    fn send_error(&mut self, status: u16, version: &str, msg: Option<&Message>) {
        let mut rsp = Response::new(version);
        rsp.headers.set("Connection", "close");
        if let Some(msg) = msg {
            rsp.apply(msg);
        }
        rsp.status = status;
        rsp.synthesize_missing_body();
        if let Err(e) = self.send_response(&mut rsp) {
            debug!(peer = %self.peer, status, error = %e, "error response not delivered");
        }
    }
}

fn bool_text(v: bool) -> &'static str {
    if v {
        "true"
    } else {
        "false"
    }
}

/// A routing return value starting with a digit 3 through 9 names a
/// status code that short-circuits the request.
fn error_status(rv: &str) -> Option<u16> {
    if !rv.starts_with(|c| ('3'..='9').contains(&c)) {
        return None;
    }
    let digits: &str = &rv[..rv.bytes().take_while(u8::is_ascii_digit).count()];
    digits.parse().ok()
}

/// Map a refused sink write to the status code answering it.
fn sink_refusal(result: std::result::Result<(), SinkError>) -> Option<u16> {
    match result {
        Ok(()) => None,
        Err(SinkError::TooLarge) => Some(413),
        Err(SinkError::Io(_)) => Some(500),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_tokens_parse_case_insensitively() {
        let flags = ConnFlags::parse("Keep-Alive, Upgrade");
        assert!(flags.contains(ConnFlags::KEEP_ALIVE));
        assert!(flags.contains(ConnFlags::UPGRADE));
        assert!(!flags.contains(ConnFlags::CLOSE));
    }

    #[test]
    fn unknown_tokens_are_ignored() {
        let flags = ConnFlags::parse("x-custom, close");
        assert_eq!(flags, {
            let mut f = ConnFlags::default();
            f.set(ConnFlags::CLOSE);
            f
        });
    }

    #[test]
    fn header_value_echoes_symbolic_names() {
        let mut flags = ConnFlags::default();
        flags.set(ConnFlags::KEEP_ALIVE);
        assert_eq!(flags.header_value(), "keep-alive");
        flags.set(ConnFlags::UPGRADE);
        assert_eq!(flags.header_value(), "keep-alive,upgrade");
    }

    #[test]
    fn routing_status_short_circuit() {
        assert_eq!(error_status("302"), Some(302));
        assert_eq!(error_status("404 not here"), Some(404));
        assert_eq!(error_status("file"), None);
        assert_eq!(error_status("200"), None);
        assert_eq!(error_status(""), None);
    }
}
