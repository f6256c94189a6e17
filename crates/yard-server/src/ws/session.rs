//! Post-upgrade WebSocket session.
//!
//! A session owns the socket a connection surrendered and pumps it both
//! ways: inbound frames are decoded off the wire and their payloads
//! delivered to the attached endpoint's sink, outbound data blocks are
//! wrapped in single text frames by the [`FrameSender`] the endpoint
//! received when it was wired up. All outbound traffic goes through one
//! per-session mutex so control frames never land inside another frame.

use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::connection::Runnable;
use crate::error::{Error, Result};
use crate::io::WS_TICK;
use crate::ws::close::{build_close_payload, parse_close_payload, CloseCode};
use crate::ws::frame::{Frame, Opcode};

/// Bytes pulled off the socket per readable pass.
const READ_CHUNK: usize = 1024;

/// The local half of a session: a data sink fed with inbound payloads
/// and a data source that pushes outbound blocks through the
/// [`FrameSender`] handed to it.
///
/// A `websocket.init` subscriber attaches one of these (boxed, in the
/// `"DataEndpoint"` capability slot) to claim the session.
pub trait DataEndpoint: Send {
    /// The session is up; `sender` is the outbound path. Called once,
    /// before any delivery.
    fn connected(&mut self, sender: FrameSender);

    /// One inbound data payload (text or binary).
    fn deliver(&mut self, payload: &[u8]);

    /// The session ended. `code` is the peer's close code, or 1005 when
    /// the session ended without one.
    fn disconnected(&mut self, code: u16, reason: &str);
}

/// Cloneable outbound handle wiring a local data source to the peer.
///
/// Sends lock the session's write side for the whole frame, so
/// concurrent senders interleave at frame granularity only.
#[derive(Clone)]
pub struct FrameSender {
    stream: Arc<Mutex<TcpStream>>,
    closed: Arc<AtomicBool>,
}

impl FrameSender {
    /// Send one final text frame carrying `data`.
    pub fn send_text(&self, data: &[u8]) -> Result<()> {
        self.send_frame(&Frame::text(data))
    }

    /// Send one final binary frame carrying `data`.
    pub fn send_binary(&self, data: &[u8]) -> Result<()> {
        self.send_frame(&Frame::new(Opcode::Binary, data.to_vec()))
    }

    fn send_frame(&self, frame: &Frame) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::SessionClosed);
        }
        let mut wire = Vec::with_capacity(frame.payload.len() + 10);
        frame.encode(&mut wire);
        let mut stream = self.stream.lock();
        use std::io::Write;
        stream.write_all(&wire)?;
        Ok(())
    }
}

/// A WebSocket session ready to take over a connection's socket.
///
/// Constructed by the upgrade glue with the endpoint the
/// `websocket.init` dispatch returned; the connection hands its socket
/// over through [`Runnable::run`] after writing the 101 response.
pub struct Session {
    endpoint: Box<dyn DataEndpoint>,
    /// Idle deadline in seconds since the last received byte; 0 disables.
    timeout: u64,
    /// Keep-alive ping interval in seconds; 0 disables.
    ping: u64,
}

enum Step {
    Continue,
    /// The close handshake finished with the peer's code and reason.
    Closed(u16, String),
}

impl Session {
    pub fn new(endpoint: Box<dyn DataEndpoint>, timeout: u64, ping: u64) -> Self {
        Self {
            endpoint,
            timeout,
            ping,
        }
    }
}

impl Runnable for Session {
    fn run(self: Box<Self>, stream: TcpStream) {
        let peer = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "?".into());
        debug!(peer = %peer, "websocket session started");

        let read_stream = match prepare_streams(&stream) {
            Ok(s) => s,
            Err(e) => {
                warn!(peer = %peer, error = %e, "websocket session setup failed");
                return;
            }
        };
        let writer = Arc::new(Mutex::new(stream));
        let closed = Arc::new(AtomicBool::new(false));

        let mut session = *self;
        session.endpoint.connected(FrameSender {
            stream: writer.clone(),
            closed: closed.clone(),
        });

        let (code, reason) = session.pump(read_stream, &writer, &closed);
        closed.store(true, Ordering::SeqCst);
        session.endpoint.disconnected(code, &reason);
        debug!(peer = %peer, code, "websocket session ended");
    }
}

impl Session {
    /// Reader and timer loop. Returns the close code and reason to
    /// present to the endpoint.
    fn pump(
        &mut self,
        mut read_stream: TcpStream,
        writer: &Arc<Mutex<TcpStream>>,
        closed: &Arc<AtomicBool>,
    ) -> (u16, String) {
        use std::io::Read;

        let mut rcv: Vec<u8> = Vec::new();
        let mut chunk = [0u8; READ_CHUNK];
        let mut last_receive = Instant::now();

        loop {
            match read_stream.read(&mut chunk) {
                Ok(0) => return (CloseCode::NO_STATUS, String::new()),
                Ok(n) => {
                    last_receive = Instant::now();
                    rcv.extend_from_slice(&chunk[..n]);
                    loop {
                        match Frame::decode(&rcv) {
                            Ok(Some((frame, used))) => {
                                rcv.drain(..used);
                                match self.handle_frame(frame, writer, closed) {
                                    Ok(Step::Continue) => {}
                                    Ok(Step::Closed(code, reason)) => return (code, reason),
                                    Err(e) => return self.fail(e, writer, closed),
                                }
                            }
                            Ok(None) => break,
                            Err(e) => return self.fail(e, writer, closed),
                        }
                    }
                }
                Err(e) if is_tick(&e) => {
                    let idle = last_receive.elapsed();
                    if self.timeout > 0 && idle > Duration::from_secs(self.timeout) {
                        debug!("websocket session idle timeout");
                        let _ = send_close(writer, CloseCode::GOING_AWAY, "idle timeout");
                        closed.store(true, Ordering::SeqCst);
                        shutdown_write(writer);
                        return (CloseCode::NO_STATUS, String::new());
                    }
                    if self.ping > 0
                        && idle >= Duration::from_secs(self.ping)
                        && !closed.load(Ordering::SeqCst)
                    {
                        let _ = send_frame(writer, &Frame::ping(b""));
                    }
                }
                Err(e) => {
                    debug!(error = %e, "websocket read failed");
                    return (CloseCode::NO_STATUS, String::new());
                }
            }
        }
    }

    fn handle_frame(
        &mut self,
        frame: Frame,
        writer: &Arc<Mutex<TcpStream>>,
        closed: &Arc<AtomicBool>,
    ) -> Result<Step> {
        if frame.mask.is_none() {
            return Err(Error::WsProtocol("unmasked client frame"));
        }
        match frame.opcode {
            Opcode::Text | Opcode::Binary | Opcode::Continuation => {
                self.endpoint.deliver(&frame.payload);
                Ok(Step::Continue)
            }
            Opcode::Ping => {
                send_frame(writer, &Frame::pong(&frame.payload))?;
                Ok(Step::Continue)
            }
            Opcode::Pong => Ok(Step::Continue),
            Opcode::Close => {
                let (code, reason) = parse_close_payload(&frame.payload);
                if !closed.swap(true, Ordering::SeqCst) {
                    let payload = build_close_payload(CloseCode::NORMAL, "");
                    let _ = send_frame(writer, &Frame::close(payload));
                    shutdown_write(writer);
                }
                Ok(Step::Closed(code, reason))
            }
        }
    }

    /// Turn a protocol failure into the matching close frame, then stop.
    fn fail(
        &mut self,
        err: Error,
        writer: &Arc<Mutex<TcpStream>>,
        closed: &Arc<AtomicBool>,
    ) -> (u16, String) {
        let code = match &err {
            Error::WsTooBig(_) => CloseCode::TOO_BIG,
            _ => CloseCode::PROTOCOL_ERROR,
        };
        debug!(error = %err, code, "websocket protocol failure");
        if !closed.swap(true, Ordering::SeqCst) {
            let _ = send_close(writer, code, "");
            shutdown_write(writer);
        }
        (CloseCode::NO_STATUS, String::new())
    }
}

/// Clone the read side and normalize the socket options inherited from
/// the HTTP phase: reads tick at the session granularity, writes block.
fn prepare_streams(stream: &TcpStream) -> std::io::Result<TcpStream> {
    let read_stream = stream.try_clone()?;
    read_stream.set_read_timeout(Some(WS_TICK))?;
    stream.set_write_timeout(None)?;
    Ok(read_stream)
}

fn is_tick(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::WouldBlock
            | std::io::ErrorKind::TimedOut
            | std::io::ErrorKind::Interrupted
    )
}

fn send_frame(writer: &Arc<Mutex<TcpStream>>, frame: &Frame) -> Result<()> {
    let mut wire = Vec::with_capacity(frame.payload.len() + 10);
    frame.encode(&mut wire);
    let mut stream = writer.lock();
    use std::io::Write;
    stream.write_all(&wire)?;
    Ok(())
}

fn send_close(writer: &Arc<Mutex<TcpStream>>, code: u16, reason: &str) -> Result<()> {
    send_frame(writer, &Frame::close(build_close_payload(code, reason)))
}

fn shutdown_write(writer: &Arc<Mutex<TcpStream>>) {
    let _ = writer.lock().shutdown(Shutdown::Write);
}
