//! Accept loop.
//!
//! One thread per configured endpoint: bind, accept, prepare the socket
//! (nodelay, optional TLS hand-off through the `socket.ssl` dispatch),
//! then start a connection thread. Rejected sockets are dropped here.

use std::io::ErrorKind;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;

use tracing::{debug, info, warn};

use yard_bus::{Bus, Message};

use crate::config::ListenerConfig;
use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::io::IO_TICK;
use crate::server::Shared;

/// Bind `cfg` and start its accept thread.
pub(crate) fn spawn(cfg: ListenerConfig, bus: Arc<Bus>, shared: Arc<Shared>) -> Result<SocketAddr> {
    let listener = TcpListener::bind(cfg.bind_addr())?;
    listener.set_nonblocking(true)?;
    let addr = listener.local_addr()?;
    shared.add_listener(addr.to_string());
    info!(address = %addr, server = %cfg.server, "listener started");
    thread::Builder::new()
        .name(format!("http-listener-{}", addr.port()))
        .spawn(move || accept_loop(listener, cfg, bus, shared))?;
    Ok(addr)
}

fn accept_loop(listener: TcpListener, cfg: ListenerConfig, bus: Arc<Bus>, shared: Arc<Shared>) {
    loop {
        if shared.stop_requested() {
            break;
        }
        match listener.accept() {
            Ok((stream, peer)) => {
                if let Err(e) = admit(stream, peer, &cfg, &bus, &shared) {
                    warn!(peer = %peer, error = %e, "connection rejected");
                }
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => thread::sleep(IO_TICK),
            Err(e) => {
                warn!(error = %e, "accept failed");
                thread::sleep(IO_TICK);
            }
        }
    }
    debug!(address = ?listener.local_addr().ok(), "listener stopped");
}

fn admit(
    stream: TcpStream,
    peer: SocketAddr,
    cfg: &ListenerConfig,
    bus: &Arc<Bus>,
    shared: &Arc<Shared>,
) -> Result<()> {
    if cfg.nodelay {
        if let Err(e) = stream.set_nodelay(true) {
            warn!(peer = %peer, error = %e, "failed to set TCP_NODELAY");
        }
    }
    let secure = cfg.ssl_context.is_some();
    let stream = match &cfg.ssl_context {
        Some(context) => negotiate_tls(stream, context, cfg, bus)?,
        None => stream,
    };
    info!(peer = %peer, secure, "connection accepted");
    Connection::spawn(stream, cfg.clone(), bus.clone(), shared.clone())
}

/// Offer the accepted socket to the `socket.ssl` dispatch. Whoever
/// claims it must leave a secured socket back in the `"Socket"` slot;
/// an unclaimed dispatch or an emptied slot rejects the connection.
fn negotiate_tls(
    stream: TcpStream,
    context: &str,
    cfg: &ListenerConfig,
    bus: &Arc<Bus>,
) -> Result<TcpStream> {
    let mut msg = Message::new("socket.ssl");
    msg.params.set("server", "true");
    msg.params.set("context", context);
    if let Some(verify) = &cfg.verify {
        msg.params.set("verify", verify);
    }
    msg.set_slot("Socket", stream);
    if !bus.dispatch(&mut msg) {
        return Err(Error::Io(std::io::Error::new(
            ErrorKind::ConnectionAborted,
            format!("no socket.ssl handler for context '{context}'"),
        )));
    }
    msg.take_slot::<TcpStream>("Socket").ok_or_else(|| {
        Error::Io(std::io::Error::new(
            ErrorKind::ConnectionAborted,
            "socket.ssl handler kept the socket",
        ))
    })
}
