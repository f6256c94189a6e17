//! Deadline-tracked socket I/O and wire scanning helpers.
//!
//! All socket traffic in the HTTP path goes through [`read_some`] and
//! [`write_all`]: short-timeout reads and writes retried until either
//! progress is made or the connection's deadline elapses. Progress resets
//! the deadline, so the deadline measures inactivity, not total transfer
//! time.

use std::io::{ErrorKind, Read, Write};
use std::net::TcpStream;
use std::time::{Duration, Instant};

use crate::error::{Error, Result};

/// Wait granularity for HTTP socket operations.
pub(crate) const IO_TICK: Duration = Duration::from_millis(10);

/// Wait granularity for the WebSocket session loop.
pub(crate) const WS_TICK: Duration = Duration::from_secs(1);

/// Read size while collecting request headers.
pub(crate) const HDR_BUFFER_SIZE: usize = 2048;

/// Read size while draining a request body.
pub(crate) const BODY_BUF_SIZE: usize = 4096;

/// An inactivity deadline. A zero timeout never expires.
#[derive(Debug)]
pub(crate) struct Deadline {
    timeout: Duration,
    expires: Option<Instant>,
}

impl Deadline {
    pub(crate) fn new(timeout_secs: u64) -> Self {
        let timeout = Duration::from_secs(timeout_secs);
        let mut d = Self {
            timeout,
            expires: None,
        };
        d.reset();
        d
    }

    /// Push the deadline out by the full timeout, from now.
    pub(crate) fn reset(&mut self) {
        self.expires = if self.timeout.is_zero() {
            None
        } else {
            Some(Instant::now() + self.timeout)
        };
    }

    pub(crate) fn expired(&self) -> bool {
        self.expires.is_some_and(|at| Instant::now() >= at)
    }
}

fn is_retry(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted
    )
}

/// Read at least one byte into `buf`, waiting in `tick`-sized slices
/// until the deadline expires.
///
/// Returns [`Error::Closed`] on end of stream and [`Error::Timeout`]
/// when the deadline elapses with nothing read. A successful read resets
/// the deadline.
pub(crate) fn read_some(
    stream: &mut TcpStream,
    buf: &mut [u8],
    deadline: &mut Deadline,
    tick: Duration,
) -> Result<usize> {
    stream.set_read_timeout(Some(tick))?;
    loop {
        match stream.read(buf) {
            Ok(0) => return Err(Error::Closed),
            Ok(n) => {
                deadline.reset();
                return Ok(n);
            }
            Err(e) if is_retry(e.kind()) => {
                if deadline.expired() {
                    return Err(Error::Timeout);
                }
                std::thread::yield_now();
            }
            Err(e) => return Err(e.into()),
        }
    }
}

/// Write all of `data`, waiting in `tick`-sized slices between partial
/// writes until the deadline expires. Partial progress resets the
/// deadline.
pub(crate) fn write_all(
    stream: &mut TcpStream,
    data: &[u8],
    deadline: &mut Deadline,
    tick: Duration,
) -> Result<()> {
    stream.set_write_timeout(Some(tick))?;
    let mut pos = 0;
    while pos < data.len() {
        match stream.write(&data[pos..]) {
            Ok(0) => return Err(Error::Closed),
            Ok(n) => {
                pos += n;
                deadline.reset();
            }
            Err(e) if is_retry(e.kind()) => {
                if deadline.expired() {
                    return Err(Error::Timeout);
                }
                std::thread::yield_now();
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

/// Find the first empty line in `buf` and return the index strictly past
/// it, i.e. the offset where a message body would begin.
///
/// Both CRLF and bare LF line endings are tolerated, in any mix. Returns
/// `None` while no empty line is present yet.
pub(crate) fn find_empty_line(buf: &[u8]) -> Option<usize> {
    let mut count = 0;
    let mut i = 0;
    while count < 2 && i < buf.len() {
        if buf[i] == b'\r' {
            i += 1;
            if i < buf.len() && buf[i] == b'\n' {
                count += 1;
            } else {
                count = 0;
            }
        } else if buf[i] == b'\n' {
            count += 1;
        } else {
            count = 0;
        }
        i += 1;
    }
    (count == 2).then_some(i)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_line_crlf() {
        let buf = b"GET / HTTP/1.1\r\nHost: a\r\n\r\nBODY";
        assert_eq!(find_empty_line(buf), Some(27));
        assert_eq!(&buf[27..], b"BODY");
    }

    #[test]
    fn empty_line_bare_lf() {
        let buf = b"GET / HTTP/1.1\nHost: a\n\nBODY";
        assert_eq!(find_empty_line(buf), Some(24));
        assert_eq!(&buf[24..], b"BODY");
    }

    #[test]
    fn empty_line_mixed_endings() {
        let buf = b"GET / HTTP/1.1\nHost: a\r\n\nrest";
        let at = find_empty_line(buf).unwrap();
        assert_eq!(&buf[at..], b"rest");
    }

    #[test]
    fn incomplete_head_has_no_empty_line() {
        assert_eq!(find_empty_line(b"GET / HTTP/1.1\r\nHost: a\r\n"), None);
        assert_eq!(find_empty_line(b""), None);
        // a stray CR not followed by LF resets the scan
        assert_eq!(find_empty_line(b"a\r\rb"), None);
    }

    #[test]
    fn zero_timeout_never_expires() {
        let d = Deadline::new(0);
        assert!(!d.expired());
    }
}
