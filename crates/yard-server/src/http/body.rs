//! Body completions of the handler contract.
//!
//! Outbound bodies are a tagged choice between bytes the core already
//! holds and a pull stream it drains while writing. Inbound bodies are a
//! tagged choice between an in-memory buffer the core owns and an
//! external sink a handler installed via the `http.preserve` dispatch.

use std::io::{Read, Write};

/// Where a response body comes from.
pub enum BodySource {
    /// No body bytes at all.
    Empty,
    /// A finite body the core holds in memory.
    Inline(Vec<u8>),
    /// A handler-supplied stream the writer pulls from. Whether it is
    /// framed chunked or raw depends on the response's known length.
    Stream(Box<dyn Read + Send>),
}

impl std::fmt::Debug for BodySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BodySource::Empty => f.write_str("Empty"),
            BodySource::Inline(b) => write!(f, "Inline({} bytes)", b.len()),
            BodySource::Stream(_) => f.write_str("Stream"),
        }
    }
}

/// Where a request body goes.
pub enum BodySink {
    /// Core-owned buffer, later handed to `http.serve` as `content`.
    Memory(Vec<u8>),
    /// Handler-owned writer installed by an `http.preserve` subscriber.
    External(Box<dyn Write + Send>),
}

impl BodySink {
    pub fn memory() -> Self {
        BodySink::Memory(Vec::new())
    }
}

/// Why a guarded body write was refused.
#[derive(Debug)]
pub enum SinkError {
    /// The write would push the body past the configured cap.
    TooLarge,
    Io(std::io::Error),
}

/// A [`BodySink`] wrapper enforcing the request body cap.
///
/// Every size decision of the body-read path funnels through
/// [`write`](GuardedSink::write): one guard, one rejection, mapped by the
/// caller to a 413.
pub struct GuardedSink {
    sink: BodySink,
    written: u64,
    max: u64,
}

impl GuardedSink {
    pub fn new(sink: BodySink, max: u64) -> Self {
        Self {
            sink,
            written: 0,
            max,
        }
    }

    /// Append `data`, refusing writes that would exceed the cap.
    pub fn write(&mut self, data: &[u8]) -> Result<(), SinkError> {
        if self.written + data.len() as u64 > self.max {
            return Err(SinkError::TooLarge);
        }
        match &mut self.sink {
            BodySink::Memory(buf) => buf.extend_from_slice(data),
            BodySink::External(w) => w.write_all(data).map_err(SinkError::Io)?,
        }
        self.written += data.len() as u64;
        Ok(())
    }

    /// Flush an external sink; memory sinks need no termination.
    pub fn finish(&mut self) -> Result<(), SinkError> {
        if let BodySink::External(w) = &mut self.sink {
            w.flush().map_err(SinkError::Io)?;
        }
        Ok(())
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    /// The collected bytes, when the sink is the core-owned buffer.
    pub fn into_memory(self) -> Option<Vec<u8>> {
        match self.sink {
            BodySink::Memory(buf) => Some(buf),
            BodySink::External(_) => None,
        }
    }
}
