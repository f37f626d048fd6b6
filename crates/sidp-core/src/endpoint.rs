//! Byte-stream endpoints.
//!
//! The engine never opens sockets. Callers hand it something already
//! connected that implements [`Endpoint`]: a [`TcpStream`], or the in-memory
//! [`MemoryEndpoint`] pair used by tests and loopback tooling.

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, unbounded};

/// A connected, reliable, ordered byte stream.
pub trait Endpoint: Read + Write {
    /// Release the endpoint. Pending reads on the peer see end of stream.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error.
    fn shutdown(&mut self) -> io::Result<()>;

    /// Bound how long a read may block. `None` blocks indefinitely.
    ///
    /// Expired reads fail with `io::ErrorKind::TimedOut` or `WouldBlock`.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error.
    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()>;
}

impl Endpoint for TcpStream {
    fn shutdown(&mut self) -> io::Result<()> {
        match TcpStream::shutdown(self, Shutdown::Both) {
            // Already reset by the peer
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
            other => other,
        }
    }

    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        TcpStream::set_read_timeout(self, timeout)
    }
}

/// One end of an in-memory duplex byte stream.
#[derive(Debug)]
pub struct MemoryEndpoint {
    tx: Option<Sender<Vec<u8>>>,
    rx: Receiver<Vec<u8>>,
    pending: Vec<u8>,
    offset: usize,
    read_timeout: Option<Duration>,
}

impl MemoryEndpoint {
    /// Create two connected endpoints.
    #[must_use]
    pub fn pair() -> (Self, Self) {
        let (a_tx, b_rx) = unbounded();
        let (b_tx, a_rx) = unbounded();
        (Self::new(a_tx, a_rx), Self::new(b_tx, b_rx))
    }

    fn new(tx: Sender<Vec<u8>>, rx: Receiver<Vec<u8>>) -> Self {
        Self {
            tx: Some(tx),
            rx,
            pending: Vec::new(),
            offset: 0,
            read_timeout: None,
        }
    }

    fn next_chunk(&mut self) -> io::Result<Option<Vec<u8>>> {
        let received = match self.read_timeout {
            Some(timeout) => match self.rx.recv_timeout(timeout) {
                Ok(chunk) => Some(chunk),
                Err(RecvTimeoutError::Timeout) => {
                    return Err(io::Error::new(io::ErrorKind::TimedOut, "read timed out"));
                }
                Err(RecvTimeoutError::Disconnected) => None,
            },
            None => self.rx.recv().ok(),
        };
        Ok(received)
    }

    /// Whether the peer has data waiting that this end has not read.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        self.offset < self.pending.len() || !self.rx.is_empty()
    }

    /// Drain everything currently queued without blocking.
    pub fn drain(&mut self) -> Vec<u8> {
        let mut out = self.pending.split_off(self.offset);
        self.pending.clear();
        self.offset = 0;
        loop {
            match self.rx.try_recv() {
                Ok(chunk) => out.extend_from_slice(&chunk),
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => break,
            }
        }
        out
    }
}

impl Read for MemoryEndpoint {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        while self.offset >= self.pending.len() {
            match self.next_chunk()? {
                Some(chunk) => {
                    self.pending = chunk;
                    self.offset = 0;
                }
                None => return Ok(0),
            }
        }

        let available = &self.pending[self.offset..];
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.offset += n;
        Ok(n)
    }
}

impl Write for MemoryEndpoint {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "endpoint shut down"))?;
        if buf.is_empty() {
            return Ok(0);
        }
        tx.send(buf.to_vec())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "peer closed"))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Endpoint for MemoryEndpoint {
    fn shutdown(&mut self) -> io::Result<()> {
        self.tx = None;
        Ok(())
    }

    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        if timeout == Some(Duration::ZERO) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "zero read timeout",
            ));
        }
        self.read_timeout = timeout;
        Ok(())
    }
}
