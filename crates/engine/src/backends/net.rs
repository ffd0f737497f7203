//! Blocking TCP plumbing shared by the network backends

use std::io::{self, BufReader, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use kvbridge_core::{Error, Result};
use tracing::warn;

/// Connect to the first reachable address of `host:port`.
pub(crate) fn connect(host: &str, port: u16, timeout: Duration) -> Result<TcpStream> {
    let addrs = (host, port)
        .to_socket_addrs()
        .map_err(|e| Error::native(format!("cannot resolve {}:{}: {}", host, port, e)))?;

    let mut last_error = None;
    for addr in addrs {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => {
                stream.set_read_timeout(Some(timeout))?;
                stream.set_write_timeout(Some(timeout))?;
                stream.set_nodelay(true)?;
                return Ok(stream);
            }
            Err(e) => last_error = Some(e),
        }
    }
    Err(match last_error {
        Some(e) => Error::native(format!("cannot connect to {}:{}: {}", host, port, e)),
        None => Error::native(format!("no address for {}:{}", host, port)),
    })
}

/// A reply as read off the socket.
///
/// The outer error means the stream is out of step with the server; the
/// inner one is an error the server answered with.
pub(crate) type Reply<T> = Result<Result<T>>;

/// The error for a server that hung up mid-conversation.
pub(crate) fn closed_by_server() -> Error {
    Error::from(io::Error::new(
        io::ErrorKind::UnexpectedEof,
        "connection closed by server",
    ))
}

/// A socket split into a buffered reader and a writer.
pub(crate) struct Wire {
    pub(crate) reader: BufReader<TcpStream>,
    writer: TcpStream,
    broken: bool,
}

impl Wire {
    pub(crate) fn new(stream: TcpStream) -> Result<Self> {
        let writer = stream.try_clone()?;
        Ok(Self {
            reader: BufReader::new(stream),
            writer,
            broken: false,
        })
    }

    /// Send raw bytes; an I/O failure marks the socket unusable.
    pub(crate) fn send(&mut self, bytes: &[u8]) -> Result<()> {
        let sent = self.writer.write_all(bytes).and_then(|_| self.writer.flush());
        sent.map_err(|e| {
            self.broken = true;
            Error::from(e)
        })
    }

    /// Record the outcome of a read.
    ///
    /// Any transport or framing failure leaves unread bytes behind, so the
    /// socket is shut down and reported closed; server error replies pass
    /// through untouched.
    pub(crate) fn track<T>(&mut self, reply: Reply<T>) -> Result<T> {
        match reply {
            Ok(answer) => answer,
            Err(e) => {
                warn!(target: "kvbridge::conn", error = %e, "dropping socket after bad reply");
                self.shutdown();
                Err(e)
            }
        }
    }

    pub(crate) fn is_broken(&self) -> bool {
        self.broken
    }

    pub(crate) fn shutdown(&mut self) {
        let _ = self.writer.shutdown(std::net::Shutdown::Both);
        self.broken = true;
    }
}
