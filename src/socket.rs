//! Plaintext sockets a session can run over

use std::io;
use std::net::TcpStream;
use std::os::fd::AsRawFd;
use std::os::unix::net::UnixStream;

/// Connected byte-stream socket
///
/// The engine reads and writes the raw descriptor directly. The no-delay
/// toggle is only used to bracket the handshake.
pub trait Transport: AsRawFd + Sync {
    fn set_nodelay(&self, nodelay: bool) -> io::Result<()>;
}

impl Transport for TcpStream {
    fn set_nodelay(&self, nodelay: bool) -> io::Result<()> {
        TcpStream::set_nodelay(self, nodelay)
    }
}

/// Unix sockets have no send coalescing to toggle
impl Transport for UnixStream {
    fn set_nodelay(&self, _nodelay: bool) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn test_tcp_nodelay_toggle() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let stream = TcpStream::connect(listener.local_addr().unwrap()).unwrap();

        Transport::set_nodelay(&stream, true).unwrap();
        assert!(stream.nodelay().unwrap());
        Transport::set_nodelay(&stream, false).unwrap();
        assert!(!stream.nodelay().unwrap());
    }

    #[test]
    fn test_unix_nodelay_is_noop() {
        let (a, _b) = UnixStream::pair().unwrap();
        Transport::set_nodelay(&a, false).unwrap();
    }
}
