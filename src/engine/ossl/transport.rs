//! Borrowed-descriptor transport for OpenSSL streams
//!
//! OpenSSL reads and writes records straight from the caller's socket. The
//! descriptor is wrapped without taking ownership, so dropping the stream
//! never closes the caller's socket.
//!
//! During the handshake the transport also taps the wire: it parses TLS
//! record headers in both directions and reports each handshake message to
//! the installed hook. OpenSSL does not expose a per-message callback in
//! its safe API, so the tap is how handshake observation works here.
//!
//! ## Record format
//!
//! ```text
//! ContentType (1 byte)
//! ProtocolVersion (2 bytes)
//! Length (2 bytes)
//! Fragment (variable)
//! ```
//!
//! Handshake fragments carry `HandshakeType (1 byte)`, `Length (3 bytes)`
//! and the body. Messages may span records and records may carry several
//! messages.

use crate::engine::HandshakeHook;
use crate::observer::{Direction, HandshakeEvent, HandshakeType, Phase};
use socket2::Socket;
use std::io::{self, Read, Write};
use std::mem::ManuallyDrop;
use std::os::fd::{FromRawFd, RawFd};
use std::time::Duration;
use tracing::trace;

const RECORD_HEADER_SIZE: usize = 5;
const HANDSHAKE_HEADER_SIZE: usize = 4;

const CONTENT_TYPE_CHANGE_CIPHER_SPEC: u8 = 0x14;
const CONTENT_TYPE_HANDSHAKE: u8 = 0x16;
const CONTENT_TYPE_APPLICATION_DATA: u8 = 0x17;

/// Socket transport that does not own its descriptor
pub(crate) struct FdTransport {
    socket: ManuallyDrop<Socket>,
    tap: Option<WireTap>,
}

impl FdTransport {
    /// Wrap `fd` without taking ownership.
    ///
    /// # Safety
    ///
    /// `fd` must be an open socket for as long as the transport exists.
    pub(crate) unsafe fn borrow(fd: RawFd) -> Self {
        FdTransport {
            socket: ManuallyDrop::new(Socket::from_raw_fd(fd)),
            tap: None,
        }
    }

    /// Report handshake messages to `hook` until [`finish_tap`](Self::finish_tap)
    pub(crate) fn with_tap(mut self, hook: HandshakeHook) -> Self {
        self.tap = Some(WireTap::new(hook));
        self
    }

    /// Stop tapping; incoming messages still waiting for their
    /// "processed" report get it now.
    pub(crate) fn finish_tap(&mut self) {
        if let Some(mut tap) = self.tap.take() {
            tap.flush_processed();
        }
    }

    pub(crate) fn timeouts(&self) -> io::Result<(Option<Duration>, Option<Duration>)> {
        Ok((self.socket.read_timeout()?, self.socket.write_timeout()?))
    }

    pub(crate) fn set_timeouts(
        &self,
        read: Option<Duration>,
        write: Option<Duration>,
    ) -> io::Result<()> {
        self.socket.set_read_timeout(read)?;
        self.socket.set_write_timeout(write)
    }
}

impl Read for FdTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let Some(tap) = self.tap.as_mut() else {
            return self.socket.read(buf);
        };

        // OpenSSL only reads again once it has handled what it already has.
        tap.flush_processed();
        let n = self.socket.read(buf)?;
        tap.on_read(&buf[..n]);
        Ok(n)
    }
}

impl Write for FdTransport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let Some(tap) = self.tap.as_mut() else {
            return self.socket.write(buf);
        };

        tap.flush_processed();
        tap.before_write(buf);
        let n = self.socket.write(buf)?;
        tap.after_write(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.socket.flush()
    }
}

/// Turns raw wire bytes into handshake events
struct WireTap {
    hook: HandshakeHook,
    outgoing: RecordSniffer,
    incoming: RecordSniffer,
    /// Outgoing messages already announced but not yet fully written
    announced: usize,
    /// Incoming messages received but not yet reported as processed
    unprocessed: Vec<HandshakeType>,
}

impl WireTap {
    fn new(hook: HandshakeHook) -> Self {
        WireTap {
            hook,
            outgoing: RecordSniffer::default(),
            incoming: RecordSniffer::default(),
            announced: 0,
            unprocessed: Vec::new(),
        }
    }

    fn before_write(&mut self, buf: &[u8]) {
        let mut preview = self.outgoing.clone();
        let upcoming = preview.feed(buf);
        for message in upcoming.iter().skip(self.announced) {
            (self.hook)(HandshakeEvent::new(*message, Direction::Outgoing, Phase::Pre));
        }
        self.announced = self.announced.max(upcoming.len());
    }

    fn after_write(&mut self, written: &[u8]) {
        let sent = self.outgoing.feed(written);
        self.announced = self.announced.saturating_sub(sent.len());
        for message in sent {
            (self.hook)(HandshakeEvent::new(message, Direction::Outgoing, Phase::Post));
        }
    }

    fn on_read(&mut self, data: &[u8]) {
        for message in self.incoming.feed(data) {
            (self.hook)(HandshakeEvent::new(message, Direction::Incoming, Phase::Pre));
            self.unprocessed.push(message);
        }
    }

    fn flush_processed(&mut self) {
        for message in self.unprocessed.drain(..) {
            (self.hook)(HandshakeEvent::new(message, Direction::Incoming, Phase::Post));
        }
    }
}

/// One direction of record-layer parsing
#[derive(Debug, Clone, Default)]
struct RecordSniffer {
    pending: Vec<u8>,
    handshake: Vec<u8>,
    /// Set once this direction has sent ChangeCipherSpec
    encrypted: bool,
}

impl RecordSniffer {
    /// Feed wire bytes, returning every message completed by them
    fn feed(&mut self, data: &[u8]) -> Vec<HandshakeType> {
        self.pending.extend_from_slice(data);

        let mut messages = Vec::new();
        let mut consumed = 0;
        while self.pending.len() - consumed >= RECORD_HEADER_SIZE {
            let header = &self.pending[consumed..consumed + RECORD_HEADER_SIZE];
            let content_type = header[0];
            let length = u16::from_be_bytes([header[3], header[4]]) as usize;
            let end = consumed + RECORD_HEADER_SIZE + length;
            if self.pending.len() < end {
                break;
            }

            let fragment = consumed + RECORD_HEADER_SIZE..end;
            match content_type {
                CONTENT_TYPE_CHANGE_CIPHER_SPEC => {
                    messages.push(HandshakeType::ChangeCipherSpec);
                    self.encrypted = true;
                }
                CONTENT_TYPE_HANDSHAKE if !self.encrypted => {
                    self.handshake.extend_from_slice(&self.pending[fragment]);
                    self.split_messages(&mut messages);
                }
                CONTENT_TYPE_HANDSHAKE | CONTENT_TYPE_APPLICATION_DATA => {
                    messages.push(HandshakeType::EncryptedHandshake);
                }
                other => trace!(content_type = other, length, "skipping record"),
            }
            consumed = end;
        }

        self.pending.drain(..consumed);
        messages
    }

    fn split_messages(&mut self, messages: &mut Vec<HandshakeType>) {
        let mut consumed = 0;
        while self.handshake.len() - consumed >= HANDSHAKE_HEADER_SIZE {
            let header = &self.handshake[consumed..consumed + HANDSHAKE_HEADER_SIZE];
            let length = u32::from_be_bytes([0, header[1], header[2], header[3]]) as usize;
            let end = consumed + HANDSHAKE_HEADER_SIZE + length;
            if self.handshake.len() < end {
                break;
            }
            messages.push(HandshakeType::from_wire(header[0]));
            consumed = end;
        }
        self.handshake.drain(..consumed);
    }
}
