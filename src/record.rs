//! Application data over an established session
//!
//! Reads and writes are split into pieces no larger than the negotiated
//! maximum record size. Any engine failure marks the session as no longer
//! usable, which also makes teardown skip the close-notify exchange.

use crate::engine::{EngineSession, TlsEngine};
use crate::error::{EngineError, TlsError};
use crate::session::TlsSession;
use bytes::{Buf, BytesMut};
use std::io;
use std::ops::Range;
use tracing::trace;

/// Byte stream over a [`TlsSession`]
///
/// There is no seeking, no length and no position: the stream only moves
/// forward.
pub struct RecordStream<'s, E: TlsEngine> {
    session: TlsSession<'s, E>,
}

impl<'s, E: TlsEngine> RecordStream<'s, E> {
    pub fn new(session: TlsSession<'s, E>) -> Self {
        RecordStream { session }
    }

    pub fn session(&self) -> &TlsSession<'s, E> {
        &self.session
    }

    pub fn into_session(self) -> TlsSession<'s, E> {
        self.session
    }

    /// Receive at most `max_count` bytes into `buffer[offset..]`
    ///
    /// A single call never asks the engine for more than one record's worth
    /// of plaintext. Returns 0 once the peer has closed the session.
    pub fn read(
        &mut self,
        buffer: &mut [u8],
        offset: usize,
        max_count: usize,
    ) -> Result<usize, TlsError> {
        let range = checked_range(buffer.len(), offset, max_count)?;
        let want = max_count.min(self.session.max_record_size().max(1));
        let target = &mut buffer[range.start..range.start + want];

        match self.session.engine_session_mut().record_recv(target) {
            Ok(n) => Ok(n),
            Err(e) => {
                self.session.mark_failed();
                Err(e.into())
            }
        }
    }

    /// Send all of `buffer[offset..offset + count]`
    pub fn write(&mut self, buffer: &[u8], offset: usize, count: usize) -> Result<(), TlsError> {
        let range = checked_range(buffer.len(), offset, count)?;
        let max_record = self.session.max_record_size().max(1);
        let mut remaining = BytesMut::from(&buffer[range]);

        while remaining.has_remaining() {
            let chunk = remaining.len().min(max_record);
            match self
                .session
                .engine_session_mut()
                .record_send(&remaining[..chunk])
            {
                Ok(0) => {
                    self.session.mark_failed();
                    return Err(EngineError::new(
                        EngineError::PREMATURE_TERMINATION,
                        "record send made no progress",
                    )
                    .into());
                }
                Ok(sent) => {
                    trace!(sent, chunk, left = remaining.len() - sent.min(chunk), "record sent");
                    remaining.advance(sent.min(chunk));
                }
                Err(e) => {
                    self.session.mark_failed();
                    return Err(e.into());
                }
            }
        }

        Ok(())
    }

    pub fn can_read(&self) -> bool {
        self.session.is_ok()
    }

    pub fn can_write(&self) -> bool {
        self.session.is_ok()
    }

    /// Records are sent as soon as they are written
    pub fn flush(&mut self) -> Result<(), TlsError> {
        Ok(())
    }

    /// Shut the session down; identical to dropping the stream
    pub fn dispose(self) {
        self.session.dispose();
    }
}

impl<'s, E: TlsEngine> From<TlsSession<'s, E>> for RecordStream<'s, E> {
    fn from(session: TlsSession<'s, E>) -> Self {
        RecordStream::new(session)
    }
}

impl<'s, E: TlsEngine> io::Read for RecordStream<'s, E> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let len = buf.len();
        Ok(RecordStream::read(self, buf, 0, len)?)
    }
}

impl<'s, E: TlsEngine> io::Write for RecordStream<'s, E> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        RecordStream::write(self, buf, 0, buf.len())?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(RecordStream::flush(self)?)
    }
}

fn checked_range(len: usize, offset: usize, count: usize) -> Result<Range<usize>, TlsError> {
    if count == 0 {
        return Err(TlsError::InvalidArgument("count must be positive".into()));
    }
    match offset.checked_add(count) {
        Some(end) if end <= len => Ok(offset..end),
        _ => Err(TlsError::InvalidArgument(format!(
            "offset {} plus count {} exceeds buffer of {} bytes",
            offset, count, len
        ))),
    }
}
