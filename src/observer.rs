//! Handshake observation
//!
//! The engine reports every handshake message twice: once before it is
//! handled (`Phase::Pre`) and once after (`Phase::Post`). Observers run
//! synchronously on the thread driving the handshake, in wire order.
//!
//! Observers are diagnostics only. A failing or panicking observer never
//! affects the handshake; see [`notify`].

use crate::diag::Diagnostics;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::Level;

/// Handshake message type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandshakeType {
    HelloRequest,
    ClientHello,
    ServerHello,
    HelloVerifyRequest,
    NewSessionTicket,
    EndOfEarlyData,
    HelloRetryRequest,
    EncryptedExtensions,
    Certificate,
    ServerKeyExchange,
    CertificateRequest,
    ServerHelloDone,
    CertificateVerify,
    ClientKeyExchange,
    Finished,
    CertificateStatus,
    SupplementalData,
    KeyUpdate,
    CompressedCertificate,
    /// Not a handshake message on the wire, reported for the record that
    /// switches a direction to encrypted traffic
    ChangeCipherSpec,
    /// Handshake content the observer cannot see because it is encrypted
    EncryptedHandshake,
    Unknown(u8),
}

impl HandshakeType {
    /// Map a wire handshake type byte
    pub fn from_wire(value: u8) -> Self {
        match value {
            0 => HandshakeType::HelloRequest,
            1 => HandshakeType::ClientHello,
            2 => HandshakeType::ServerHello,
            3 => HandshakeType::HelloVerifyRequest,
            4 => HandshakeType::NewSessionTicket,
            5 => HandshakeType::EndOfEarlyData,
            6 => HandshakeType::HelloRetryRequest,
            8 => HandshakeType::EncryptedExtensions,
            11 => HandshakeType::Certificate,
            12 => HandshakeType::ServerKeyExchange,
            13 => HandshakeType::CertificateRequest,
            14 => HandshakeType::ServerHelloDone,
            15 => HandshakeType::CertificateVerify,
            16 => HandshakeType::ClientKeyExchange,
            20 => HandshakeType::Finished,
            22 => HandshakeType::CertificateStatus,
            23 => HandshakeType::SupplementalData,
            24 => HandshakeType::KeyUpdate,
            25 => HandshakeType::CompressedCertificate,
            other => HandshakeType::Unknown(other),
        }
    }

    /// Symbolic name used in diagnostic lines
    pub fn name(&self) -> &'static str {
        match self {
            HandshakeType::HelloRequest => "HELLO REQUEST",
            HandshakeType::ClientHello => "CLIENT HELLO",
            HandshakeType::ServerHello => "SERVER HELLO",
            HandshakeType::HelloVerifyRequest => "HELLO VERIFY REQUEST",
            HandshakeType::NewSessionTicket => "NEW SESSION TICKET",
            HandshakeType::EndOfEarlyData => "END OF EARLY DATA",
            HandshakeType::HelloRetryRequest => "HELLO RETRY REQUEST",
            HandshakeType::EncryptedExtensions => "ENCRYPTED EXTENSIONS",
            HandshakeType::Certificate => "CERTIFICATE",
            HandshakeType::ServerKeyExchange => "SERVER KEY EXCHANGE",
            HandshakeType::CertificateRequest => "CERTIFICATE REQUEST",
            HandshakeType::ServerHelloDone => "SERVER HELLO DONE",
            HandshakeType::CertificateVerify => "CERTIFICATE VERIFY",
            HandshakeType::ClientKeyExchange => "CLIENT KEY EXCHANGE",
            HandshakeType::Finished => "FINISHED",
            HandshakeType::CertificateStatus => "CERTIFICATE STATUS",
            HandshakeType::SupplementalData => "SUPPLEMENTAL DATA",
            HandshakeType::KeyUpdate => "KEY UPDATE",
            HandshakeType::CompressedCertificate => "COMPRESSED CERTIFICATE",
            HandshakeType::ChangeCipherSpec => "CHANGE CIPHER SPEC",
            HandshakeType::EncryptedHandshake => "ENCRYPTED HANDSHAKE",
            HandshakeType::Unknown(_) => "UNKNOWN",
        }
    }
}

impl fmt::Display for HandshakeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Incoming,
    Outgoing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Pre,
    Post,
}

/// One handshake message seen by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandshakeEvent {
    pub message: HandshakeType,
    pub direction: Direction,
    pub phase: Phase,
}

impl HandshakeEvent {
    pub fn new(message: HandshakeType, direction: Direction, phase: Phase) -> Self {
        HandshakeEvent {
            message,
            direction,
            phase,
        }
    }

    pub fn phrase(&self) -> &'static str {
        match (self.direction, self.phase) {
            (Direction::Outgoing, Phase::Pre) => "about to send",
            (Direction::Outgoing, Phase::Post) => "sent",
            (Direction::Incoming, Phase::Pre) => "received",
            (Direction::Incoming, Phase::Post) => "processed",
        }
    }
}

impl fmt::Display for HandshakeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.phrase(), self.message)
    }
}

/// Error an observer may return; it is logged and dropped
pub type ObserverError = Box<dyn std::error::Error + Send + Sync>;

/// Receives handshake events
pub trait HandshakeObserver: Send + Sync {
    fn on_message(&self, event: &HandshakeEvent) -> Result<(), ObserverError>;
}

/// Default observer: one diagnostic line per event
#[derive(Clone)]
pub struct LoggingObserver {
    diagnostics: Diagnostics,
}

impl LoggingObserver {
    pub(crate) fn new(diagnostics: Diagnostics) -> Self {
        LoggingObserver { diagnostics }
    }
}

impl HandshakeObserver for LoggingObserver {
    fn on_message(&self, event: &HandshakeEvent) -> Result<(), ObserverError> {
        self.diagnostics.emit(Level::DEBUG, &event.to_string());
        Ok(())
    }
}

/// Deliver an event, swallowing errors and panics from the observer
pub fn notify(observer: &dyn HandshakeObserver, event: &HandshakeEvent) {
    match panic::catch_unwind(AssertUnwindSafe(|| observer.on_message(event))) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::debug!(%event, error = %e, "handshake observer failed"),
        Err(_) => tracing::warn!(%event, "handshake observer panicked"),
    }
}

/// Hook handed to the engine; wraps an observer with [`notify`]
pub(crate) fn hook_for(observer: Arc<dyn HandshakeObserver>) -> crate::engine::HandshakeHook {
    Box::new(move |event: HandshakeEvent| notify(observer.as_ref(), &event))
}
