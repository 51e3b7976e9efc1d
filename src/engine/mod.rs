//! TLS engine boundary
//!
//! The session layer never touches a TLS library directly. It drives an
//! engine through [`TlsEngine`] (process-wide operations) and
//! [`EngineSession`] (one connection). [`OpensslEngine`] is the production
//! implementation.
//!
//! Engine calls report failures as [`EngineError`](crate::EngineError) with
//! a negative code. The session layer adds no retries on top.

pub mod ossl;

#[cfg(test)]
pub(crate) mod mock;

pub use self::ossl::{OpensslCredentials, OpensslEngine, OpensslSession};

use crate::error::EngineResult;
use crate::observer::HandshakeEvent;
use std::os::fd::RawFd;
use std::sync::Arc;
use std::time::Duration;

/// Which end of the handshake a session plays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Role {
    #[default]
    Client,
    Server,
}

/// Flags fixed at engine session creation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionFlags {
    /// Do not issue session tickets on TLS 1.2 and below
    pub no_legacy_tickets: bool,
}

/// Per-message handshake callback installed into an engine session
pub type HandshakeHook = Box<dyn FnMut(HandshakeEvent) + Send>;

/// Process-wide engine operations
pub trait TlsEngine: Send + Sync + 'static {
    /// Shared credential store, read-only once created
    type Credentials: Send + Sync + 'static;

    type Session: EngineSession<Credentials = Self::Credentials>;

    fn version(&self) -> String;

    fn global_init(&self) -> EngineResult<()>;

    fn global_deinit(&self);

    fn credentials_new(&self) -> EngineResult<Self::Credentials>;

    fn session_new(&self, role: Role, flags: SessionFlags) -> EngineResult<Self::Session>;
}

/// One engine session bound to one transport
///
/// Configuration calls happen before [`handshake`](Self::handshake); the
/// query and record calls are only meaningful after it succeeds.
pub trait EngineSession: Send {
    type Credentials;

    /// Lifetime in seconds of the state exported by `session_data`
    fn set_resumption_expiration(&mut self, seconds: u32);

    fn set_default_priority(&mut self) -> EngineResult<()>;

    /// Default priority followed by `modifiers` (a `+`/`-` prefixed list)
    fn set_default_priority_append(&mut self, modifiers: &str) -> EngineResult<()>;

    /// Replace the priority outright
    fn set_priority_direct(&mut self, priority: &str) -> EngineResult<()>;

    /// Smallest finite-field Diffie-Hellman prime to use
    ///
    /// Server sessions offer a group of at least `bits` when a DHE suite is
    /// negotiated. Client sessions only record it: the server picks the
    /// group, and the engine's own minimum decides what a client accepts.
    fn set_dh_prime_bits(&mut self, bits: u32);

    fn set_credentials(&mut self, credentials: &Arc<Self::Credentials>) -> EngineResult<()>;

    fn set_handshake_timeout(&mut self, timeout: Option<Duration>);

    /// Read and write records directly on `fd`. The caller keeps the
    /// descriptor open for the lifetime of the session.
    fn set_transport(&mut self, fd: RawFd);

    fn set_alpn_protocols(&mut self, protocols: &[Vec<u8>]) -> EngineResult<()>;

    fn set_handshake_hook(&mut self, hook: HandshakeHook);

    fn handshake(&mut self) -> EngineResult<()>;

    fn protocol_name(&self) -> Option<String>;

    fn cipher_description(&self) -> String;

    fn selected_alpn(&self) -> Option<Vec<u8>>;

    fn max_record_size(&self) -> usize;

    /// Bytes already decrypted and waiting to be read
    fn pending(&self) -> usize;

    fn record_send(&mut self, data: &[u8]) -> EngineResult<usize>;

    /// Returns 0 once the peer has sent close-notify
    fn record_recv(&mut self, buf: &mut [u8]) -> EngineResult<usize>;

    /// Send close-notify and wait for the peer's
    fn bye(&mut self) -> EngineResult<()>;

    fn session_data(&self) -> EngineResult<Vec<u8>>;

    fn set_session_data(&mut self, data: &[u8]) -> EngineResult<()>;

    fn is_resumed(&self) -> bool;
}
