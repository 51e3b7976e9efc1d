//! TLS session establishment and teardown
//!
//! A [`TlsSession`] binds one engine session to one borrowed socket. It is
//! only ever handed out after a successful handshake, so every session value
//! is ready for record I/O (see [`RecordStream`](crate::RecordStream)).
//!
//! # Examples
//!
//! ```no_run
//! use tls_session::{ContextConfig, OpensslEngine, TlsContext, TlsSession};
//! use std::net::TcpStream;
//!
//! let context = TlsContext::new(OpensslEngine::new(), ContextConfig::default());
//! let socket = TcpStream::connect("example.com:443").unwrap();
//!
//! let session = TlsSession::builder(&context, &socket)
//!     .alpn(&["h2", "http/1.1"])
//!     .establish()
//!     .unwrap();
//! println!("{} {}", session.protocol(), session.cipher_suite());
//! ```

use crate::context::{ContextLease, TlsContext};
use crate::engine::{EngineSession, Role, SessionFlags, TlsEngine};
use crate::error::{EngineResult, TlsError};
use crate::observer::{self, HandshakeObserver, LoggingObserver};
use crate::socket::Transport;
use crate::ticket::ResumptionTicket;
use crate::version::ProtocolVersion;
use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Default handshake timeout
pub const DEFAULT_HANDSHAKE_TIMEOUT_SECS: u64 = 10;

/// Diffie-Hellman prime size handed to the engine; legacy default, not
/// hardened
pub const LEGACY_DH_PRIME_BITS: u32 = 1024;

/// Resumption cache expiration, effectively unbounded
pub const RESUMPTION_EXPIRATION_SECS: u32 = u32::MAX;

/// How a priority string is applied to the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority<'a> {
    /// Engine default
    Default,
    /// Engine default followed by these `+`/`-` modifiers
    DefaultAppend(&'a str),
    /// Full replacement of the default
    Direct(&'a str),
}

impl<'a> Priority<'a> {
    pub fn parse(priority: &'a str) -> Self {
        if priority.is_empty() {
            Priority::Default
        } else if priority.starts_with('+') || priority.starts_with('-') {
            Priority::DefaultAppend(priority)
        } else {
            Priority::Direct(priority)
        }
    }

    pub(crate) fn apply<S: EngineSession>(&self, session: &mut S) -> EngineResult<()> {
        match *self {
            Priority::Default => session.set_default_priority(),
            Priority::DefaultAppend(modifiers) => session.set_default_priority_append(modifiers),
            Priority::Direct(priority) => session.set_priority_direct(priority),
        }
    }
}

/// Configures and establishes a [`TlsSession`]
pub struct SessionBuilder<'s, 'r, E: TlsEngine> {
    context: TlsContext<E>,
    socket: &'s dyn Transport,
    role: Role,
    alpn: Vec<Vec<u8>>,
    resume_from: Option<&'r TlsSession<'r, E>>,
    priority: String,
    handshake_timeout: Option<Duration>,
    observer: Option<Arc<dyn HandshakeObserver>>,
}

impl<'s, 'r, E: TlsEngine> SessionBuilder<'s, 'r, E> {
    pub fn role(mut self, role: Role) -> Self {
        self.role = role;
        self
    }

    pub fn server(self) -> Self {
        self.role(Role::Server)
    }

    /// Protocols to offer (client) or accept (server), in preference order
    pub fn alpn(mut self, protocols: &[&str]) -> Self {
        self.alpn = protocols.iter().map(|p| p.as_bytes().to_vec()).collect();
        self
    }

    /// Offer to resume `session`'s state
    pub fn resume_from(mut self, session: &'r TlsSession<'r, E>) -> Self {
        self.resume_from = Some(session);
        self
    }

    /// Engine priority string; see [`Priority::parse`]
    pub fn priority(mut self, priority: impl Into<String>) -> Self {
        self.priority = priority.into();
        self
    }

    /// `None` lets the handshake block until the peer answers or the socket
    /// fails
    pub fn handshake_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Replace the default observer, which logs one line per message to the
    /// context's diagnostics
    pub fn observer(mut self, observer: Arc<dyn HandshakeObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Configure the engine session and run the handshake
    pub fn establish(self) -> Result<TlsSession<'s, E>, TlsError> {
        let lease = self.context.acquire()?;
        let mut engine = self.context.engine().session_new(
            self.role,
            SessionFlags {
                no_legacy_tickets: true,
            },
        )?;

        engine.set_resumption_expiration(RESUMPTION_EXPIRATION_SECS);
        Priority::parse(&self.priority).apply(&mut engine)?;
        engine.set_dh_prime_bits(LEGACY_DH_PRIME_BITS);
        engine.set_credentials(lease.credentials())?;
        engine.set_handshake_timeout(self.handshake_timeout);
        engine.set_transport(self.socket.as_raw_fd());
        if !self.alpn.is_empty() {
            engine.set_alpn_protocols(&self.alpn)?;
        }

        let observer = match self.observer {
            Some(observer) => observer,
            None => Arc::new(LoggingObserver::new(self.context.diagnostics().clone())),
        };
        engine.set_handshake_hook(observer::hook_for(observer));

        if let Some(source) = self.resume_from {
            ResumptionTicket::extract(source)?.install(&mut engine)?;
        }

        self.socket.set_nodelay(false)?;
        let handshake = engine.handshake();
        if let Err(e) = self.socket.set_nodelay(true) {
            // The handshake outcome decides; the session stays usable with
            // coalescing on.
            warn!(error = %e, "failed to re-enable no-delay after handshake");
        }
        handshake?;

        let protocol_name = engine.protocol_name().unwrap_or_default();
        let session = TlsSession {
            protocol: ProtocolVersion::from_engine_name(&protocol_name),
            protocol_name,
            cipher_suite: engine.cipher_description(),
            alpn: engine.selected_alpn(),
            max_record_size: engine.max_record_size(),
            resumed: engine.is_resumed(),
            ok: true,
            role: self.role,
            socket: self.socket,
            engine,
            lease,
        };

        debug!(
            role = ?session.role,
            protocol = %session.protocol_name,
            cipher = %session.cipher_suite,
            alpn = ?session.alpn_str(),
            resumed = session.resumed,
            "TLS session established"
        );
        Ok(session)
    }
}

/// An established TLS session over a borrowed socket
///
/// Dropping the session (or calling [`dispose`](Self::dispose)) drains any
/// decrypted plaintext still buffered, sends close-notify, releases the
/// engine session and gives the context reference back.
pub struct TlsSession<'s, E: TlsEngine> {
    // Declared before `lease`: the engine session is released first.
    engine: E::Session,
    socket: &'s dyn Transport,
    role: Role,
    protocol: ProtocolVersion,
    protocol_name: String,
    cipher_suite: String,
    alpn: Option<Vec<u8>>,
    max_record_size: usize,
    resumed: bool,
    ok: bool,
    lease: ContextLease<E>,
}

impl<'s, E: TlsEngine> TlsSession<'s, E> {
    pub fn builder<'r, S: Transport>(
        context: &TlsContext<E>,
        socket: &'s S,
    ) -> SessionBuilder<'s, 'r, E> {
        SessionBuilder {
            context: context.clone(),
            socket,
            role: Role::Client,
            alpn: Vec::new(),
            resume_from: None,
            priority: String::new(),
            handshake_timeout: Some(Duration::from_secs(DEFAULT_HANDSHAKE_TIMEOUT_SECS)),
            observer: None,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn protocol(&self) -> ProtocolVersion {
        self.protocol
    }

    /// Protocol name exactly as the engine reported it
    pub fn protocol_name(&self) -> &str {
        &self.protocol_name
    }

    pub fn cipher_suite(&self) -> &str {
        &self.cipher_suite
    }

    pub fn alpn(&self) -> Option<&[u8]> {
        self.alpn.as_deref()
    }

    pub fn alpn_str(&self) -> Option<&str> {
        self.alpn().and_then(|p| std::str::from_utf8(p).ok())
    }

    pub fn max_record_size(&self) -> usize {
        self.max_record_size
    }

    /// Whether the engine resumed earlier session state
    pub fn is_resumed(&self) -> bool {
        self.resumed
    }

    /// False once a record operation has failed or teardown has begun
    pub fn is_ok(&self) -> bool {
        self.ok
    }

    pub fn socket(&self) -> &'s dyn Transport {
        self.socket
    }

    pub fn context(&self) -> &TlsContext<E> {
        self.lease.context()
    }

    /// Capture this session's state for resuming it later
    pub fn ticket(&self) -> EngineResult<ResumptionTicket> {
        ResumptionTicket::extract(self)
    }

    /// Wait up to `timeout` (`None` waits indefinitely) for something to
    /// read
    ///
    /// Plaintext the engine already decrypted counts as readable without
    /// touching the socket.
    pub fn poll_readable(&self, timeout: Option<Duration>) -> Result<bool, TlsError> {
        use libc::{poll, pollfd, POLLIN};

        if self.engine.pending() > 0 {
            return Ok(true);
        }

        let mut pfd = pollfd {
            fd: self.socket.as_raw_fd(),
            events: POLLIN,
            revents: 0,
        };

        let timeout_ms = timeout
            .map(|d| d.as_millis().min(i32::MAX as u128) as i32)
            .unwrap_or(-1);

        let result = unsafe { poll(&mut pfd as *mut pollfd, 1, timeout_ms) };

        if result < 0 {
            return Err(TlsError::Io(io::Error::last_os_error()));
        }

        Ok(result > 0)
    }

    /// Gracefully shut down; identical to dropping the session
    pub fn dispose(self) {}

    pub(crate) fn engine_session(&self) -> &E::Session {
        &self.engine
    }

    pub(crate) fn engine_session_mut(&mut self) -> &mut E::Session {
        &mut self.engine
    }

    pub(crate) fn mark_failed(&mut self) {
        self.ok = false;
    }

    fn teardown(&mut self) {
        if !self.ok {
            return;
        }
        self.ok = false;

        let pending = self.engine.pending();
        if pending > 0 {
            let mut scratch = vec![0u8; pending];
            let mut drained = 0;
            while drained < pending {
                match self.engine.record_recv(&mut scratch[drained..]) {
                    Ok(0) => break,
                    Ok(n) => drained += n,
                    Err(e) => {
                        debug!(error = %e, pending, drained, "draining plaintext failed");
                        break;
                    }
                }
            }
        }

        if let Err(e) = self.engine.bye() {
            debug!(error = %e, "close-notify failed");
        }
    }
}

impl<'s, E: TlsEngine> Drop for TlsSession<'s, E> {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl<'s, E: TlsEngine> fmt::Debug for TlsSession<'s, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsSession")
            .field("role", &self.role)
            .field("protocol", &self.protocol)
            .field("cipher_suite", &self.cipher_suite)
            .field("alpn", &self.alpn_str())
            .field("max_record_size", &self.max_record_size)
            .field("resumed", &self.resumed)
            .field("ok", &self.ok)
            .finish()
    }
}
