//! tls-session - TLS sessions over caller-owned sockets
//!
//! This crate wraps a TLS engine behind a small synchronous API:
//!
//! - [`TlsContext`]: reference-counted engine initialization and the shared
//!   credential store
//! - [`TlsSession`]: handshake, negotiated parameters and graceful teardown
//! - [`RecordStream`]: application data, chunked to the record size
//! - [`ResumptionTicket`]: session state carried from one session to the next
//! - [`HandshakeObserver`]: per-message handshake reporting
//!
//! [`OpensslEngine`] drives the system OpenSSL. Everything blocks the calling
//! thread; nothing runs in the background.
//!
//! # Examples
//!
//! ```no_run
//! use std::io::{Read, Write};
//! use std::net::TcpStream;
//! use tls_session::{ContextConfig, OpensslEngine, RecordStream, TlsContext, TlsSession};
//!
//! let context = TlsContext::new(OpensslEngine::new(), ContextConfig::default());
//! let socket = TcpStream::connect("127.0.0.1:8443").unwrap();
//!
//! let session = TlsSession::builder(&context, &socket).establish().unwrap();
//! let mut stream = RecordStream::new(session);
//! stream.write_all(b"ping").unwrap();
//!
//! let mut reply = [0u8; 4];
//! stream.read_exact(&mut reply).unwrap();
//! stream.dispose();
//! ```

pub mod context;
pub mod diag;
pub mod engine;
pub mod error;
pub mod observer;
pub mod record;
pub mod session;
pub mod socket;
pub mod ticket;
pub mod version;

pub use context::{ContextConfig, ContextLease, TlsContext, DEFAULT_LOG_QUEUE_CAPACITY};
pub use diag::{LogSink, MemorySink, TracingSink};
pub use engine::{EngineSession, OpensslEngine, Role, TlsEngine};
pub use error::{EngineError, TlsError};
pub use observer::{Direction, HandshakeEvent, HandshakeObserver, HandshakeType, Phase};
pub use record::RecordStream;
pub use session::{Priority, SessionBuilder, TlsSession, DEFAULT_HANDSHAKE_TIMEOUT_SECS};
pub use socket::Transport;
pub use ticket::ResumptionTicket;
pub use version::ProtocolVersion;
