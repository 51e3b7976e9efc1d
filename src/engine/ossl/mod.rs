//! OpenSSL engine
//!
//! Maps the engine capability set onto the `openssl` crate:
//!
//! - the credential store is one `SslContext` carrying the built-in
//!   certificate, the server session cache and the ALPN selection callback
//! - priorities are OpenSSL cipher lists (`DEFAULT`, `DEFAULT:<modifiers>`
//!   or a full list)
//! - the handshake timeout is applied as socket read/write timeouts for the
//!   duration of the handshake
//! - handshake observation comes from the transport's wire tap
//!
//! The `Ssl` object only exists once credentials are attached. Settings
//! made before that are kept and applied when it is created.

mod builtin_cert;
mod transport;

pub use self::builtin_cert::BUILTIN_CERT;

use self::transport::FdTransport;
use super::{EngineSession, HandshakeHook, Role, SessionFlags, TlsEngine};
use crate::error::{EngineError, EngineResult};
use foreign_types::ForeignTypeRef;
use libc::c_long;
use openssl::bn::BigNum;
use openssl::dh::Dh;
use openssl::error::ErrorStack;
use openssl::ex_data::Index;
use openssl::pkey::{PKey, Params};
use openssl::ssl::{
    self, AlpnError, ErrorCode, HandshakeError, ShutdownResult, Ssl, SslContext,
    SslContextBuilder, SslMethod, SslOptions, SslRef, SslSession, SslSessionCacheMode,
    SslStream, SslVerifyMode,
};
use openssl::x509::X509;
use std::io;
use std::os::fd::RawFd;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::trace;

/// Largest plaintext fragment OpenSSL puts in one record
pub const MAX_PLAINTEXT_RECORD: usize = 16384;

const DEFAULT_CIPHER_LIST: &str = "DEFAULT";
const SESSION_ID_CONTEXT: &[u8] = b"tls-session";

/// Server session cache lifetime; also the default for new client sessions
const SESSION_CACHE_TIMEOUT_SECS: u32 = u32::MAX;

// Session lifetimes are not exposed by the `openssl` crate.
extern "C" {
    fn SSL_CTX_set_timeout(ctx: *mut openssl_sys::SSL_CTX, timeout: c_long) -> c_long;
    fn SSL_SESSION_set_timeout(session: *mut openssl_sys::SSL_SESSION, timeout: c_long) -> c_long;
}

/// Seconds as the C `long` OpenSSL stores, saturating
fn session_timeout(seconds: u32) -> c_long {
    c_long::try_from(seconds).unwrap_or(c_long::MAX)
}

impl From<ErrorStack> for EngineError {
    fn from(err: ErrorStack) -> Self {
        EngineError::new(EngineError::INTERNAL, err.to_string())
    }
}

impl From<ssl::Error> for EngineError {
    fn from(err: ssl::Error) -> Self {
        ssl_error(&err)
    }
}

fn ssl_error(err: &ssl::Error) -> EngineError {
    match err.io_error() {
        Some(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
            EngineError::new(EngineError::TIMED_OUT, format!("timed out: {}", e))
        }
        None if err.code() == ErrorCode::SYSCALL => EngineError::new(
            EngineError::PREMATURE_TERMINATION,
            "peer closed the connection without close-notify",
        ),
        _ => EngineError::new(-err.code().as_raw(), err.to_string()),
    }
}

fn io_failure(err: io::Error) -> EngineError {
    EngineError::new(EngineError::INTERNAL, err.to_string())
}

fn not_ready(what: &str) -> EngineError {
    EngineError::new(EngineError::INVALID_REQUEST, format!("{} not available yet", what))
}

/// ALPN protocols a server-role session accepts
struct AlpnList(Vec<Vec<u8>>);

fn alpn_index() -> EngineResult<Index<Ssl, AlpnList>> {
    static INDEX: OnceLock<Index<Ssl, AlpnList>> = OnceLock::new();
    if let Some(index) = INDEX.get() {
        return Ok(*index);
    }
    let index = Ssl::new_ex_index::<AlpnList>()?;
    Ok(*INDEX.get_or_init(|| index))
}

/// Encode protocols in wire format (length-prefixed)
fn encode_alpn(protocols: &[Vec<u8>]) -> EngineResult<Vec<u8>> {
    let mut wire = Vec::new();
    for proto in protocols {
        let len = u8::try_from(proto.len())
            .ok()
            .filter(|len| *len > 0)
            .ok_or_else(|| EngineError::new(EngineError::INVALID_REQUEST, "bad ALPN protocol length"))?;
        wire.push(len);
        wire.extend_from_slice(proto);
    }
    Ok(wire)
}

/// Pick the first protocol the client offered that we also accept
fn select_alpn<'a>(accepted: &[Vec<u8>], offered: &'a [u8]) -> Option<&'a [u8]> {
    let mut pos = 0;
    while pos < offered.len() {
        let len = offered[pos] as usize;
        pos += 1;
        if pos + len > offered.len() {
            break;
        }
        let candidate = &offered[pos..pos + len];
        if accepted.iter().any(|proto| proto.as_slice() == candidate) {
            return Some(candidate);
        }
        pos += len;
    }
    None
}

/// Smallest well-known MODP group of at least `bits`
fn dh_group(bits: u32) -> Result<Dh<Params>, ErrorStack> {
    let prime = match bits {
        0..=1024 => BigNum::get_rfc2409_prime_1024()?,
        1025..=1536 => BigNum::get_rfc3526_prime_1536()?,
        1537..=2048 => BigNum::get_rfc3526_prime_2048()?,
        2049..=3072 => BigNum::get_rfc3526_prime_3072()?,
        _ => BigNum::get_rfc3526_prime_4096()?,
    };
    Dh::from_pqg(prime, None, BigNum::from_u32(2)?)
}

fn install_dh(ssl: &mut SslRef, bits: u32) {
    // Only consulted if a DHE suite is negotiated.
    ssl.set_tmp_dh_callback(move |_ssl, _is_export, _keylength| dh_group(bits));
}

/// Engine backed by the system OpenSSL
#[derive(Debug, Default, Clone, Copy)]
pub struct OpensslEngine;

impl OpensslEngine {
    pub fn new() -> Self {
        OpensslEngine
    }
}

impl TlsEngine for OpensslEngine {
    type Credentials = OpensslCredentials;
    type Session = OpensslSession;

    fn version(&self) -> String {
        openssl::version::version().to_string()
    }

    fn global_init(&self) -> EngineResult<()> {
        openssl::init();
        Ok(())
    }

    fn global_deinit(&self) {
        // OpenSSL cannot be initialized again after cleanup, so its global
        // state is left for process exit.
        trace!("openssl global state retained until exit");
    }

    fn credentials_new(&self) -> EngineResult<OpensslCredentials> {
        OpensslCredentials::builtin()
    }

    fn session_new(&self, role: Role, flags: SessionFlags) -> EngineResult<OpensslSession> {
        Ok(OpensslSession::new(role, flags))
    }
}

/// Shared credential store
pub struct OpensslCredentials {
    ctx: SslContext,
}

impl OpensslCredentials {
    /// Store carrying the built-in certificate
    ///
    /// Legacy session tickets are disabled here: OpenSSL keeps ticket policy
    /// on the context, and TLS 1.2 resumption uses the server session cache
    /// instead.
    pub fn builtin() -> EngineResult<Self> {
        let alpn_index = alpn_index()?;
        let mut builder = SslContextBuilder::new(SslMethod::tls())?;

        builder.set_verify(SslVerifyMode::NONE);
        builder.set_options(SslOptions::NO_TICKET);
        builder.set_session_cache_mode(SslSessionCacheMode::SERVER);
        builder.set_session_id_context(SESSION_ID_CONTEXT)?;
        // SAFETY: the builder owns a valid SSL_CTX.
        unsafe {
            SSL_CTX_set_timeout(builder.as_ptr(), session_timeout(SESSION_CACHE_TIMEOUT_SECS));
        }

        let cert = X509::from_pem(BUILTIN_CERT.as_bytes())?;
        builder.set_certificate(&cert)?;
        let key = PKey::private_key_from_pem(BUILTIN_CERT.as_bytes())?;
        builder.set_private_key(&key)?;

        builder.set_alpn_select_callback(move |ssl, offered| {
            let accepted = ssl.ex_data(alpn_index).ok_or(AlpnError::NOACK)?;
            select_alpn(&accepted.0, offered).ok_or(AlpnError::NOACK)
        });

        Ok(OpensslCredentials {
            ctx: builder.build(),
        })
    }

    pub fn context(&self) -> &SslContext {
        &self.ctx
    }
}

/// One OpenSSL connection
pub struct OpensslSession {
    role: Role,
    cache_expiration: Option<u32>,
    cipher_list: Option<String>,
    dh_prime_bits: Option<u32>,
    handshake_timeout: Option<Duration>,
    fd: Option<RawFd>,
    hook: Option<HandshakeHook>,
    ssl: Option<Ssl>,
    stream: Option<SslStream<FdTransport>>,
}

impl OpensslSession {
    fn new(role: Role, flags: SessionFlags) -> Self {
        trace!(?role, ?flags, "openssl session created");
        OpensslSession {
            role,
            cache_expiration: None,
            cipher_list: None,
            dh_prime_bits: None,
            handshake_timeout: None,
            fd: None,
            hook: None,
            ssl: None,
            stream: None,
        }
    }

    fn set_cipher_list(&mut self, list: String) -> EngineResult<()> {
        if let Some(ssl) = self.ssl.as_mut() {
            ssl.set_cipher_list(&list)?;
        }
        self.cipher_list = Some(list);
        Ok(())
    }

    fn stream(&self) -> EngineResult<&SslStream<FdTransport>> {
        self.stream.as_ref().ok_or_else(|| not_ready("record layer"))
    }

    fn stream_mut(&mut self) -> EngineResult<&mut SslStream<FdTransport>> {
        self.stream.as_mut().ok_or_else(|| not_ready("record layer"))
    }
}

impl EngineSession for OpensslSession {
    type Credentials = OpensslCredentials;

    fn set_resumption_expiration(&mut self, seconds: u32) {
        self.cache_expiration = Some(seconds);
    }

    fn set_default_priority(&mut self) -> EngineResult<()> {
        self.set_cipher_list(DEFAULT_CIPHER_LIST.to_string())
    }

    fn set_default_priority_append(&mut self, modifiers: &str) -> EngineResult<()> {
        let modifiers = modifiers.trim_start_matches(':');
        self.set_cipher_list(format!("{}:{}", DEFAULT_CIPHER_LIST, modifiers))
    }

    fn set_priority_direct(&mut self, priority: &str) -> EngineResult<()> {
        self.set_cipher_list(priority.to_string())
    }

    fn set_dh_prime_bits(&mut self, bits: u32) {
        self.dh_prime_bits = Some(bits);
        if self.role == Role::Server {
            if let Some(ssl) = self.ssl.as_mut() {
                install_dh(ssl, bits);
            }
        }
    }

    fn set_credentials(&mut self, credentials: &Arc<OpensslCredentials>) -> EngineResult<()> {
        let mut ssl = Ssl::new(&credentials.ctx)?;
        if let Some(list) = &self.cipher_list {
            ssl.set_cipher_list(list)?;
        }
        if let (Role::Server, Some(bits)) = (self.role, self.dh_prime_bits) {
            install_dh(&mut ssl, bits);
        }
        self.ssl = Some(ssl);
        Ok(())
    }

    fn set_handshake_timeout(&mut self, timeout: Option<Duration>) {
        self.handshake_timeout = timeout.filter(|t| !t.is_zero());
    }

    fn set_transport(&mut self, fd: RawFd) {
        self.fd = Some(fd);
    }

    fn set_alpn_protocols(&mut self, protocols: &[Vec<u8>]) -> EngineResult<()> {
        let role = self.role;
        let ssl = self.ssl.as_mut().ok_or_else(|| not_ready("credentials"))?;
        match role {
            Role::Client => ssl.set_alpn_protos(&encode_alpn(protocols)?)?,
            Role::Server => ssl.set_ex_data(alpn_index()?, AlpnList(protocols.to_vec())),
        }
        Ok(())
    }

    fn set_handshake_hook(&mut self, hook: HandshakeHook) {
        self.hook = Some(hook);
    }

    fn handshake(&mut self) -> EngineResult<()> {
        let fd = self.fd.ok_or_else(|| not_ready("transport"))?;
        let ssl = self.ssl.take().ok_or_else(|| not_ready("credentials"))?;

        // SAFETY: the session layer keeps the socket borrowed for the
        // lifetime of this engine session.
        let mut transport = unsafe { FdTransport::borrow(fd) };
        if let Some(hook) = self.hook.take() {
            transport = transport.with_tap(hook);
        }
        let (read_timeout, write_timeout) = transport.timeouts().map_err(io_failure)?;
        transport
            .set_timeouts(self.handshake_timeout, self.handshake_timeout)
            .map_err(io_failure)?;

        let result = match self.role {
            Role::Client => ssl.connect(transport),
            Role::Server => ssl.accept(transport),
        };

        match result {
            Ok(mut stream) => {
                stream.get_mut().finish_tap();
                let restored = stream.get_ref().set_timeouts(read_timeout, write_timeout);
                self.stream = Some(stream);
                restored.map_err(io_failure)
            }
            Err(err) => {
                // SAFETY: as above; the failed stream is dropped without
                // closing the descriptor.
                let view = unsafe { FdTransport::borrow(fd) };
                if let Err(e) = view.set_timeouts(read_timeout, write_timeout) {
                    trace!(error = %e, "failed to restore socket timeouts");
                }
                Err(match err {
                    HandshakeError::SetupFailure(stack) => stack.into(),
                    HandshakeError::Failure(mid) | HandshakeError::WouldBlock(mid) => {
                        ssl_error(mid.error())
                    }
                })
            }
        }
    }

    fn protocol_name(&self) -> Option<String> {
        self.stream
            .as_ref()
            .map(|s| s.ssl().version_str().to_string())
    }

    fn cipher_description(&self) -> String {
        self.stream
            .as_ref()
            .and_then(|s| s.ssl().current_cipher())
            .map(|cipher| {
                cipher
                    .description()
                    .split_whitespace()
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .unwrap_or_default()
    }

    fn selected_alpn(&self) -> Option<Vec<u8>> {
        self.stream
            .as_ref()
            .and_then(|s| s.ssl().selected_alpn_protocol())
            .map(<[u8]>::to_vec)
    }

    fn max_record_size(&self) -> usize {
        MAX_PLAINTEXT_RECORD
    }

    fn pending(&self) -> usize {
        self.stream.as_ref().map_or(0, |s| s.ssl().pending())
    }

    fn record_send(&mut self, data: &[u8]) -> EngineResult<usize> {
        Ok(self.stream_mut()?.ssl_write(data)?)
    }

    fn record_recv(&mut self, buf: &mut [u8]) -> EngineResult<usize> {
        match self.stream_mut()?.ssl_read(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.code() == ErrorCode::ZERO_RETURN => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    fn bye(&mut self) -> EngineResult<()> {
        let stream = self.stream_mut()?;
        if let ShutdownResult::Sent = stream.shutdown()? {
            stream.shutdown()?;
        }
        Ok(())
    }

    fn session_data(&self) -> EngineResult<Vec<u8>> {
        let session = self
            .stream()?
            .ssl()
            .session()
            .ok_or_else(|| not_ready("session state"))?;
        if let (Role::Client, Some(seconds)) = (self.role, self.cache_expiration) {
            // SAFETY: client sessions are not cached, so this connection
            // holds the only reference.
            unsafe {
                SSL_SESSION_set_timeout(session.as_ptr(), session_timeout(seconds));
            }
        }
        Ok(session.to_der()?)
    }

    fn set_session_data(&mut self, data: &[u8]) -> EngineResult<()> {
        if self.role == Role::Server {
            trace!("server sessions resume from the shared cache");
            return Ok(());
        }
        let ssl = self.ssl.as_mut().ok_or_else(|| not_ready("credentials"))?;
        let session = SslSession::from_der(data)?;
        // SAFETY: tickets only travel between sessions holding a lease on
        // the same context, so the session came from this SslContext.
        unsafe { ssl.set_session(&session)? };
        Ok(())
    }

    fn is_resumed(&self) -> bool {
        self.stream.as_ref().is_some_and(|s| s.ssl().session_reused())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_alpn() {
        let wire = encode_alpn(&[b"h2".to_vec(), b"http/1.1".to_vec()]).unwrap();
        assert_eq!(wire, b"\x02h2\x08http/1.1");
        assert!(encode_alpn(&[Vec::new()]).is_err());
        assert!(encode_alpn(&[vec![b'a'; 256]]).is_err());
    }

    #[test]
    fn test_select_alpn_prefers_client_order() {
        let accepted = vec![b"http/1.1".to_vec(), b"h2".to_vec()];
        assert_eq!(select_alpn(&accepted, b"\x02h2\x08http/1.1"), Some(&b"h2"[..]));
        assert_eq!(select_alpn(&accepted, b"\x03foo"), None);
        // truncated list
        assert_eq!(select_alpn(&accepted, b"\x09h2"), None);
    }

    #[test]
    fn test_dh_groups() {
        let dh = dh_group(1024).unwrap();
        assert_eq!(dh.prime_p().num_bits(), 1024);
        let dh = dh_group(2000).unwrap();
        assert_eq!(dh.prime_p().num_bits(), 2048);
    }

    #[test]
    fn test_session_timeout_saturates() {
        assert_eq!(session_timeout(7200), 7200);
        assert!(session_timeout(u32::MAX) >= c_long::from(i32::MAX));
    }

    #[test]
    fn test_expiration_kept_until_export() {
        let mut session = OpensslSession::new(Role::Client, SessionFlags::default());
        assert_eq!(session.cache_expiration, None);
        session.set_resumption_expiration(86400);
        assert_eq!(session.cache_expiration, Some(86400));
        // nothing to stamp before a handshake
        assert_eq!(session.session_data().unwrap_err().code, EngineError::INVALID_REQUEST);
    }

    #[test]
    fn test_dh_prime_bits_recorded_for_both_roles() {
        let credentials = Arc::new(OpensslCredentials::builtin().unwrap());
        for role in [Role::Client, Role::Server] {
            let mut session = OpensslSession::new(role, SessionFlags::default());
            session.set_dh_prime_bits(2048);
            session.set_credentials(&credentials).unwrap();
            assert_eq!(session.dh_prime_bits, Some(2048), "{:?}", role);
        }
    }

    #[test]
    fn test_builtin_credentials() {
        OpensslCredentials::builtin().unwrap();
    }

    #[test]
    fn test_priority_applied_when_credentials_attach() {
        let credentials = Arc::new(OpensslCredentials::builtin().unwrap());
        let mut session = OpensslSession::new(Role::Client, SessionFlags::default());

        session.set_priority_direct("NOT-A-CIPHER").unwrap();
        assert!(session.set_credentials(&credentials).is_err());

        session.set_default_priority_append("-aNULL").unwrap();
        assert_eq!(session.cipher_list.as_deref(), Some("DEFAULT:-aNULL"));
        session.set_credentials(&credentials).unwrap();
    }

    #[test]
    fn test_record_calls_before_handshake() {
        let mut session = OpensslSession::new(Role::Client, SessionFlags::default());
        let err = session.record_send(b"early").unwrap_err();
        assert_eq!(err.code, EngineError::INVALID_REQUEST);
        assert_eq!(session.pending(), 0);
        assert!(!session.is_resumed());
    }
}
