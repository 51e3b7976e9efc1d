//! Scripted engine for unit tests
//!
//! Every engine call is appended to a shared call log, so tests can assert
//! exact call sequences. Behavior comes from a [`Script`] the test edits
//! before (or between) operations.

use super::{EngineSession, HandshakeHook, Role, SessionFlags, TlsEngine};
use crate::error::{EngineError, EngineResult};
use crate::observer::{Direction, HandshakeEvent, HandshakeType, Phase};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::os::fd::RawFd;
use std::sync::Arc;
use std::time::Duration;

pub(crate) const MOCK_VERSION: &str = "3.8.4";
pub(crate) const MOCK_TICKET: &[u8] = b"mock-session-state";

#[derive(Debug, Clone)]
pub(crate) struct Script {
    pub version: String,
    pub max_record_size: usize,
    /// Largest count a single send accepts
    pub send_limit: usize,
    /// Code returned by the send after `fail_send_after` successful ones
    pub fail_send_after: Option<usize>,
    pub send_result_zero: bool,
    pub recv_error: Option<i32>,
    pub handshake_error: Option<i32>,
    pub credentials_error: Option<i32>,
    pub grant_resumption: bool,
    pub protocol: Option<String>,
    pub alpn: Option<Vec<u8>>,
    /// Plaintext already decrypted and buffered in the engine
    pub inbound: VecDeque<u8>,
}

impl Default for Script {
    fn default() -> Self {
        Script {
            version: MOCK_VERSION.to_string(),
            max_record_size: 16384,
            send_limit: usize::MAX,
            fail_send_after: None,
            send_result_zero: false,
            recv_error: None,
            handshake_error: None,
            credentials_error: None,
            grant_resumption: true,
            protocol: Some("TLS1.3".to_string()),
            alpn: None,
            inbound: VecDeque::new(),
        }
    }
}

#[derive(Default)]
pub(crate) struct MockState {
    pub calls: Vec<String>,
    pub script: Script,
    pub sent: Vec<u8>,
    pub sessions_alive: usize,
}

#[derive(Clone, Default)]
pub(crate) struct MockEngine {
    pub state: Arc<Mutex<MockState>>,
}

impl MockEngine {
    pub fn new() -> Self {
        MockEngine::default()
    }

    pub fn script(&self, edit: impl FnOnce(&mut Script)) {
        edit(&mut self.state.lock().script);
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    pub fn count(&self, call: &str) -> usize {
        self.state.lock().calls.iter().filter(|c| *c == call).count()
    }

    pub fn sent(&self) -> Vec<u8> {
        self.state.lock().sent.clone()
    }

    pub fn sessions_alive(&self) -> usize {
        self.state.lock().sessions_alive
    }

    pub fn record(&self, call: impl Into<String>) {
        self.state.lock().calls.push(call.into());
    }
}

pub(crate) struct MockCredentials;

impl TlsEngine for MockEngine {
    type Credentials = MockCredentials;
    type Session = MockSession;

    fn version(&self) -> String {
        self.record("version");
        self.state.lock().script.version.clone()
    }

    fn global_init(&self) -> EngineResult<()> {
        self.record("global_init");
        Ok(())
    }

    fn global_deinit(&self) {
        self.record("global_deinit");
    }

    fn credentials_new(&self) -> EngineResult<MockCredentials> {
        self.record("credentials_new");
        match self.state.lock().script.credentials_error {
            Some(code) => Err(EngineError::new(code, "credentials failed")),
            None => Ok(MockCredentials),
        }
    }

    fn session_new(&self, role: Role, flags: SessionFlags) -> EngineResult<MockSession> {
        self.record(format!(
            "session_new:{:?}:no_legacy_tickets={}",
            role, flags.no_legacy_tickets
        ));
        self.state.lock().sessions_alive += 1;
        Ok(MockSession {
            engine: self.clone(),
            hook: None,
            installed_ticket: None,
            handshaken: false,
        })
    }
}

pub(crate) struct MockSession {
    engine: MockEngine,
    hook: Option<HandshakeHook>,
    installed_ticket: Option<Vec<u8>>,
    handshaken: bool,
}

impl MockSession {
    fn record(&self, call: impl Into<String>) {
        self.engine.record(call);
    }

    fn emit(&mut self, message: HandshakeType, direction: Direction) {
        if let Some(hook) = self.hook.as_mut() {
            hook(HandshakeEvent::new(message, direction, Phase::Pre));
            hook(HandshakeEvent::new(message, direction, Phase::Post));
        }
    }
}

impl Drop for MockSession {
    fn drop(&mut self) {
        self.record("session_deinit");
        self.engine.state.lock().sessions_alive -= 1;
    }
}

impl EngineSession for MockSession {
    type Credentials = MockCredentials;

    fn set_resumption_expiration(&mut self, seconds: u32) {
        self.record(format!("resumption_expiration:{}", seconds));
    }

    fn set_default_priority(&mut self) -> EngineResult<()> {
        self.record("priority_default");
        Ok(())
    }

    fn set_default_priority_append(&mut self, modifiers: &str) -> EngineResult<()> {
        self.record(format!("priority_append:{}", modifiers));
        Ok(())
    }

    fn set_priority_direct(&mut self, priority: &str) -> EngineResult<()> {
        self.record(format!("priority_direct:{}", priority));
        Ok(())
    }

    fn set_dh_prime_bits(&mut self, bits: u32) {
        self.record(format!("dh_prime_bits:{}", bits));
    }

    fn set_credentials(&mut self, _credentials: &Arc<MockCredentials>) -> EngineResult<()> {
        self.record("credentials_set");
        Ok(())
    }

    fn set_handshake_timeout(&mut self, timeout: Option<Duration>) {
        self.record(format!("handshake_timeout:{:?}", timeout));
    }

    fn set_transport(&mut self, _fd: RawFd) {
        self.record("transport_set");
    }

    fn set_alpn_protocols(&mut self, protocols: &[Vec<u8>]) -> EngineResult<()> {
        let names: Vec<_> = protocols
            .iter()
            .map(|p| String::from_utf8_lossy(p).into_owned())
            .collect();
        self.record(format!("alpn_set:{}", names.join(",")));
        Ok(())
    }

    fn set_handshake_hook(&mut self, hook: HandshakeHook) {
        self.record("hook_set");
        self.hook = Some(hook);
    }

    fn handshake(&mut self) -> EngineResult<()> {
        self.record("handshake");
        self.emit(HandshakeType::ClientHello, Direction::Outgoing);
        if let Some(code) = self.engine.state.lock().script.handshake_error {
            return Err(EngineError::new(code, "handshake failed"));
        }
        self.emit(HandshakeType::ServerHello, Direction::Incoming);
        self.emit(HandshakeType::Finished, Direction::Incoming);
        self.emit(HandshakeType::Finished, Direction::Outgoing);
        self.handshaken = true;
        Ok(())
    }

    fn protocol_name(&self) -> Option<String> {
        self.engine.state.lock().script.protocol.clone()
    }

    fn cipher_description(&self) -> String {
        "(TLS1.3)-(ECDHE-X25519)-(RSA-PSS-RSAE-SHA256)-(AES-256-GCM)".to_string()
    }

    fn selected_alpn(&self) -> Option<Vec<u8>> {
        self.engine.state.lock().script.alpn.clone()
    }

    fn max_record_size(&self) -> usize {
        self.engine.state.lock().script.max_record_size
    }

    fn pending(&self) -> usize {
        let pending = self.engine.state.lock().script.inbound.len();
        self.record(format!("pending:{}", pending));
        pending
    }

    fn record_send(&mut self, data: &[u8]) -> EngineResult<usize> {
        self.record(format!("send:{}", data.len()));
        let mut state = self.engine.state.lock();
        if let Some(remaining) = state.script.fail_send_after.as_mut() {
            if *remaining == 0 {
                return Err(EngineError::new(-53, "push failed"));
            }
            *remaining -= 1;
        }
        if state.script.send_result_zero {
            return Ok(0);
        }
        let n = data.len().min(state.script.send_limit);
        state.sent.extend_from_slice(&data[..n]);
        Ok(n)
    }

    fn record_recv(&mut self, buf: &mut [u8]) -> EngineResult<usize> {
        self.record(format!("recv:{}", buf.len()));
        let mut state = self.engine.state.lock();
        if let Some(code) = state.script.recv_error {
            return Err(EngineError::new(code, "pull failed"));
        }
        let n = buf.len().min(state.script.inbound.len());
        for (slot, byte) in buf.iter_mut().zip(state.script.inbound.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn bye(&mut self) -> EngineResult<()> {
        self.record("bye");
        Ok(())
    }

    fn session_data(&self) -> EngineResult<Vec<u8>> {
        self.record("session_data_get");
        if !self.handshaken {
            return Err(EngineError::new(EngineError::INVALID_REQUEST, "no session yet"));
        }
        Ok(MOCK_TICKET.to_vec())
    }

    fn set_session_data(&mut self, data: &[u8]) -> EngineResult<()> {
        self.record(format!("session_data_set:{}", data.len()));
        self.installed_ticket = Some(data.to_vec());
        Ok(())
    }

    fn is_resumed(&self) -> bool {
        let granted = self.engine.state.lock().script.grant_resumption;
        granted && self.installed_ticket.as_deref() == Some(MOCK_TICKET)
    }
}
