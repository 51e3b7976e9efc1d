//! Session resumption tickets
//!
//! A ticket is the engine's serialized state of an established session.
//! Handing it to a new session before that session's handshake lets the
//! engine attempt an abbreviated handshake. Each ticket owns its bytes and
//! is consumed by installation.

use crate::engine::{EngineSession, TlsEngine};
use crate::error::EngineResult;
use crate::session::TlsSession;
use std::fmt;

pub struct ResumptionTicket {
    data: Vec<u8>,
}

impl ResumptionTicket {
    /// Capture the resumable state of an established session
    pub fn extract<E: TlsEngine>(session: &TlsSession<'_, E>) -> EngineResult<Self> {
        Self::from_engine(session.engine_session())
    }

    pub(crate) fn from_engine<S: EngineSession>(session: &S) -> EngineResult<Self> {
        Ok(ResumptionTicket {
            data: session.session_data()?,
        })
    }

    /// Hand the state to a session that has not run its handshake yet.
    ///
    /// The ticket's buffer is released when this returns, successful or not.
    pub fn install<S: EngineSession>(self, target: &mut S) -> EngineResult<()> {
        target.set_session_data(&self.data)
    }

    /// Serialized engine state
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl fmt::Debug for ResumptionTicket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResumptionTicket")
            .field("len", &self.data.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::mock::{MockEngine, MOCK_TICKET};
    use crate::engine::{Role, SessionFlags};

    #[test]
    fn test_extract_then_install() {
        let engine = MockEngine::new();
        let mut source = engine.session_new(Role::Client, SessionFlags::default()).unwrap();
        source.handshake().unwrap();

        let ticket = ResumptionTicket::from_engine(&source).unwrap();
        assert_eq!(ticket.len(), MOCK_TICKET.len());
        assert_eq!(format!("{:?}", ticket), "ResumptionTicket { len: 18 }");

        let mut target = engine.session_new(Role::Client, SessionFlags::default()).unwrap();
        ticket.install(&mut target).unwrap();
        target.handshake().unwrap();
        assert!(target.is_resumed());
    }

    #[test]
    fn test_extract_requires_established_session() {
        let engine = MockEngine::new();
        let fresh = engine.session_new(Role::Client, SessionFlags::default()).unwrap();
        assert!(ResumptionTicket::from_engine(&fresh).is_err());
    }
}
