//! Process-wide engine context
//!
//! A [`TlsContext`] counts the sessions using an engine. The first
//! [`acquire`](TlsContext::acquire) checks the engine version, runs the
//! engine's global initialization and creates the shared credential store.
//! When the last [`ContextLease`] is dropped the store is destroyed and the
//! engine is de-initialized. Acquiring again later starts over.
//!
//! The count and the store sit behind one lock, so sessions may be created
//! and dropped from any number of threads.
//!
//! # Examples
//!
//! ```no_run
//! use tls_session::{ContextConfig, OpensslEngine, TlsContext};
//!
//! let context = TlsContext::new(OpensslEngine::new(), ContextConfig::default());
//! let lease = context.acquire().unwrap();
//! assert_eq!(context.ref_count(), 1);
//! drop(lease);
//! assert_eq!(context.ref_count(), 0);
//! ```

use crate::diag::{Diagnostics, LogSink, TracingSink};
use crate::engine::TlsEngine;
use crate::error::TlsError;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, Level};

/// Default capacity of the recent-diagnostics ring
pub const DEFAULT_LOG_QUEUE_CAPACITY: usize = 64;

/// Context configuration
#[derive(Clone)]
pub struct ContextConfig {
    /// Exact engine version string the context insists on, if any
    pub required_version: Option<String>,
    pub log_sink: Arc<dyn LogSink>,
    pub log_level: Level,
    pub log_queue_capacity: usize,
}

impl ContextConfig {
    pub fn required_version(mut self, version: impl Into<String>) -> Self {
        self.required_version = Some(version.into());
        self
    }

    pub fn log_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.log_sink = sink;
        self
    }

    pub fn log_level(mut self, level: Level) -> Self {
        self.log_level = level;
        self
    }

    pub fn log_queue_capacity(mut self, capacity: usize) -> Self {
        self.log_queue_capacity = capacity;
        self
    }
}

impl Default for ContextConfig {
    fn default() -> Self {
        ContextConfig {
            required_version: None,
            log_sink: Arc::new(TracingSink),
            log_level: Level::INFO,
            log_queue_capacity: DEFAULT_LOG_QUEUE_CAPACITY,
        }
    }
}

impl fmt::Debug for ContextConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextConfig")
            .field("required_version", &self.required_version)
            .field("log_level", &self.log_level)
            .field("log_queue_capacity", &self.log_queue_capacity)
            .finish_non_exhaustive()
    }
}

struct Shared<C> {
    refs: usize,
    credentials: Option<Arc<C>>,
}

struct Inner<E: TlsEngine> {
    engine: E,
    required_version: Option<String>,
    diagnostics: Diagnostics,
    shared: Mutex<Shared<E::Credentials>>,
}

/// Reference-counted engine context; cheap to clone
pub struct TlsContext<E: TlsEngine> {
    inner: Arc<Inner<E>>,
}

impl<E: TlsEngine> Clone for TlsContext<E> {
    fn clone(&self) -> Self {
        TlsContext {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E: TlsEngine> TlsContext<E> {
    pub fn new(engine: E, config: ContextConfig) -> Self {
        let diagnostics = Diagnostics::new(
            config.log_sink,
            config.log_level,
            config.log_queue_capacity,
        );
        TlsContext {
            inner: Arc::new(Inner {
                engine,
                required_version: config.required_version,
                diagnostics,
                shared: Mutex::new(Shared {
                    refs: 0,
                    credentials: None,
                }),
            }),
        }
    }

    /// Take a reference, initializing the engine on the first one
    pub fn acquire(&self) -> Result<ContextLease<E>, TlsError> {
        let mut shared = self.inner.shared.lock();

        if shared.refs == 0 {
            let engine = &self.inner.engine;
            let found = engine.version();
            if let Some(required) = &self.inner.required_version {
                if *required != found {
                    return Err(TlsError::VersionMismatch {
                        required: required.clone(),
                        found,
                    });
                }
            }

            engine.global_init()?;
            let credentials = match engine.credentials_new() {
                Ok(credentials) => credentials,
                Err(e) => {
                    engine.global_deinit();
                    return Err(e.into());
                }
            };
            shared.credentials = Some(Arc::new(credentials));
            debug!(version = %found, "TLS engine initialized");
        }

        shared.refs += 1;
        let credentials = shared
            .credentials
            .clone()
            .expect("credential store exists while references are held");

        Ok(ContextLease {
            context: self.clone(),
            credentials: Some(credentials),
        })
    }

    fn release(&self) {
        let mut shared = self.inner.shared.lock();
        debug_assert!(shared.refs > 0, "context released more often than acquired");
        if shared.refs == 0 {
            return;
        }

        shared.refs -= 1;
        if shared.refs == 0 {
            drop(shared.credentials.take());
            self.inner.engine.global_deinit();
            debug!("TLS engine de-initialized");
        }
    }

    pub fn ref_count(&self) -> usize {
        self.inner.shared.lock().refs
    }

    pub fn engine(&self) -> &E {
        &self.inner.engine
    }

    /// Most recent diagnostic lines, oldest first
    pub fn recent_diagnostics(&self) -> Vec<String> {
        self.inner.diagnostics.recent()
    }

    pub(crate) fn diagnostics(&self) -> &Diagnostics {
        &self.inner.diagnostics
    }
}

/// One reference on a [`TlsContext`]; released on drop
pub struct ContextLease<E: TlsEngine> {
    context: TlsContext<E>,
    credentials: Option<Arc<E::Credentials>>,
}

impl<E: TlsEngine> ContextLease<E> {
    pub fn context(&self) -> &TlsContext<E> {
        &self.context
    }

    pub fn credentials(&self) -> &Arc<E::Credentials> {
        self.credentials
            .as_ref()
            .expect("credentials are only taken in drop")
    }
}

impl<E: TlsEngine> Drop for ContextLease<E> {
    fn drop(&mut self) {
        // Our handle on the store goes first so the release below is what
        // actually destroys it.
        drop(self.credentials.take());
        self.context.release();
    }
}
