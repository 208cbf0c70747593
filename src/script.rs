//! Script execution host.
//!
//! Owns the execution context, the thread-handoff decorator, and the
//! underlying transport for the lifetime of one script invocation. The
//! controlling thread blocks on a bounded wait for the script to wind down;
//! closing the session and stopping the script are the same operation, so
//! there is exactly one way out.

use std::sync::{
    atomic::{AtomicU8, Ordering},
    Arc,
};
use std::time::Duration;

use crate::{
    codec::{Codec, JsonCodec},
    errors::{Error, Result},
    executor::{ScriptExecutor, TaskSubmitter},
    handoff::HandoffTransport,
    registry,
    session::Session,
    transport::{Credentials, Transport},
    DEFAULT_SCRIPT_TIMEOUT,
};

/// Host lifecycle states.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HostState {
    Created,
    Running,
    Terminating,
    Terminated,
}

impl HostState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => HostState::Created,
            1 => HostState::Running,
            2 => HostState::Terminating,
            _ => HostState::Terminated,
        }
    }
}

/// Host configuration; unset fields fall back to the registry and then to
/// built-in defaults.
#[derive(Default)]
pub struct HostConfig {
    /// Script execution budget (defaults to 20s). The budget is per script
    /// invocation, not per request.
    pub timeout: Option<Duration>,
    /// Base URL for the default transport. Required when no transport is
    /// supplied or registered.
    pub base_url: Option<String>,
    pub transport: Option<Arc<dyn Transport>>,
    pub codec: Option<Arc<dyn Codec>>,
}

/// Runs one user script on a single dedicated execution context.
pub struct ScriptHost {
    transport: Arc<dyn Transport>,
    codec: Arc<dyn Codec>,
    timeout: Duration,
    state: Arc<AtomicU8>,
}

impl ScriptHost {
    pub fn new(cfg: HostConfig) -> Result<Self> {
        let timeout = cfg.timeout.unwrap_or(DEFAULT_SCRIPT_TIMEOUT);
        let transport = match cfg.transport.or_else(registry::transport) {
            Some(transport) => transport,
            None => Self::default_transport(cfg.base_url)?,
        };
        let codec = cfg
            .codec
            .or_else(registry::codec)
            .unwrap_or_else(|| Arc::new(JsonCodec));

        Ok(Self {
            transport,
            codec,
            timeout,
            state: Arc::new(AtomicU8::new(HostState::Created as u8)),
        })
    }

    #[cfg(feature = "reqwest")]
    fn default_transport(base_url: Option<String>) -> Result<Arc<dyn Transport>> {
        let base_url = base_url
            .ok_or_else(|| Error::Config("base_url is required for the default transport".into()))?;
        let transport = crate::reqwest_transport::ReqwestTransport::new(
            crate::reqwest_transport::TransportConfig {
                base_url: Some(base_url),
                ..Default::default()
            },
        )?;
        Ok(Arc::new(transport))
    }

    #[cfg(not(feature = "reqwest"))]
    fn default_transport(_base_url: Option<String>) -> Result<Arc<dyn Transport>> {
        Err(Error::Config(
            "no transport available; supply one, register one, or enable the `reqwest` feature"
                .into(),
        ))
    }

    /// Runs the script body on the execution context and blocks until the
    /// script winds down or the budget elapses.
    ///
    /// A script that issues requests keeps the host alive until the
    /// completions are delivered and it calls [`ScriptContext::close`] (or
    /// its body returns with nothing in flight). An elapsed budget is fatal
    /// and surfaces as [`Error::ScriptTimeout`].
    pub fn run<F>(self, script: F) -> Result<()>
    where
        F: FnOnce(ScriptContext) -> Result<()> + Send + 'static,
    {
        let mut executor = ScriptExecutor::spawn()
            .map_err(|err| Error::Config(format!("unable to spawn script worker: {err}")))?;
        let submitter = executor.submitter();

        let handoff: Arc<dyn Transport> = Arc::new(HandoffTransport::new(
            self.transport.clone(),
            submitter.clone(),
        ));
        let ctx = ScriptContext {
            transport: handoff,
            codec: self.codec.clone(),
            submitter: submitter.clone(),
            state: self.state.clone(),
        };

        self.set_state(HostState::Running);
        let task_submitter = submitter.clone();
        let submitted = executor.submit(Box::new(move || {
            tracing::debug!("script execution beginning");
            match script(ctx) {
                Ok(()) => tracing::debug!("script top-level code finished"),
                Err(Error::Interrupted) => tracing::info!("script interrupted; exiting"),
                Err(err) => tracing::error!(error = %err, "unhandled script error"),
            }
            task_submitter.mark_script_done();
        }));
        if submitted.is_err() {
            // No script body ever ran; non-fatal by design.
            tracing::error!("unable to start the script");
            self.set_state(HostState::Terminated);
            return Ok(());
        }

        tracing::info!("initialization complete");
        let finished = executor.await_quiescence(self.timeout);
        self.set_state(HostState::Terminated);
        if finished {
            tracing::info!("shutting down");
            Ok(())
        } else {
            Err(Error::ScriptTimeout(self.timeout))
        }
    }

    pub fn state(&self) -> HostState {
        HostState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: HostState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }
}

/// Handle passed to the script body; all of its methods are called on the
/// execution context.
#[derive(Clone)]
pub struct ScriptContext {
    transport: Arc<dyn Transport>,
    codec: Arc<dyn Codec>,
    submitter: TaskSubmitter,
    state: Arc<AtomicU8>,
}

impl ScriptContext {
    /// Opens a session against the API with the given credentials. Requests
    /// issued through it deliver their callbacks on the execution context.
    pub fn session(&self, credentials: Credentials) -> Session {
        Session::new(self.transport.clone(), self.codec.clone(), credentials)
    }

    /// Terminates the script: disables new work, closes the transport
    /// best-effort, and returns [`Error::Interrupted`] so top-level script
    /// code can unwind with `?`. Callbacks that trigger shutdown simply
    /// discard the returned error.
    pub fn close(&self) -> Result<()> {
        self.state
            .store(HostState::Terminating as u8, Ordering::SeqCst);
        self.submitter.shutdown();
        if let Err(err) = self.transport.close() {
            tracing::warn!(error = %err, "unable to close transport");
        }
        Err(Error::Interrupted)
    }

    /// Whether shutdown has begun; a well-behaved long-running script checks
    /// this at its yield points.
    pub fn is_closed(&self) -> bool {
        self.submitter.is_closed()
    }
}
