use std::{error::Error as StdError, fmt, sync::Arc, time::Duration};

use thiserror::Error;

/// Convenience alias for fallible SDK results.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Network-level failure reported by a transport.
///
/// This is used only when the exchange with the server could not be completed
/// at all (DNS, connect, TLS, timeout). An HTTP error response such as
/// `403 Forbidden` or `500 Internal Server Error` is a completed exchange and
/// is routed through the status-code callbacks instead.
#[derive(Clone)]
pub struct NetworkError {
    message: String,
    cause: Option<Arc<dyn StdError + Send + Sync>>,
}

impl NetworkError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            cause: None,
        }
    }

    pub fn with_cause(
        message: impl Into<String>,
        cause: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self {
            message: message.into(),
            cause: Some(Arc::new(cause)),
        }
    }

    /// Short explanatory description for human consumption.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The underlying failure, when the transport attached one.
    pub fn cause(&self) -> Option<&(dyn StdError + Send + Sync)> {
        self.cause.as_deref()
    }

    /// Walks the cause chain, yielding each underlying error in turn.
    ///
    /// Malformed chains can be self-referential; traversal stops as soon as an
    /// error reports itself (by identity) as its own source.
    pub fn cause_chain(&self) -> CauseChain<'_> {
        CauseChain {
            next: self.cause.as_deref().map(|c| c as &dyn StdError),
        }
    }

    /// Logs the message and every cause in the chain at warn level.
    pub fn log_chain(&self) {
        tracing::warn!(error = %self.message, "network error");
        for cause in self.cause_chain() {
            tracing::warn!(cause = %cause, "caused by");
        }
    }
}

impl fmt::Display for NetworkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl fmt::Debug for NetworkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkError")
            .field("message", &self.message)
            .field("cause", &self.cause.as_ref().map(|c| c.to_string()))
            .finish()
    }
}

impl StdError for NetworkError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.cause
            .as_deref()
            .map(|c| c as &(dyn StdError + 'static))
    }
}

/// Iterator over a [`NetworkError`] cause chain with identity cycle detection.
pub struct CauseChain<'a> {
    next: Option<&'a dyn StdError>,
}

impl<'a> Iterator for CauseChain<'a> {
    type Item = &'a dyn StdError;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        self.next = match current.source() {
            Some(source) if errors_identical(current, source) => None,
            other => other,
        };
        Some(current)
    }
}

fn errors_identical(a: &dyn StdError, b: &dyn StdError) -> bool {
    std::ptr::eq(a as *const _ as *const (), b as *const _ as *const ())
}

/// Unified error type surfaced by the SDK.
#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Network(#[from] NetworkError),

    /// The script exceeded its execution budget; fatal to the host.
    #[error("script timed out after {0:?}")]
    ScriptTimeout(Duration),

    /// Shutdown is in progress; raised by `close()` so top-level script code
    /// unwinds back to the host with `?`.
    #[error("shutting down")]
    Interrupted,
}
