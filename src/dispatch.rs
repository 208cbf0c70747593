//! Callback dispatch engine.
//!
//! Given a completed exchange and the callbacks registered for it, decides
//! which callbacks fire, in which order, and with which arguments. All
//! dispatch happens synchronously on the script thread; a panic inside user
//! callback code is caught and logged, never allowed to unwind the worker
//! loop.

use std::{
    panic::{catch_unwind, AssertUnwindSafe},
    sync::Mutex,
};

use uuid::Uuid;

use crate::{
    codec::Codec,
    errors::NetworkError,
    transport::{Body, Completion, ResponseMeta},
};

/// A completed, decoded exchange as seen by script callbacks.
#[derive(Debug)]
pub struct Response {
    pub meta: ResponseMeta,
    /// Decoded entity body, when one was present and the codec understood it.
    pub data: Option<serde_json::Value>,
}

impl Response {
    pub fn status(&self) -> u16 {
        self.meta.status
    }
}

/// Status-code category a callback can be keyed to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Category {
    /// 4xx responses.
    ClientError,
    /// 5xx responses.
    ServerError,
}

impl Category {
    fn of(meta: &ResponseMeta) -> Option<Self> {
        if meta.is_client_error() {
            Some(Category::ClientError)
        } else if meta.is_server_error() {
            Some(Category::ServerError)
        } else {
            None
        }
    }
}

/// Callback keyed to a status-code category; always invoked with the
/// response only.
pub type CategoryCallback = Box<dyn FnMut(&Response) + Send>;

/// The default callback, shape decided once at registration.
///
/// Network failures are only ever delivered to the two-argument shape; a
/// response-only default receives no response for them and the error is
/// logged before being dropped.
pub enum DefaultCallback {
    ResponseOnly(Box<dyn FnMut(Option<&Response>) + Send>),
    ResponseAndError(Box<dyn FnMut(Option<&Response>, Option<&NetworkError>) + Send>),
}

impl DefaultCallback {
    pub fn response_only(f: impl FnMut(Option<&Response>) + Send + 'static) -> Self {
        DefaultCallback::ResponseOnly(Box::new(f))
    }

    pub fn with_error(
        f: impl FnMut(Option<&Response>, Option<&NetworkError>) + Send + 'static,
    ) -> Self {
        DefaultCallback::ResponseAndError(Box::new(f))
    }

    fn invoke(&mut self, response: Option<&Response>, error: Option<&NetworkError>) {
        match self {
            DefaultCallback::ResponseOnly(f) => {
                if let Some(err) = error {
                    err.log_chain();
                }
                invoke_guarded("default", || f(response));
            }
            DefaultCallback::ResponseAndError(f) => {
                invoke_guarded("default", || f(response, error));
            }
        }
    }
}

/// Callbacks for one dispatch decision: category callbacks plus the default.
///
/// The script-wide set lives for the session; a per-request set exists only
/// until that request completes and shadows the script-wide set per slot.
#[derive(Default)]
pub struct CallbackSet {
    client_error: Option<CategoryCallback>,
    server_error: Option<CategoryCallback>,
    default: Option<DefaultCallback>,
}

impl CallbackSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_client_error(mut self, f: impl FnMut(&Response) + Send + 'static) -> Self {
        self.client_error = Some(Box::new(f));
        self
    }

    pub fn on_server_error(mut self, f: impl FnMut(&Response) + Send + 'static) -> Self {
        self.server_error = Some(Box::new(f));
        self
    }

    /// Registers a two-argument default callback.
    pub fn on_completion(
        self,
        f: impl FnMut(Option<&Response>, Option<&NetworkError>) + Send + 'static,
    ) -> Self {
        self.with_default(DefaultCallback::with_error(f))
    }

    /// Registers a response-only default callback.
    pub fn on_response(self, f: impl FnMut(Option<&Response>) + Send + 'static) -> Self {
        self.with_default(DefaultCallback::response_only(f))
    }

    pub fn with_default(mut self, callback: DefaultCallback) -> Self {
        self.default = Some(callback);
        self
    }

    /// Overlays another set: slots set in `other` replace the current ones,
    /// the rest are kept.
    pub fn merge_from(&mut self, other: CallbackSet) {
        if other.client_error.is_some() {
            self.client_error = other.client_error;
        }
        if other.server_error.is_some() {
            self.server_error = other.server_error;
        }
        if other.default.is_some() {
            self.default = other.default;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.client_error.is_none() && self.server_error.is_none() && self.default.is_none()
    }

    fn category_mut(&mut self, category: Category) -> Option<&mut CategoryCallback> {
        match category {
            Category::ClientError => self.client_error.as_mut(),
            Category::ServerError => self.server_error.as_mut(),
        }
    }

    /// Puts back slots that were taken for dispatch, keeping any registration
    /// made while the callbacks were running.
    fn restore_missing(&mut self, taken: CallbackSet) {
        if self.client_error.is_none() {
            self.client_error = taken.client_error;
        }
        if self.server_error.is_none() {
            self.server_error = taken.server_error;
        }
        if self.default.is_none() {
            self.default = taken.default;
        }
    }
}

/// Runs the dispatch decision for one completion.
///
/// The script-wide set is moved out of its lock for the duration of the
/// callbacks so user code can register new callbacks (or issue requests)
/// without deadlocking, then merged back.
pub(crate) fn deliver(
    exchange: Uuid,
    script_callbacks: &Mutex<CallbackSet>,
    mut per_request: CallbackSet,
    codec: &dyn Codec,
    completion: Completion,
) {
    let mut script_set = {
        let mut guard = script_callbacks.lock().expect("callback lock poisoned");
        std::mem::take(&mut *guard)
    };

    match completion {
        Completion::Failed(error) => {
            tracing::debug!(exchange = %exchange, error = %error, "exchange failed");
            match resolve_default(&mut per_request, &mut script_set) {
                Some(default) => default.invoke(None, Some(&error)),
                None => error.log_chain(),
            }
        }
        Completion::Response { meta, body } => {
            let data = decode_body(exchange, codec, &meta, body);
            let response = Response { meta, data };
            tracing::debug!(exchange = %exchange, status = response.status(), "exchange completed");

            if let Some(category) = Category::of(&response.meta) {
                let callback = per_request
                    .category_mut(category)
                    .or_else(|| script_set.category_mut(category));
                if let Some(callback) = callback {
                    invoke_guarded("category", || callback(&response));
                }
            }

            match resolve_default(&mut per_request, &mut script_set) {
                Some(default) => default.invoke(Some(&response), None),
                None => tracing::debug!(exchange = %exchange, "no default callback registered"),
            }
        }
    }

    script_callbacks
        .lock()
        .expect("callback lock poisoned")
        .restore_missing(script_set);
}

fn resolve_default<'a>(
    per_request: &'a mut CallbackSet,
    script_set: &'a mut CallbackSet,
) -> Option<&'a mut DefaultCallback> {
    per_request.default.as_mut().or(script_set.default.as_mut())
}

/// Decodes the entity body when the content type matches the codec, closing
/// the stream regardless of the outcome.
fn decode_body(
    exchange: Uuid,
    codec: &dyn Codec,
    meta: &ResponseMeta,
    body: Option<Body>,
) -> Option<serde_json::Value> {
    let mut body = body?;
    let media_matches = meta
        .headers
        .content_type()
        .map(|e| e.name().eq_ignore_ascii_case(codec.media_type()))
        .unwrap_or(false);

    let result = if media_matches {
        body.reader().map(|reader| codec.decode(reader))
    } else {
        None
    };
    body.close_logged();

    match result {
        Some(Ok(value)) => Some(value),
        Some(Err(err)) => {
            tracing::warn!(exchange = %exchange, error = %err, "unable to decode response body");
            None
        }
        None => None,
    }
}

/// Runs a user callback, containing any panic so it cannot unwind the
/// worker loop.
fn invoke_guarded(kind: &str, f: impl FnOnce()) {
    if let Err(panic) = catch_unwind(AssertUnwindSafe(f)) {
        let detail = panic
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        tracing::error!(callback = kind, panic = %detail, "unhandled panic in callback");
    }
}
