//! Script-facing request API.
//!
//! A [`Session`] issues asynchronous requests against the API and routes each
//! completion to the registered callbacks. Script-wide callbacks live as long
//! as the session; per-request callbacks exist only until their exchange
//! completes and shadow the script-wide ones slot by slot.

use std::sync::{Arc, Mutex};

use uuid::Uuid;

use crate::{
    codec::Codec,
    dispatch::{self, CallbackSet},
    errors::Result,
    transport::{Credentials, Method, Request, Transport},
};

#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    transport: Arc<dyn Transport>,
    codec: Arc<dyn Codec>,
    credentials: Credentials,
    user_agent: String,
    callbacks: Mutex<CallbackSet>,
}

impl Session {
    pub(crate) fn new(
        transport: Arc<dyn Transport>,
        codec: Arc<dyn Codec>,
        credentials: Credentials,
    ) -> Self {
        let user_agent = transport.user_agent().to_string();
        Self {
            inner: Arc::new(SessionInner {
                transport,
                codec,
                credentials,
                user_agent,
                callbacks: Mutex::new(CallbackSet::new()),
            }),
        }
    }

    /// Registers script-wide callbacks. Slots set in `set` replace existing
    /// registrations; the rest are kept.
    pub fn callbacks(&self, set: CallbackSet) {
        self.inner
            .callbacks
            .lock()
            .expect("callback lock poisoned")
            .merge_from(set);
    }

    pub fn get(&self, path: &str, callbacks: CallbackSet) {
        self.issue(Method::Get, path, None, callbacks);
    }

    pub fn head(&self, path: &str, callbacks: CallbackSet) {
        self.issue(Method::Head, path, None, callbacks);
    }

    pub fn delete(&self, path: &str, callbacks: CallbackSet) {
        self.issue(Method::Delete, path, None, callbacks);
    }

    pub fn post(&self, path: &str, body: &serde_json::Value, callbacks: CallbackSet) -> Result<()> {
        let bytes = self.inner.codec.encode(body)?;
        self.issue(Method::Post, path, Some(bytes), callbacks);
        Ok(())
    }

    pub fn put(&self, path: &str, body: &serde_json::Value, callbacks: CallbackSet) -> Result<()> {
        let bytes = self.inner.codec.encode(body)?;
        self.issue(Method::Put, path, Some(bytes), callbacks);
        Ok(())
    }

    pub fn patch(&self, path: &str, body: &serde_json::Value, callbacks: CallbackSet) -> Result<()> {
        let bytes = self.inner.codec.encode(body)?;
        self.issue(Method::Patch, path, Some(bytes), callbacks);
        Ok(())
    }

    /// Generic entry point behind the verb helpers.
    pub fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
        callbacks: CallbackSet,
    ) -> Result<()> {
        let bytes = match body {
            Some(value) => Some(self.inner.codec.encode(value)?),
            None => None,
        };
        self.issue(method, path, bytes, callbacks);
        Ok(())
    }

    fn issue(&self, method: Method, path: &str, body: Option<Vec<u8>>, callbacks: CallbackSet) {
        let inner = self.inner.clone();
        let exchange = Uuid::new_v4();

        let mut request = Request::new(method, path)
            .with_header("Accept", inner.codec.media_type())
            .with_header("User-Agent", inner.user_agent.clone())
            .with_credentials(inner.credentials.clone());
        if let Some(bytes) = body {
            request = request
                .with_header("Content-Type", inner.codec.media_type())
                .with_body(bytes);
        }

        tracing::debug!(exchange = %exchange, method = %method, path, "issuing request");

        let delivery_inner = inner.clone();
        inner.transport.execute(
            request,
            Box::new(move |completion| {
                dispatch::deliver(
                    exchange,
                    &delivery_inner.callbacks,
                    callbacks,
                    delivery_inner.codec.as_ref(),
                    completion,
                );
            }),
        );
    }
}
