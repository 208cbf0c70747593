//! Transport contract and the exchange value types.
//!
//! A [`Transport`] performs one asynchronous HTTP exchange per
//! [`Transport::execute`] call and invokes the completion handler exactly
//! once, from whatever thread its I/O runs on. Everything the script layer
//! sees rides in a [`Completion`]: either response metadata plus an optional
//! entity body, or a [`NetworkError`].

use std::{fmt, io};

use crate::{errors::NetworkError, headers::Headers};

/// HTTP request method.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Basic-auth credentials attached to a request.
///
/// Encoding into an `Authorization` header is the transport's concern.
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// One HTTP request, immutable once constructed.
///
/// The caller owns it until handed to [`Transport::execute`]; the transport
/// must not retain it beyond the call.
#[derive(Clone, Debug)]
pub struct Request {
    pub method: Method,
    pub path: String,
    pub headers: Headers,
    pub credentials: Option<Credentials>,
    pub body: Option<Vec<u8>>,
}

impl Request {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: Headers::new(),
            credentials: None,
            body: None,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push(name, value);
        self
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = Some(body);
        self
    }

    /// Headers-only echo of this request, for response diagnostics.
    pub fn info(&self) -> RequestInfo {
        RequestInfo {
            method: self.method,
            path: self.path.clone(),
            headers: self.headers.clone(),
        }
    }
}

/// Headers-only echo of the request that produced a response. Diagnostic
/// only, never retried.
#[derive(Clone, Debug)]
pub struct RequestInfo {
    pub method: Method,
    pub path: String,
    pub headers: Headers,
}

/// Head of an HTTP response: status code, reason phrase, and headers.
#[derive(Clone, Debug)]
pub struct ResponseMeta {
    pub status: u16,
    pub reason: Option<String>,
    pub headers: Headers,
    pub request: Option<RequestInfo>,
}

impl ResponseMeta {
    pub fn new(status: u16, reason: Option<String>, headers: Headers) -> Self {
        Self {
            status,
            reason,
            headers,
            request: None,
        }
    }

    pub fn with_request(mut self, request: RequestInfo) -> Self {
        self.request = Some(request);
        self
    }

    pub fn is_client_error(&self) -> bool {
        (400..=499).contains(&self.status)
    }

    pub fn is_server_error(&self) -> bool {
        (500..=599).contains(&self.status)
    }
}

impl fmt::Display for ResponseMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.reason {
            Some(reason) => write!(f, "{}: {}", self.status, reason),
            None => write!(f, "{}", self.status),
        }
    }
}

/// Readable entity stream of a response.
///
/// Closing is explicit so failures can be logged; dropping an unclosed body
/// closes it as a safety net, which is what keeps a completion dropped during
/// shutdown from leaking an open stream.
pub struct Body {
    stream: Option<Box<dyn BodyStream>>,
}

/// Source of response entity bytes.
///
/// `close` is best-effort cleanup; implementations releasing no resources can
/// rely on the default.
pub trait BodyStream: io::Read + Send {
    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl BodyStream for io::Cursor<Vec<u8>> {}

impl Body {
    pub fn new(stream: Box<dyn BodyStream>) -> Self {
        Self {
            stream: Some(stream),
        }
    }

    /// In-memory body over a byte buffer.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self::new(Box::new(io::Cursor::new(bytes)))
    }

    pub fn reader(&mut self) -> Option<&mut dyn io::Read> {
        self.stream
            .as_mut()
            .map(|s| s.as_mut() as &mut dyn io::Read)
    }

    /// Closes the underlying stream. Idempotent.
    pub fn close(&mut self) -> io::Result<()> {
        match self.stream.take() {
            Some(mut stream) => stream.close(),
            None => Ok(()),
        }
    }

    /// Closes the stream, logging a failure instead of propagating it.
    pub fn close_logged(&mut self) {
        if let Err(err) = self.close() {
            tracing::warn!(error = %err, "unable to close the response stream");
        }
    }
}

impl Drop for Body {
    fn drop(&mut self) {
        self.close_logged();
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Body")
            .field("open", &self.stream.is_some())
            .finish()
    }
}

/// Tagged result of one exchange: response metadata or a network error,
/// never both. A body is only ever present together with a response.
#[derive(Debug)]
pub enum Completion {
    Response {
        meta: ResponseMeta,
        body: Option<Body>,
    },
    Failed(NetworkError),
}

impl Completion {
    /// Drops this completion without delivering it, closing any body stream.
    pub fn discard(self) {
        if let Completion::Response {
            body: Some(mut body),
            ..
        } = self
        {
            body.close_logged();
        }
    }
}

/// Completion notification for one exchange; invoked exactly once, from any
/// thread.
pub type CompletionHandler = Box<dyn FnOnce(Completion) + Send + 'static>;

/// An asynchronous HTTP client.
///
/// `execute` must not block the calling thread and must invoke the handler
/// exactly once per call, off whatever thread the implementation's I/O runs
/// on.
pub trait Transport: Send + Sync {
    /// The `User-Agent` string for this implementation.
    fn user_agent(&self) -> &str;

    /// Executes the exchange asynchronously.
    fn execute(&self, request: Request, on_complete: CompletionHandler);

    /// Best-effort cleanup of the underlying client.
    fn close(&self) -> io::Result<()>;
}

impl<T: Transport + ?Sized> Transport for std::sync::Arc<T> {
    fn user_agent(&self) -> &str {
        (**self).user_agent()
    }

    fn execute(&self, request: Request, on_complete: CompletionHandler) {
        (**self).execute(request, on_complete)
    }

    fn close(&self) -> io::Result<()> {
        (**self).close()
    }
}
