#![cfg(feature = "reqwest")]

//! Concrete [`Transport`] backed by `reqwest`.
//!
//! Owns a small multi-thread tokio runtime whose workers are the I/O
//! threads; completion handlers are invoked from them, never from the
//! calling thread. Script code therefore always sees this transport through
//! the thread-handoff decorator.

use std::{
    io,
    sync::{atomic::AtomicBool, atomic::Ordering, Mutex},
    time::Duration,
};

use reqwest::header::{HeaderName, HeaderValue};

use crate::{
    errors::{Error, NetworkError, Result},
    headers::Headers,
    transport::{Body, Completion, CompletionHandler, Method, Request, ResponseMeta, Transport},
    DEFAULT_CONNECT_TIMEOUT, DEFAULT_REQUEST_TIMEOUT, DEFAULT_USER_AGENT,
};

#[derive(Clone, Debug, Default)]
pub struct TransportConfig {
    pub base_url: Option<String>,
    /// Override the connect timeout (defaults to 5s).
    pub connect_timeout: Option<Duration>,
    /// Override the per-request timeout (defaults to 60s).
    pub request_timeout: Option<Duration>,
    /// Override the reported User-Agent string.
    pub user_agent: Option<String>,
    pub http_client: Option<reqwest::Client>,
}

#[derive(Debug)]
pub struct ReqwestTransport {
    runtime: Mutex<Option<tokio::runtime::Runtime>>,
    client: reqwest::Client,
    base_url: reqwest::Url,
    user_agent: String,
    request_timeout: Duration,
    closed: AtomicBool,
}

impl ReqwestTransport {
    pub fn new(cfg: TransportConfig) -> Result<Self> {
        let base = cfg
            .base_url
            .ok_or_else(|| Error::Config("base_url is required".into()))?;
        // Resource paths are joined relative to the base, so it must end in
        // a slash or its last segment would be replaced.
        let base = format!("{}/", base.trim_end_matches('/'));
        let base_url = reqwest::Url::parse(&base)
            .map_err(|err| Error::Config(format!("invalid base url: {err}")))?;

        let connect_timeout = cfg.connect_timeout.unwrap_or(DEFAULT_CONNECT_TIMEOUT);
        let request_timeout = cfg.request_timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT);

        let client = match cfg.http_client {
            Some(client) => client,
            None => reqwest::Client::builder()
                .connect_timeout(connect_timeout)
                .build()
                .map_err(|err| {
                    Error::Network(NetworkError::with_cause("failed to build http client", err))
                })?,
        };

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("http-io")
            .enable_all()
            .build()
            .map_err(|err| Error::Config(format!("unable to start http runtime: {err}")))?;

        Ok(Self {
            runtime: Mutex::new(Some(runtime)),
            client,
            base_url,
            user_agent: cfg
                .user_agent
                .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
            request_timeout,
            closed: AtomicBool::new(false),
        })
    }

    fn build_request(&self, request: &Request) -> Result<reqwest::RequestBuilder> {
        let url = if request.path.starts_with("http://") || request.path.starts_with("https://") {
            reqwest::Url::parse(&request.path).map_err(|err| Error::Config(err.to_string()))?
        } else {
            self.base_url
                .join(&request.path)
                .map_err(|err| Error::Config(format!("invalid path: {err}")))?
        };

        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Head => reqwest::Method::HEAD,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Patch => reqwest::Method::PATCH,
            Method::Delete => reqwest::Method::DELETE,
        };

        let mut builder = self
            .client
            .request(method, url)
            .timeout(self.request_timeout);
        for header in request.headers.iter() {
            let name = HeaderName::from_bytes(header.name().trim().as_bytes())
                .map_err(|err| Error::Config(format!("invalid header name: {err}")))?;
            let value = HeaderValue::from_str(header.value().trim())
                .map_err(|err| Error::Config(format!("invalid header value: {err}")))?;
            builder = builder.header(name, value);
        }
        if let Some(creds) = &request.credentials {
            builder = builder.basic_auth(&creds.username, Some(&creds.password));
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }
        Ok(builder)
    }
}

impl Transport for ReqwestTransport {
    fn user_agent(&self) -> &str {
        &self.user_agent
    }

    fn execute(&self, request: Request, on_complete: CompletionHandler) {
        if self.closed.load(Ordering::SeqCst) {
            on_complete(Completion::Failed(NetworkError::new("transport is closed")));
            return;
        }

        let info = request.info();
        let builder = match self.build_request(&request) {
            Ok(builder) => builder,
            Err(err) => {
                on_complete(Completion::Failed(NetworkError::new(format!(
                    "invalid request: {err}"
                ))));
                return;
            }
        };

        let guard = self.runtime.lock().expect("runtime lock poisoned");
        let Some(runtime) = guard.as_ref() else {
            drop(guard);
            on_complete(Completion::Failed(NetworkError::new("transport is closed")));
            return;
        };

        runtime.spawn(async move {
            let completion = match builder.send().await {
                Ok(response) => {
                    let status = response.status();
                    let reason = status.canonical_reason().map(str::to_string);
                    let headers = response
                        .headers()
                        .iter()
                        .map(|(name, value)| {
                            (
                                name.as_str().to_string(),
                                String::from_utf8_lossy(value.as_bytes()).into_owned(),
                            )
                        })
                        .collect::<Headers>();
                    let meta =
                        ResponseMeta::new(status.as_u16(), reason, headers).with_request(info);
                    match response.bytes().await {
                        Ok(bytes) if bytes.is_empty() => Completion::Response { meta, body: None },
                        Ok(bytes) => Completion::Response {
                            meta,
                            body: Some(Body::from_bytes(bytes.to_vec())),
                        },
                        Err(err) => Completion::Failed(classify(err)),
                    }
                }
                Err(err) => Completion::Failed(classify(err)),
            };
            // I/O thread; the handoff decorator marshals from here.
            on_complete(completion);
        });
    }

    fn close(&self) -> io::Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        if let Some(runtime) = self.runtime.lock().expect("runtime lock poisoned").take() {
            runtime.shutdown_background();
        }
        Ok(())
    }
}

fn classify(err: reqwest::Error) -> NetworkError {
    let kind = if err.is_timeout() {
        "timeout"
    } else if err.is_connect() {
        "connect error"
    } else if err.is_request() {
        "request error"
    } else {
        "transport error"
    };
    NetworkError::with_cause(format!("{kind}: {err}"), err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_requires_a_base_url() {
        let err = ReqwestTransport::new(TransportConfig::default()).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn execute_after_close_fails_with_a_network_error() {
        let transport = ReqwestTransport::new(TransportConfig {
            base_url: Some("http://localhost:1".into()),
            ..Default::default()
        })
        .unwrap();
        transport.close().unwrap();

        let (tx, rx) = std::sync::mpsc::channel();
        transport.execute(
            Request::new(Method::Get, "/server"),
            Box::new(move |completion| {
                tx.send(matches!(completion, Completion::Failed(_))).unwrap();
            }),
        );
        assert!(rx.recv_timeout(Duration::from_secs(1)).unwrap());
    }
}
