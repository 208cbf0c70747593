#![cfg(feature = "mock")]

//! In-memory scripted transport for offline tests.
//!
//! Each exchange is completed from a freshly spawned `mock-io` thread, so
//! tests exercise the same cross-thread hand-off as a real transport.

use std::{
    collections::VecDeque,
    io,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    thread,
};

use crate::{
    errors::NetworkError,
    headers::Headers,
    transport::{Body, Completion, CompletionHandler, Request, ResponseMeta, Transport},
};

/// One scripted reply, consumed in order per executed request.
pub enum MockReply {
    Response {
        status: u16,
        reason: Option<String>,
        headers: Vec<(String, String)>,
        body: Option<Vec<u8>>,
    },
    Failure(NetworkError),
    /// Never completes; for exercising host timeouts.
    Hold,
}

/// Scripted replies for offline tests.
#[derive(Default)]
pub struct MockConfig {
    pub replies: Vec<MockReply>,
    pub user_agent: Option<String>,
}

impl MockConfig {
    pub fn with_json_response(mut self, status: u16, body: serde_json::Value) -> Self {
        self.replies.push(MockReply::Response {
            status,
            reason: None,
            headers: vec![("Content-Type".into(), "application/json".into())],
            body: Some(body.to_string().into_bytes()),
        });
        self
    }

    pub fn with_empty_response(mut self, status: u16) -> Self {
        self.replies.push(MockReply::Response {
            status,
            reason: None,
            headers: Vec::new(),
            body: None,
        });
        self
    }

    pub fn with_reply(mut self, reply: MockReply) -> Self {
        self.replies.push(reply);
        self
    }

    pub fn with_failure(mut self, error: NetworkError) -> Self {
        self.replies.push(MockReply::Failure(error));
        self
    }

    pub fn with_hold(mut self) -> Self {
        self.replies.push(MockReply::Hold);
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }
}

#[derive(Clone)]
pub struct MockTransport {
    inner: Arc<MockInner>,
}

struct MockInner {
    replies: Mutex<VecDeque<MockReply>>,
    requests: Mutex<Vec<Request>>,
    // Handlers parked by `Hold` replies; kept alive so the exchange stays
    // in flight until the transport itself is dropped.
    held: Mutex<Vec<CompletionHandler>>,
    user_agent: String,
    closed: AtomicBool,
}

impl MockTransport {
    pub fn new(cfg: MockConfig) -> Self {
        Self {
            inner: Arc::new(MockInner {
                replies: Mutex::new(VecDeque::from(cfg.replies)),
                requests: Mutex::new(Vec::new()),
                held: Mutex::new(Vec::new()),
                user_agent: cfg
                    .user_agent
                    .unwrap_or_else(|| "cloudscript-mock/1.0".to_string()),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Requests executed so far, in order.
    pub fn requests(&self) -> Vec<Request> {
        self.inner.requests.lock().expect("lock poisoned").clone()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }
}

impl Transport for MockTransport {
    fn user_agent(&self) -> &str {
        &self.inner.user_agent
    }

    fn execute(&self, request: Request, on_complete: CompletionHandler) {
        let info = request.info();
        self.inner
            .requests
            .lock()
            .expect("lock poisoned")
            .push(request);

        let reply = self
            .inner
            .replies
            .lock()
            .expect("lock poisoned")
            .pop_front()
            .unwrap_or_else(|| {
                MockReply::Failure(NetworkError::new("no scripted reply queued"))
            });

        let completion = match reply {
            MockReply::Response {
                status,
                reason,
                headers,
                body,
            } => Completion::Response {
                meta: ResponseMeta::new(
                    status,
                    reason,
                    headers.into_iter().collect::<Headers>(),
                )
                .with_request(info),
                body: body.map(Body::from_bytes),
            },
            MockReply::Failure(error) => Completion::Failed(error),
            MockReply::Hold => {
                // Park the handler without invoking it; the exchange stays
                // in flight until the transport is dropped.
                self.inner
                    .held
                    .lock()
                    .expect("lock poisoned")
                    .push(on_complete);
                return;
            }
        };

        thread::Builder::new()
            .name("mock-io".to_string())
            .spawn(move || on_complete(completion))
            .expect("spawn mock io thread");
    }

    fn close(&self) -> io::Result<()> {
        self.inner.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

pub mod fixtures {
    use serde_json::json;

    pub fn server_listing() -> serde_json::Value {
        json!({
            "servers": {
                "server": [
                    {"hostname": "web1", "state": "started"},
                    {"hostname": "db1", "state": "maintenance"}
                ]
            }
        })
    }

    pub fn error_body(code: &str, message: &str) -> serde_json::Value {
        json!({
            "error": {
                "error_code": code,
                "error_message": message
            }
        })
    }
}
