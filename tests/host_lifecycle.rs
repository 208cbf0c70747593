//! Script host lifecycle tests: normal completion, fatal timeout, and
//! shutdown racing in-flight exchanges.

use std::{
    collections::VecDeque,
    io,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        mpsc::channel,
        Arc, Mutex,
    },
    thread,
    time::Duration,
};

use cloudscript::{
    Body, BodyStream, CallbackSet, Completion, CompletionHandler, Credentials, Error, Headers,
    HostConfig, NetworkError, Request, ResponseMeta, ScriptHost, Transport,
};

/// Opt into log output with e.g. `RUST_LOG=cloudscript=debug`.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// Scripted transport that completes each exchange from its own `io` thread
/// after an optional delay. `None` replies are held forever.
struct ScriptedTransport {
    replies: Mutex<VecDeque<Option<(Duration, Completion)>>>,
    // Parked handlers for held replies; kept alive so the exchange never
    // settles.
    held: Mutex<Vec<CompletionHandler>>,
    closed: Arc<AtomicBool>,
}

impl ScriptedTransport {
    fn new(replies: Vec<Option<(Duration, Completion)>>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            held: Mutex::new(Vec::new()),
            closed: Arc::new(AtomicBool::new(false)),
        })
    }
}

impl Transport for ScriptedTransport {
    fn user_agent(&self) -> &str {
        "scripted-test/1.0"
    }

    fn execute(&self, _request: Request, on_complete: CompletionHandler) {
        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .expect("a scripted reply per request");
        let Some((delay, completion)) = reply else {
            self.held.lock().unwrap().push(on_complete);
            return;
        };
        thread::Builder::new()
            .name("io".to_string())
            .spawn(move || {
                thread::sleep(delay);
                on_complete(completion);
            })
            .expect("spawn io thread");
    }

    fn close(&self) -> io::Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

struct TrackedStream {
    closed: Arc<AtomicBool>,
}

impl io::Read for TrackedStream {
    fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        Ok(0)
    }
}

impl BodyStream for TrackedStream {
    fn close(&mut self) -> io::Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

fn ok_response() -> Completion {
    Completion::Response {
        meta: ResponseMeta::new(200, Some("OK".into()), Headers::new()),
        body: None,
    }
}

fn host_with(transport: Arc<ScriptedTransport>, timeout: Duration) -> ScriptHost {
    ScriptHost::new(HostConfig {
        timeout: Some(timeout),
        transport: Some(transport),
        ..Default::default()
    })
    .expect("host construction")
}

#[test]
fn request_completing_before_timeout_returns_normally() {
    init_tracing();
    let transport =
        ScriptedTransport::new(vec![Some((Duration::from_millis(20), ok_response()))]);
    let host = host_with(transport, Duration::from_secs(5));

    let default_calls = Arc::new(AtomicUsize::new(0));
    let category_calls = Arc::new(AtomicUsize::new(0));
    let d = default_calls.clone();
    let c = category_calls.clone();

    host.run(move |ctx| {
        let session = ctx.session(Credentials::new("user", "secret"));
        session.get(
            "server",
            CallbackSet::new()
                .on_client_error(move |_| {
                    c.fetch_add(1, Ordering::SeqCst);
                })
                .on_completion(move |resp, err| {
                    assert_eq!(resp.unwrap().status(), 200);
                    assert!(err.is_none());
                    d.fetch_add(1, Ordering::SeqCst);
                }),
        );
        Ok(())
    })
    .expect("script run");

    assert_eq!(default_calls.load(Ordering::SeqCst), 1);
    assert_eq!(category_calls.load(Ordering::SeqCst), 0);
}

#[test]
fn host_times_out_when_the_exchange_never_completes() {
    init_tracing();
    let transport = ScriptedTransport::new(vec![None]);
    let host = host_with(transport, Duration::from_millis(200));

    let result = host.run(|ctx| {
        let session = ctx.session(Credentials::new("user", "secret"));
        session.get("server", CallbackSet::new().on_response(|_| {}));
        Ok(())
    });

    assert!(matches!(result, Err(Error::ScriptTimeout(_))));
}

#[test]
fn close_from_a_callback_terminates_the_host() {
    init_tracing();
    let transport =
        ScriptedTransport::new(vec![Some((Duration::from_millis(10), ok_response()))]);
    let closed_flag = transport.closed.clone();
    let host = host_with(transport, Duration::from_secs(5));

    host.run(move |ctx| {
        let session = ctx.session(Credentials::new("user", "secret"));
        let shutdown = ctx.clone();
        session.get(
            "server",
            CallbackSet::new().on_completion(move |_, _| {
                let _ = shutdown.close();
            }),
        );
        Ok(())
    })
    .expect("script run");

    assert!(closed_flag.load(Ordering::SeqCst));
}

#[test]
fn close_from_top_level_unwinds_with_interrupted() {
    init_tracing();
    let transport = ScriptedTransport::new(vec![]);
    let closed_flag = transport.closed.clone();
    let host = host_with(transport, Duration::from_secs(5));

    let (tx, rx) = channel();
    host.run(move |ctx| {
        let result = ctx.close();
        tx.send(matches!(result, Err(Error::Interrupted))).unwrap();
        result
    })
    .expect("script run");

    assert!(rx.recv_timeout(Duration::from_secs(1)).unwrap());
    assert!(closed_flag.load(Ordering::SeqCst));
}

#[test]
fn completion_arriving_after_close_is_dropped_with_cleanup() {
    init_tracing();
    let body_closed = Arc::new(AtomicBool::new(false));
    let body = Body::new(Box::new(TrackedStream {
        closed: body_closed.clone(),
    }));
    let late = Completion::Response {
        meta: ResponseMeta::new(200, Some("OK".into()), Headers::new()),
        body: Some(body),
    };
    // The reply lands well after close() has run.
    let transport = ScriptedTransport::new(vec![Some((Duration::from_millis(150), late))]);
    let host = host_with(transport, Duration::from_secs(5));

    let delivered = Arc::new(AtomicBool::new(false));
    let flag = delivered.clone();
    host.run(move |ctx| {
        let session = ctx.session(Credentials::new("user", "secret"));
        session.get(
            "server",
            CallbackSet::new().on_completion(move |_, _| {
                flag.store(true, Ordering::SeqCst);
            }),
        );
        ctx.close()
    })
    .expect("script run");

    // Give the io thread time to hit the rejection path.
    for _ in 0..100 {
        if body_closed.load(Ordering::SeqCst) {
            break;
        }
        thread::sleep(Duration::from_millis(10));
    }
    assert!(body_closed.load(Ordering::SeqCst));
    assert!(!delivered.load(Ordering::SeqCst));
}

#[test]
fn network_failure_reaches_only_the_default_callback() {
    init_tracing();
    let failure = Completion::Failed(NetworkError::new("connection refused"));
    let transport =
        ScriptedTransport::new(vec![Some((Duration::from_millis(10), failure))]);
    let host = host_with(transport, Duration::from_secs(5));

    let default_calls = Arc::new(AtomicUsize::new(0));
    let d = default_calls.clone();
    host.run(move |ctx| {
        let session = ctx.session(Credentials::new("user", "secret"));
        session.get(
            "server",
            CallbackSet::new()
                .on_client_error(|_| panic!("category callback must not fire"))
                .on_server_error(|_| panic!("category callback must not fire"))
                .on_completion(move |resp, err| {
                    assert!(resp.is_none());
                    assert_eq!(err.unwrap().message(), "connection refused");
                    d.fetch_add(1, Ordering::SeqCst);
                }),
        );
        Ok(())
    })
    .expect("script run");

    assert_eq!(default_calls.load(Ordering::SeqCst), 1);
}
