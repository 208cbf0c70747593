//! Single-threaded scripting client for asynchronous HTTP APIs.
//!
//! A control script issues requests through a [`Session`] and receives
//! responses through ordinary callbacks, without ever touching a thread pool
//! or a lock: the [`ScriptHost`] runs all script code and all callback
//! deliveries on one dedicated execution context, and the thread-handoff
//! decorator marshals transport completions onto it.
//!
//! ```no_run
//! use cloudscript::{CallbackSet, Credentials, HostConfig, ScriptHost};
//!
//! let host = ScriptHost::new(HostConfig {
//!     base_url: Some("https://api.example.com/1.3/".into()),
//!     ..Default::default()
//! })?;
//! host.run(|ctx| {
//!     let session = ctx.session(Credentials::new("user", "secret"));
//!     let shutdown = ctx.clone();
//!     session.get(
//!         "server",
//!         CallbackSet::new()
//!             .on_client_error(|resp| eprintln!("client error: {}", resp.meta))
//!             .on_completion(move |resp, err| {
//!                 if let Some(resp) = resp {
//!                     println!("{} servers", resp.data.is_some());
//!                 }
//!                 if let Some(err) = err {
//!                     eprintln!("network error: {err}");
//!                 }
//!                 let _ = shutdown.close();
//!             }),
//!     );
//!     Ok(())
//! })?;
//! # Ok::<(), cloudscript::Error>(())
//! ```

/// Default script execution budget (20 seconds).
pub const DEFAULT_SCRIPT_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(20);

/// Default connection timeout (5 seconds).
pub const DEFAULT_CONNECT_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

/// Default request timeout (60 seconds).
pub const DEFAULT_REQUEST_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(60);

/// Default User-Agent header value.
pub const DEFAULT_USER_AGENT: &str = concat!("cloudscript-rust/", env!("CARGO_PKG_VERSION"));

mod codec;
mod dispatch;
mod errors;
mod executor;
mod handoff;
mod headers;
#[cfg(feature = "mock")]
mod mock;
pub mod registry;
#[cfg(feature = "reqwest")]
mod reqwest_transport;
mod script;
mod session;
mod transport;

pub use codec::{Codec, JsonCodec};
pub use dispatch::{CallbackSet, Category, CategoryCallback, DefaultCallback, Response};
pub use errors::{CauseChain, Error, NetworkError, Result};
pub use executor::{InFlightGuard, RejectedTask, ScriptExecutor, Task, TaskSubmitter};
pub use handoff::HandoffTransport;
pub use headers::{Header, HeaderElement, Headers, Parameter};
#[cfg(feature = "mock")]
pub use mock::{fixtures, MockConfig, MockReply, MockTransport};
#[cfg(feature = "reqwest")]
pub use reqwest_transport::{ReqwestTransport, TransportConfig};
pub use script::{HostConfig, HostState, ScriptContext, ScriptHost};
pub use session::Session;
pub use transport::{
    Body, BodyStream, Completion, CompletionHandler, Credentials, Method, Request, RequestInfo,
    ResponseMeta, Transport,
};
