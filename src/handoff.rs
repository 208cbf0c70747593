//! Transport decorator that marshals completions onto the script thread.
//!
//! The wrapped transport invokes its completion callback from one of its own
//! I/O threads. This decorator re-submits the delivery onto the single script
//! execution context, so script code never observes a callback from any other
//! thread. When the context has already shut down, the completion is dropped
//! silently after closing any body stream; the script has decided to
//! terminate, so there is no one left to deliver to.

use std::io;

use crate::{
    executor::TaskSubmitter,
    transport::{CompletionHandler, Request, Transport},
};

pub struct HandoffTransport<T> {
    inner: T,
    submitter: TaskSubmitter,
}

impl<T: Transport> HandoffTransport<T> {
    pub fn new(inner: T, submitter: TaskSubmitter) -> Self {
        Self { inner, submitter }
    }
}

impl<T: Transport> Transport for HandoffTransport<T> {
    fn user_agent(&self) -> &str {
        self.inner.user_agent()
    }

    fn execute(&self, request: Request, on_complete: CompletionHandler) {
        // Script thread, initiating the request.
        let submitter = self.submitter.clone();
        let guard = self.submitter.begin_exchange();
        self.inner.execute(
            request,
            Box::new(move |completion| {
                // I/O thread, receiving the response.
                let delivery: crate::executor::Task = Box::new(move || {
                    // Script thread, handing the completion to the session.
                    let _guard = guard;
                    on_complete(completion);
                });
                if let Err(rejected) = submitter.submit(delivery) {
                    tracing::debug!("response rejected; script is shutting down");
                    // Dropping the task drops the completion, which closes
                    // any body stream it carries.
                    drop(rejected);
                }
            }),
        );
    }

    fn close(&self) -> io::Result<()> {
        self.inner.close()
    }
}
