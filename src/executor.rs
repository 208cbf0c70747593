//! The script execution context.
//!
//! Exactly one worker thread runs all script code and all callback
//! deliveries, consuming a many-producer task queue. Serialization is
//! structural: nothing else ever runs on this thread, so script-visible state
//! needs no locks. Shutdown is an explicit flag checked between tasks rather
//! than a thread interrupt.

use std::{
    io,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        mpsc::{self, Receiver, RecvTimeoutError, Sender},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

/// Unit of work delivered to the script thread.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// A task the context refused to accept; handed back so the submitter can
/// clean up whatever rides in it (dropping it closes any body stream).
pub struct RejectedTask(pub Task);

struct Shared {
    /// Set once shutdown begins; no new work is accepted afterwards.
    closed: AtomicBool,
    /// Set when the script body task has returned.
    script_done: AtomicBool,
    /// Exchanges issued but not yet delivered or dropped.
    in_flight: AtomicUsize,
}

/// Cloneable handle for submitting tasks onto the script thread. Safe for
/// many producers, one consumer.
#[derive(Clone)]
pub struct TaskSubmitter {
    sender: Sender<Task>,
    shared: Arc<Shared>,
}

impl TaskSubmitter {
    /// Submits a task for execution on the script thread, rejecting it when
    /// shutdown has begun.
    pub fn submit(&self, task: Task) -> Result<(), RejectedTask> {
        if self.is_closed() {
            return Err(RejectedTask(task));
        }
        self.sender.send(task).map_err(|err| RejectedTask(err.0))
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Disables acceptance of new work. The worker exits after the task it is
    /// currently running, which during script-initiated shutdown is the
    /// `close()` caller itself.
    pub fn shutdown(&self) {
        self.shared.closed.store(true, Ordering::SeqCst);
    }

    /// Marks the script body as finished; the worker stops once nothing is in
    /// flight.
    pub(crate) fn mark_script_done(&self) {
        self.shared.script_done.store(true, Ordering::SeqCst);
    }

    /// Accounts for one issued exchange until the returned guard drops.
    pub fn begin_exchange(&self) -> InFlightGuard {
        self.shared.in_flight.fetch_add(1, Ordering::SeqCst);
        InFlightGuard {
            shared: self.shared.clone(),
        }
    }

    pub fn in_flight(&self) -> usize {
        self.shared.in_flight.load(Ordering::SeqCst)
    }
}

/// Keeps the worker alive while an exchange awaits its completion.
pub struct InFlightGuard {
    shared: Arc<Shared>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.shared.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Owns the worker thread and its queue.
pub struct ScriptExecutor {
    submitter: TaskSubmitter,
    done_rx: Receiver<()>,
    worker: Option<JoinHandle<()>>,
}

impl ScriptExecutor {
    /// Spawns the single worker thread.
    pub fn spawn() -> io::Result<Self> {
        let (sender, receiver) = mpsc::channel::<Task>();
        let (done_tx, done_rx) = mpsc::channel::<()>();
        let shared = Arc::new(Shared {
            closed: AtomicBool::new(false),
            script_done: AtomicBool::new(false),
            in_flight: AtomicUsize::new(0),
        });

        let worker_shared = shared.clone();
        let worker = thread::Builder::new()
            .name("script-worker".to_string())
            .spawn(move || {
                run_worker(receiver, worker_shared);
                // Receiver may be gone when the controlling thread timed out.
                let _ = done_tx.send(());
            })?;

        Ok(Self {
            submitter: TaskSubmitter { sender, shared },
            done_rx,
            worker: Some(worker),
        })
    }

    pub fn submitter(&self) -> TaskSubmitter {
        self.submitter.clone()
    }

    pub fn submit(&self, task: Task) -> Result<(), RejectedTask> {
        self.submitter.submit(task)
    }

    /// Begins shutdown without waiting for the worker.
    pub fn initiate_shutdown(&self) {
        self.submitter.shutdown();
    }

    /// Blocks until the worker loop has exited, up to `timeout`. Returns
    /// `false` when the budget elapsed first; the worker is left to wind down
    /// on its own once its submitters drop.
    pub fn await_quiescence(&mut self, timeout: Duration) -> bool {
        match self.done_rx.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if let Some(worker) = self.worker.take() {
                    if worker.join().is_err() {
                        tracing::error!("script worker panicked");
                    }
                }
                true
            }
            Err(RecvTimeoutError::Timeout) => {
                self.initiate_shutdown();
                false
            }
        }
    }
}

fn run_worker(receiver: Receiver<Task>, shared: Arc<Shared>) {
    loop {
        if shared.closed.load(Ordering::SeqCst) {
            break;
        }
        if shared.script_done.load(Ordering::SeqCst)
            && shared.in_flight.load(Ordering::SeqCst) == 0
        {
            break;
        }
        match receiver.recv() {
            Ok(task) => task(),
            Err(_) => break,
        }
    }
    // Unrun tasks may carry completions; dropping them runs their cleanup.
    let mut dropped = 0usize;
    while let Ok(task) = receiver.try_recv() {
        drop(task);
        dropped += 1;
    }
    if dropped > 0 {
        tracing::debug!(dropped, "discarded queued tasks at shutdown");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc::channel;

    use super::*;

    #[test]
    fn tasks_run_on_the_script_worker_thread() {
        let executor = ScriptExecutor::spawn().unwrap();
        let (tx, rx) = channel();
        let submitter = executor.submitter();
        executor
            .submit(Box::new(move || {
                tx.send(thread::current().name().map(str::to_string))
                    .unwrap();
                submitter.mark_script_done();
            }))
            .unwrap_or_else(|_| panic!("submit failed"));
        let name = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(name.as_deref(), Some("script-worker"));
    }

    #[test]
    fn submit_after_shutdown_hands_the_task_back() {
        let executor = ScriptExecutor::spawn().unwrap();
        executor.initiate_shutdown();
        let result = executor.submit(Box::new(|| panic!("must not run")));
        assert!(result.is_err());
    }

    #[test]
    fn worker_exits_when_script_is_done_and_nothing_in_flight() {
        let mut executor = ScriptExecutor::spawn().unwrap();
        let submitter = executor.submitter();
        executor
            .submit(Box::new(move || submitter.mark_script_done()))
            .unwrap_or_else(|_| panic!("submit failed"));
        assert!(executor.await_quiescence(Duration::from_secs(5)));
    }

    #[test]
    fn worker_waits_for_in_flight_exchanges() {
        let mut executor = ScriptExecutor::spawn().unwrap();
        let submitter = executor.submitter();
        let guard_submitter = executor.submitter();

        executor
            .submit(Box::new(move || {
                let guard = guard_submitter.begin_exchange();
                let delivery = guard_submitter.clone();
                // Emulate an I/O thread completing after the body returns.
                thread::spawn(move || {
                    thread::sleep(Duration::from_millis(50));
                    delivery
                        .submit(Box::new(move || drop(guard)))
                        .unwrap_or_else(|_| panic!("delivery rejected"));
                });
                guard_submitter.mark_script_done();
            }))
            .unwrap_or_else(|_| panic!("submit failed"));

        assert!(executor.await_quiescence(Duration::from_secs(5)));
        assert_eq!(submitter.in_flight(), 0);
    }

    #[test]
    fn await_quiescence_times_out_when_the_worker_is_blocked() {
        let mut executor = ScriptExecutor::spawn().unwrap();
        let submitter = executor.submitter();
        // Script never finishes and close is never called.
        executor
            .submit(Box::new(move || {
                // Leak the guard so the exchange never completes.
                std::mem::forget(submitter.begin_exchange());
                submitter.mark_script_done();
            }))
            .unwrap_or_else(|_| panic!("submit failed"));
        assert!(!executor.await_quiescence(Duration::from_millis(100)));
    }
}
