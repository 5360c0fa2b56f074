//! Time-bounded unit invocations
//!
//! The work runs on its own thread and the caller waits on a channel. A
//! worker that overruns is not killed; callers signal it through its
//! cancel token and stop waiting.

use std::sync::mpsc;
use std::thread;
use std::time::Duration;

/// How a bounded call ended
#[derive(Debug)]
pub enum Bounded<T> {
    Finished(T),
    TimedOut,
    /// The worker panicked or could not be started
    Aborted(String),
}

/// Run `work` on a named thread, waiting at most `timeout`
pub fn run_bounded<T, F>(name: &str, timeout: Duration, work: F) -> Bounded<T>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    let spawned = thread::Builder::new()
        .name(format!("unit-{name}"))
        .spawn(move || {
            // The receiver is gone once the caller timed out
            let _ = tx.send(work());
        });
    if let Err(e) = spawned {
        return Bounded::Aborted(format!("could not start worker: {e}"));
    }

    match rx.recv_timeout(timeout) {
        Ok(value) => Bounded::Finished(value),
        Err(mpsc::RecvTimeoutError::Timeout) => Bounded::TimedOut,
        Err(mpsc::RecvTimeoutError::Disconnected) => Bounded::Aborted("worker panicked".to_string()),
    }
}
