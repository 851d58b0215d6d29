use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, trace};

const THREAD_NAME: &str = "cpu_tune-reconcile";

#[derive(Debug, Default)]
struct Shared {
    cancelled: Mutex<bool>,
    wake: Condvar,
}

/// Calls a function periodically on a dedicated thread until cancelled.
///
/// Calls are serialized: the next interval starts when the previous call returns. Cancelling (or
/// dropping) waits for a call that is in progress to finish, then joins the thread.
#[derive(Debug)]
pub(crate) struct ReconcileTimer {
    shared: Arc<Shared>,
    thread: Option<JoinHandle<()>>,
}

impl ReconcileTimer {
    /// Starts the timer. The first call happens one `interval` from now.
    pub(crate) fn start<F>(interval: Duration, mut tick: F) -> io::Result<Self>
    where
        F: FnMut() + Send + 'static,
    {
        let shared = Arc::new(Shared::default());

        let thread = thread::Builder::new().name(THREAD_NAME.to_string()).spawn({
            let shared = Arc::clone(&shared);

            move || {
                debug!(?interval, "reconcile timer started");

                while wait(&shared, interval) {
                    trace!("reconcile timer fired");
                    tick();
                }

                debug!("reconcile timer stopped");
            }
        })?;

        Ok(Self {
            shared,
            thread: Some(thread),
        })
    }

    /// Stops the timer and waits for the thread to exit. Idempotent.
    pub(crate) fn cancel(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };

        *self.shared.cancelled.lock() = true;
        self.shared.wake.notify_all();

        if thread.join().is_err() {
            error!("reconcile timer thread panicked");
        }
    }
}

impl Drop for ReconcileTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}

// Returns false if cancelled before the interval elapsed.
fn wait(shared: &Shared, interval: Duration) -> bool {
    let deadline = Instant::now().checked_add(interval);
    let mut cancelled = shared.cancelled.lock();

    loop {
        if *cancelled {
            return false;
        }

        match deadline {
            Some(deadline) => {
                if shared.wake.wait_until(&mut cancelled, deadline).timed_out() {
                    return !*cancelled;
                }
            }
            None => shared.wake.wait(&mut cancelled),
        }
    }
}
