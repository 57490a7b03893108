//! Dedicated sampling thread lifecycle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, error, warn};

/// Owns the sampling thread of a trigger source
#[derive(Debug)]
pub(crate) struct Sampler {
    name: &'static str,
    running: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Sampler {
    pub(crate) fn new(name: &'static str) -> Self {
        Self {
            name,
            running: Arc::new(AtomicBool::new(false)),
            worker: Mutex::new(None),
        }
    }

    /// Spawn `body` on a named thread; no-op if already running
    pub(crate) fn start<F>(&self, body: F) -> bool
    where
        F: FnOnce(Arc<AtomicBool>) + Send + 'static,
    {
        if self.running.swap(true, Ordering::SeqCst) {
            return false;
        }

        let running = Arc::clone(&self.running);
        let spawned = thread::Builder::new()
            .name(format!("trigger-{}", self.name))
            .spawn(move || body(running));

        match spawned {
            Ok(handle) => {
                *lock_unpoisoned(&self.worker) = Some(handle);
                debug!(sampler = self.name, "sampler thread started");
                true
            }
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                error!(sampler = self.name, error = %e, "failed to spawn sampler thread");
                false
            }
        }
    }

    /// Signal the thread and wait for it; safe to call repeatedly
    pub(crate) fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        let handle = lock_unpoisoned(&self.worker).take();
        if let Some(handle) = handle {
            if handle.thread().id() == thread::current().id() {
                warn!(sampler = self.name, "stop called from sampler thread, not joining");
                return;
            }
            if handle.join().is_err() {
                error!(sampler = self.name, "sampler thread panicked");
            }
            debug!(sampler = self.name, "sampler thread stopped");
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Fixed-rate tick schedule that does not accumulate sleep drift
#[derive(Debug)]
pub(crate) struct Ticker {
    period: Duration,
    next: Instant,
}

impl Ticker {
    pub(crate) fn new(period: Duration) -> Self {
        Self {
            period,
            next: Instant::now() + period,
        }
    }

    /// Sleep until the next tick; skips ticks that are already overdue
    pub(crate) fn wait(&mut self) {
        let now = Instant::now();
        if self.next > now {
            thread::sleep(self.next - now);
            self.next += self.period;
        } else {
            self.next = now + self.period;
        }
    }
}

/// Lock a mutex, recovering the data if a holder panicked
pub(crate) fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
