//! Synthetic trigger generator
//!
//! Fixed-rate substitute for the hardware line. Used when no device is
//! configured, when it fails to open, and after a mid-run disconnect.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use contracts::TriggerIndex;
use metrics::counter;
use tokio::sync::watch;
use tracing::{debug, info, instrument, trace};

use crate::counter::{TriggerCounter, TriggerReader};
use crate::sampler::{Sampler, Ticker};
use crate::source::TriggerMode;

const FALLBACK_HZ: f64 = 20.0;

/// Tick period for a rate, falling back to 20 Hz for nonsense rates
pub(crate) fn tick_period(hz: f64) -> Duration {
    let hz = if hz.is_finite() && hz > 0.0 {
        hz
    } else {
        FALLBACK_HZ
    };
    Duration::from_secs_f64(1.0 / hz)
}

/// Advance `counter` once per period until `running` clears
pub(crate) fn run_synthetic(counter: &TriggerCounter, hz: f64, running: &AtomicBool) {
    let mut ticker = Ticker::new(tick_period(hz));
    debug!(hz, "synthetic tick loop running");

    while running.load(Ordering::Relaxed) {
        ticker.wait();
        if !running.load(Ordering::Relaxed) {
            break;
        }
        let index = counter.advance();
        counter!("trigger_synthetic_ticks_total").increment(1);
        trace!(trigger_index = index, "synthetic tick");
    }
}

/// Free-running trigger generator
#[derive(Debug)]
pub struct SyntheticTrigger {
    hz: f64,
    counter: TriggerCounter,
    sampler: Sampler,
    mode: watch::Sender<TriggerMode>,
}

impl SyntheticTrigger {
    pub fn new(hz: f64) -> Self {
        Self::with_counter(hz, TriggerCounter::new())
    }

    /// Generator that continues an existing counter
    pub fn with_counter(hz: f64, counter: TriggerCounter) -> Self {
        let (mode, _) = watch::channel(TriggerMode::Synthetic);
        Self {
            hz,
            counter,
            sampler: Sampler::new("synthetic"),
            mode,
        }
    }

    #[instrument(name = "synthetic_trigger_start", skip(self), fields(hz = self.hz))]
    pub fn start(&self) {
        let counter = self.counter.clone();
        let hz = self.hz;
        if self
            .sampler
            .start(move |running| run_synthetic(&counter, hz, &running))
        {
            info!("synthetic trigger started");
        }
    }

    pub fn stop(&self) {
        self.sampler.stop();
    }

    pub fn is_running(&self) -> bool {
        self.sampler.is_running()
    }

    pub fn hz(&self) -> f64 {
        self.hz
    }

    pub fn current_index(&self) -> TriggerIndex {
        self.counter.current()
    }

    pub fn reader(&self) -> TriggerReader {
        self.counter.reader()
    }

    pub fn subscribe_mode(&self) -> watch::Receiver<TriggerMode> {
        self.mode.subscribe()
    }
}
