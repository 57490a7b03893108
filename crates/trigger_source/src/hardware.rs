//! Hardware trigger line sampler
//!
//! Polls the configured input bit at `poll_hz`, commits one index per
//! rising edge and owns the OK/NG output line. After
//! `disconnect_after_errors` consecutive read failures the device is
//! released and the same counter keeps advancing at the synthetic rate.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use contracts::{DigitalIo, DioConfig, ResultOutput, TriggerConfig, TriggerIndex};
use metrics::{counter, gauge};
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::counter::{TriggerCounter, TriggerReader};
use crate::edge::EdgeDetector;
use crate::sampler::{lock_unpoisoned, Sampler, Ticker};
use crate::source::TriggerMode;
use crate::synthetic::run_synthetic;

type SharedDevice = Arc<Mutex<Option<Box<dyn DigitalIo>>>>;

/// Read failures between repeated warnings
const WARN_EVERY_FAILURES: u32 = 50;

/// Trigger source backed by a digital I/O device
pub struct HardwareTrigger {
    config: DioConfig,
    device: SharedDevice,
    counter: TriggerCounter,
    sampler: Sampler,
    mode: Arc<watch::Sender<TriggerMode>>,
    synthetic_hz: f64,
    disconnect_after: u32,
}

impl std::fmt::Debug for HardwareTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HardwareTrigger")
            .field("config", &self.config)
            .field("index", &self.counter.current())
            .field("mode", &*self.mode.borrow())
            .finish()
    }
}

/// Everything the sampling thread needs
struct PollContext {
    config: DioConfig,
    device: SharedDevice,
    counter: TriggerCounter,
    mode: Arc<watch::Sender<TriggerMode>>,
    synthetic_hz: f64,
    disconnect_after: u32,
}

impl HardwareTrigger {
    pub fn new(config: DioConfig, device: Box<dyn DigitalIo>, trigger: &TriggerConfig) -> Self {
        let (mode, _) = watch::channel(TriggerMode::Hardware);
        Self {
            config,
            device: Arc::new(Mutex::new(Some(device))),
            counter: TriggerCounter::new(),
            sampler: Sampler::new("hardware"),
            mode: Arc::new(mode),
            synthetic_hz: trigger.synthetic_hz,
            disconnect_after: trigger.disconnect_after_errors.max(1),
        }
    }

    /// Start sampling; no-op if already running
    #[instrument(
        name = "hardware_trigger_start",
        skip(self),
        fields(port = self.config.input_port, bit = self.config.trigger_bit)
    )]
    pub fn start(&self) {
        let ctx = PollContext {
            config: self.config.clone(),
            device: Arc::clone(&self.device),
            counter: self.counter.clone(),
            mode: Arc::clone(&self.mode),
            synthetic_hz: self.synthetic_hz,
            disconnect_after: self.disconnect_after,
        };
        if self.sampler.start(move |running| ctx.run(&running)) {
            info!(
                poll_interval_us = self.config.poll_interval().as_micros() as u64,
                "hardware trigger started"
            );
        }
    }

    /// Stop sampling and release the device
    pub fn stop(&self) {
        self.sampler.stop();
        let device = lock_unpoisoned(&self.device).take();
        if let Some(device) = device {
            release(device);
        }
    }

    pub fn is_running(&self) -> bool {
        self.sampler.is_running()
    }

    pub fn current_index(&self) -> TriggerIndex {
        self.counter.current()
    }

    pub fn reader(&self) -> TriggerReader {
        self.counter.reader()
    }

    pub fn mode(&self) -> TriggerMode {
        *self.mode.borrow()
    }

    pub fn subscribe_mode(&self) -> watch::Receiver<TriggerMode> {
        self.mode.subscribe()
    }

    pub fn config(&self) -> &DioConfig {
        &self.config
    }
}

impl ResultOutput for HardwareTrigger {
    fn set_output(&self, ok: bool) {
        let Some((port, bit)) = self.config.output_line() else {
            trace!(ok, "no output line configured");
            return;
        };

        let mut guard = lock_unpoisoned(&self.device);
        match guard.as_mut() {
            Some(device) => match device.write_bit(port, bit, ok) {
                Ok(()) => {
                    counter!("trigger_output_writes_total", "result" => if ok { "ok" } else { "ng" })
                        .increment(1);
                }
                Err(e) => {
                    counter!("trigger_output_errors_total").increment(1);
                    warn!(port, bit, ok, error = %e, "failed to write result line");
                }
            },
            None => debug!(ok, "result line unavailable, device released"),
        }
    }
}

impl Drop for HardwareTrigger {
    fn drop(&mut self) {
        self.stop();
    }
}

impl PollContext {
    fn run(self, running: &AtomicBool) {
        let port = self.config.input_port;
        let bit = self.config.trigger_bit;
        let mut edges = EdgeDetector::new();
        let mut failures: u32 = 0;
        let mut ticker = Ticker::new(self.config.poll_interval());

        while running.load(Ordering::Relaxed) {
            let sample = {
                let mut guard = lock_unpoisoned(&self.device);
                guard.as_mut().map(|device| device.read_bit(port, bit))
            };

            match sample {
                Some(Ok(level)) => {
                    failures = 0;
                    if edges.sample(level) {
                        let index = self.counter.advance();
                        counter!("trigger_edges_total").increment(1);
                        gauge!("trigger_index").set(index as f64);
                        trace!(trigger_index = index, "rising edge");
                    }
                }
                Some(Err(e)) => {
                    // Level is kept so a held-high line is not recounted after a glitch
                    failures += 1;
                    counter!("trigger_read_errors_total").increment(1);
                    if failures == 1 || failures % WARN_EVERY_FAILURES == 0 {
                        warn!(failures, error = %e, "trigger line read failed");
                    }
                    if failures >= self.disconnect_after {
                        error!(failures, "trigger device disconnected");
                        break;
                    }
                }
                None => break,
            }

            ticker.wait();
        }

        if running.load(Ordering::Relaxed) {
            self.fall_back(running);
        }
    }

    /// Release the device and keep the counter moving synthetically
    fn fall_back(&self, running: &AtomicBool) {
        let device = lock_unpoisoned(&self.device).take();
        if let Some(device) = device {
            release(device);
        }

        self.mode.send_replace(TriggerMode::Synthetic);
        counter!("trigger_fallbacks_total").increment(1);
        warn!(
            hz = self.synthetic_hz,
            trigger_index = self.counter.current(),
            "switching to synthetic trigger"
        );

        run_synthetic(&self.counter, self.synthetic_hz, running);
    }
}

fn release(mut device: Box<dyn DigitalIo>) {
    if let Err(e) = device.close() {
        warn!(error = %e, "failed to close trigger device");
    }
}
