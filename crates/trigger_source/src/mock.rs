//! Mock digital I/O for tests and bench runs without hardware.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use contracts::{
    ChannelConfig, ChannelId, ContractError, DeviceProvider, DigitalIo, DioConfig, FrameSensor,
};

use crate::sampler::lock_unpoisoned;

#[derive(Debug, Default)]
struct MockDioState {
    level: bool,
    queued: VecDeque<bool>,
    disconnected: bool,
    closed: bool,
    reads: u64,
    writes: Vec<(u8, u8, bool)>,
}

/// Scriptable digital I/O device
///
/// Reads pop queued samples first, then return the steady level.
#[derive(Debug)]
pub struct MockDio {
    state: Arc<Mutex<MockDioState>>,
}

/// Test-side control of a [`MockDio`]
#[derive(Debug, Clone)]
pub struct MockDioHandle {
    state: Arc<Mutex<MockDioState>>,
}

impl MockDio {
    pub fn new() -> (Self, MockDioHandle) {
        let state = Arc::new(Mutex::new(MockDioState::default()));
        (
            Self {
                state: Arc::clone(&state),
            },
            MockDioHandle { state },
        )
    }
}

impl DigitalIo for MockDio {
    fn read_bit(&mut self, _port: u8, _bit: u8) -> Result<bool, ContractError> {
        let mut state = lock_unpoisoned(&self.state);
        state.reads += 1;
        if state.disconnected {
            return Err(ContractError::device_io("mock-dio", "device disconnected"));
        }
        Ok(match state.queued.pop_front() {
            Some(level) => level,
            None => state.level,
        })
    }

    fn write_bit(&mut self, port: u8, bit: u8, value: bool) -> Result<(), ContractError> {
        let mut state = lock_unpoisoned(&self.state);
        if state.disconnected {
            return Err(ContractError::device_io("mock-dio", "device disconnected"));
        }
        state.writes.push((port, bit, value));
        Ok(())
    }

    fn close(&mut self) -> Result<(), ContractError> {
        lock_unpoisoned(&self.state).closed = true;
        Ok(())
    }
}

impl MockDioHandle {
    /// Steady level returned once the queue is drained
    pub fn set_level(&self, level: bool) {
        lock_unpoisoned(&self.state).level = level;
    }

    /// Append samples returned one per read
    pub fn queue_samples(&self, samples: &[bool]) {
        lock_unpoisoned(&self.state)
            .queued
            .extend(samples.iter().copied());
    }

    /// Queue `count` full low-high-low pulses
    pub fn queue_pulses(&self, count: usize) {
        let mut state = lock_unpoisoned(&self.state);
        for _ in 0..count {
            state.queued.extend([false, true, false]);
        }
    }

    pub fn pending_samples(&self) -> usize {
        lock_unpoisoned(&self.state).queued.len()
    }

    /// Make every subsequent read and write fail
    pub fn set_disconnected(&self, disconnected: bool) {
        lock_unpoisoned(&self.state).disconnected = disconnected;
    }

    pub fn read_count(&self) -> u64 {
        lock_unpoisoned(&self.state).reads
    }

    pub fn writes(&self) -> Vec<(u8, u8, bool)> {
        lock_unpoisoned(&self.state).writes.clone()
    }

    pub fn is_closed(&self) -> bool {
        lock_unpoisoned(&self.state).closed
    }
}

/// Provider that hands out one [`MockDio`] and no cameras
#[derive(Debug, Default)]
pub struct MockDioProvider {
    dio: Mutex<Option<MockDio>>,
}

impl MockDioProvider {
    pub fn new() -> (Self, MockDioHandle) {
        let (dio, handle) = MockDio::new();
        (
            Self {
                dio: Mutex::new(Some(dio)),
            },
            handle,
        )
    }
}

impl DeviceProvider for MockDioProvider {
    fn open_dio(&self, _config: &DioConfig) -> Result<Box<dyn DigitalIo>, ContractError> {
        match lock_unpoisoned(&self.dio).take() {
            Some(dio) => Ok(Box::new(dio)),
            None => Err(ContractError::device_unavailable(
                "mock-dio",
                "already opened",
            )),
        }
    }

    fn open_camera(
        &self,
        channel_id: ChannelId,
        _config: &ChannelConfig,
    ) -> Result<Box<dyn FrameSensor>, ContractError> {
        Err(ContractError::device_unavailable(
            channel_id.to_string(),
            "mock provider has no cameras",
        ))
    }
}
