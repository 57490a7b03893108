//! Synthetic camera
//!
//! Stands in for a camera that is absent or failed to open. Emits Mono8
//! frames at a fixed nominal rate, independent of the trigger line.

use std::thread;
use std::time::{Duration, Instant};

use bytes::Bytes;
use contracts::{ContractError, FrameSensor, ImageBuffer, PixelFormat, RawFrame};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Default synthetic frame width
pub const SYNTHETIC_WIDTH: u32 = 640;
/// Default synthetic frame height
pub const SYNTHETIC_HEIGHT: u32 = 480;

/// Pixel content of synthetic frames
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyntheticFill {
    /// Uniform random noise
    Random,
    /// Every pixel set to one value
    Constant(u8),
}

/// Fixed-rate frame generator implementing [`FrameSensor`]
#[derive(Debug)]
pub struct SyntheticSensor {
    width: u32,
    height: u32,
    period: Duration,
    next: Instant,
    fill: SyntheticFill,
    rng: StdRng,
}

impl SyntheticSensor {
    /// 640x480 random frames at `fps` (20 Hz when `fps` is not positive)
    pub fn new(fps: f64) -> Self {
        let fps = if fps.is_finite() && fps > 0.0 { fps } else { 20.0 };
        let period = Duration::from_secs_f64(1.0 / fps);
        Self {
            width: SYNTHETIC_WIDTH,
            height: SYNTHETIC_HEIGHT,
            period,
            next: Instant::now() + period,
            fill: SyntheticFill::Random,
            rng: StdRng::from_os_rng(),
        }
    }

    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width.max(1);
        self.height = height.max(1);
        self
    }

    pub fn with_fill(mut self, fill: SyntheticFill) -> Self {
        self.fill = fill;
        self
    }

    /// Reproducible noise
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    fn render(&mut self) -> Result<ImageBuffer, ContractError> {
        let len = ImageBuffer::expected_len(self.width, self.height, PixelFormat::Mono8);
        let data = match self.fill {
            SyntheticFill::Constant(level) => vec![level; len],
            SyntheticFill::Random => {
                let mut buf = vec![0u8; len];
                self.rng.fill(&mut buf[..]);
                buf
            }
        };
        ImageBuffer::new(self.width, self.height, PixelFormat::Mono8, Bytes::from(data))
    }
}

impl FrameSensor for SyntheticSensor {
    fn acquire(&mut self, timeout: Duration) -> Result<Option<RawFrame>, ContractError> {
        let now = Instant::now();
        if self.next > now {
            let wait = self.next - now;
            if wait > timeout {
                thread::sleep(timeout);
                return Ok(None);
            }
            thread::sleep(wait);
            self.next += self.period;
        } else {
            self.next = now + self.period;
        }

        let image = self.render()?;
        Ok(Some(RawFrame {
            image,
            device_timestamp: None,
        }))
    }
}
