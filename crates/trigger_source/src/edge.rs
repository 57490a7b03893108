//! Rising-edge detection on a sampled digital line.

/// Detects 0→1 transitions between consecutive samples
///
/// Level detection would count a held-high line on every sample;
/// this only fires once per transition.
#[derive(Debug, Clone, Copy, Default)]
pub struct EdgeDetector {
    last: bool,
}

impl EdgeDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one sample, returns true on a rising edge
    #[inline]
    pub fn sample(&mut self, level: bool) -> bool {
        let rising = level && !self.last;
        self.last = level;
        rising
    }

    /// Level of the previous sample
    #[inline]
    pub fn last_level(&self) -> bool {
        self.last
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn count_edges(samples: &[u8]) -> usize {
        let mut detector = EdgeDetector::new();
        samples
            .iter()
            .filter(|&&s| detector.sample(s != 0))
            .count()
    }

    #[test]
    fn test_single_pulse() {
        assert_eq!(count_edges(&[0, 1, 0]), 1);
    }

    #[test]
    fn test_held_high_counts_once() {
        assert_eq!(count_edges(&[0, 1, 1, 1, 1, 1]), 1);
    }

    #[test]
    fn test_starting_high_counts_once() {
        // First sample high is an edge relative to the idle-low assumption
        assert_eq!(count_edges(&[1, 1, 0, 1]), 2);
    }

    #[test]
    fn test_pulse_train() {
        assert_eq!(count_edges(&[0, 1, 0, 1, 1, 0, 0, 1, 0]), 3);
    }

    #[test]
    fn test_falling_edge_ignored() {
        let mut detector = EdgeDetector::new();
        assert!(detector.sample(true));
        assert!(!detector.sample(false));
        assert!(!detector.last_level());
    }
}
