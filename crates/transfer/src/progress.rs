use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

const DEFAULT_WINDOW: Duration = Duration::from_secs(5);
const DEFAULT_MAX_SAMPLES: usize = 100;

struct Sample {
    bytes: u64,
    at: Instant,
}

struct MeterInner {
    samples: VecDeque<Sample>,
    window: Duration,
    max_samples: usize,
}

/// Sliding-window transfer rate, shared between concurrent file tasks.
pub struct ThroughputMeter {
    inner: Mutex<MeterInner>,
}

impl Default for ThroughputMeter {
    fn default() -> Self {
        Self::new(None, None)
    }
}

impl ThroughputMeter {
    /// `window` defaults to 5 s, `max_samples` to 100.
    pub fn new(window: Option<Duration>, max_samples: Option<usize>) -> Self {
        Self {
            inner: Mutex::new(MeterInner {
                samples: VecDeque::new(),
                window: window.unwrap_or(DEFAULT_WINDOW),
                max_samples: max_samples.unwrap_or(DEFAULT_MAX_SAMPLES).max(2),
            }),
        }
    }

    /// Records `bytes` transferred just now.
    pub fn record(&self, bytes: u64) {
        self.record_at(bytes, Instant::now());
    }

    fn record_at(&self, bytes: u64, at: Instant) {
        let mut m = self.inner.lock().unwrap();
        m.samples.push_back(Sample { bytes, at });

        let window = m.window;
        while let Some(front) = m.samples.front() {
            if at.duration_since(front.at) > window {
                m.samples.pop_front();
            } else {
                break;
            }
        }
        while m.samples.len() > m.max_samples {
            m.samples.pop_front();
        }
    }

    /// Average rate over the window. 0.0 with fewer than two samples.
    pub fn bytes_per_second(&self) -> f64 {
        let m = self.inner.lock().unwrap();
        let (Some(first), Some(last)) = (m.samples.front(), m.samples.back()) else {
            return 0.0;
        };
        let elapsed = last.at.duration_since(first.at);
        if m.samples.len() < 2 || elapsed.is_zero() {
            return 0.0;
        }
        // The first sample opens the window; its bytes were sent before it.
        let bytes: u64 = m.samples.iter().skip(1).map(|s| s.bytes).sum();
        bytes as f64 / elapsed.as_secs_f64()
    }
}
