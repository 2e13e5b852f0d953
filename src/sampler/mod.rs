//! Background sampling loop and its collection strategies.

pub mod collector;
mod scheduler;

pub use collector::{Collector, SampleBatch};
pub use scheduler::{RecordingHandle, start};

use crate::error::Error;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Current wall-clock time in epoch milliseconds
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// What a recording collects on each cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strategy {
    /// One stack dump of the target threads per cycle
    Stack,
    /// CPU/allocation counters before and after the recording
    Resource,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Stack => "stack",
            Strategy::Resource => "resource",
        }
    }

    pub fn default_interval(&self) -> Duration {
        match self {
            Strategy::Stack => Duration::from_millis(500),
            Strategy::Resource => Duration::from_millis(1000),
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "stack" => Ok(Strategy::Stack),
            "resource" => Ok(Strategy::Resource),
            other => Err(Error::InvalidArgument(format!("unknown strategy '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SamplingConfig {
    /// Target spacing between cycle starts
    pub interval: Duration,
    /// Stop by itself once this much time has passed since start
    pub duration: Option<Duration>,
    /// Upper bound on one collection call
    pub collect_timeout: Option<Duration>,
}

impl SamplingConfig {
    pub fn for_strategy(strategy: Strategy) -> Self {
        SamplingConfig {
            interval: strategy.default_interval(),
            duration: None,
            collect_timeout: None,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_duration(mut self, duration: Option<Duration>) -> Self {
        self.duration = duration.filter(|d| !d.is_zero());
        self
    }

    pub fn with_collect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.collect_timeout = timeout;
        self
    }
}
