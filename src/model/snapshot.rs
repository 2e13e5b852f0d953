use super::frame::StackFrame;
use std::fmt;
use std::str::FromStr;

/// Thread identifier as reported by the target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ThreadId(pub u64);

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A thread known to the target, without state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadRef {
    pub id: ThreadId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ThreadState {
    New,
    Runnable,
    Blocked,
    Waiting,
    TimedWaiting,
    Terminated,
    Other(String),
}

impl ThreadState {
    pub fn as_str(&self) -> &str {
        match self {
            ThreadState::New => "NEW",
            ThreadState::Runnable => "RUNNABLE",
            ThreadState::Blocked => "BLOCKED",
            ThreadState::Waiting => "WAITING",
            ThreadState::TimedWaiting => "TIMED_WAITING",
            ThreadState::Terminated => "TERMINATED",
            ThreadState::Other(s) => s,
        }
    }
}

impl FromStr for ThreadState {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "NEW" => ThreadState::New,
            "RUNNABLE" => ThreadState::Runnable,
            "BLOCKED" => ThreadState::Blocked,
            "WAITING" => ThreadState::Waiting,
            "TIMED_WAITING" => ThreadState::TimedWaiting,
            "TERMINATED" => ThreadState::Terminated,
            other => ThreadState::Other(other.to_string()),
        })
    }
}

impl fmt::Display for ThreadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time state of one thread, as returned by a snapshot source.
///
/// Frames are ordered outermost (thread entry) to innermost (executing frame).
#[derive(Debug, Clone, PartialEq)]
pub struct ThreadDump {
    pub thread_id: ThreadId,
    pub thread_name: String,
    pub state: ThreadState,
    pub blocked_count: u64,
    pub blocked_time_ms: Option<u64>,
    pub waited_count: u64,
    pub waited_time_ms: Option<u64>,
    pub lock_name: Option<String>,
    pub lock_owner_id: Option<ThreadId>,
    pub lock_owner_name: Option<String>,
    pub in_native: bool,
    pub suspended: bool,
    pub frames: Vec<StackFrame>,
}

impl ThreadDump {
    pub fn new(thread_id: ThreadId, thread_name: impl Into<String>, state: ThreadState) -> Self {
        ThreadDump {
            thread_id,
            thread_name: thread_name.into(),
            state,
            blocked_count: 0,
            blocked_time_ms: None,
            waited_count: 0,
            waited_time_ms: None,
            lock_name: None,
            lock_owner_id: None,
            lock_owner_name: None,
            in_native: false,
            suspended: false,
            frames: Vec::new(),
        }
    }

    pub fn with_frames(mut self, frames: Vec<StackFrame>) -> Self {
        self.frames = frames;
        self
    }
}

/// Wall-clock bounds of the collection cycle that produced a snapshot (epoch ms)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleWindow {
    pub start_ms: i64,
    pub end_ms: i64,
}

impl SampleWindow {
    pub fn new(start_ms: i64, end_ms: i64) -> Self {
        SampleWindow { start_ms, end_ms }
    }

    pub fn duration_ms(&self) -> i64 {
        self.end_ms - self.start_ms
    }

    pub fn contains(&self, at_ms: i64) -> bool {
        at_ms >= self.start_ms && at_ms <= self.end_ms
    }

    /// Whether this window lies fully inside `[from_ms, to_ms]`
    pub fn within(&self, from_ms: i64, to_ms: i64) -> bool {
        self.start_ms >= from_ms && self.end_ms <= to_ms
    }
}

/// A thread dump stamped with the window of the cycle that captured it
#[derive(Debug, Clone, PartialEq)]
pub struct ThreadSnapshot {
    pub dump: ThreadDump,
    pub window: SampleWindow,
}

impl ThreadSnapshot {
    pub fn new(dump: ThreadDump, window: SampleWindow) -> Self {
        ThreadSnapshot { dump, window }
    }

    pub fn thread_id(&self) -> ThreadId {
        self.dump.thread_id
    }

    pub fn thread_name(&self) -> &str {
        &self.dump.thread_name
    }

    pub fn frames(&self) -> &[StackFrame] {
        &self.dump.frames
    }

    /// Own collection cost (end - start)
    pub fn real_time_ms(&self) -> i64 {
        self.window.duration_ms()
    }
}

/// Which resource counters a target can report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResourceSupport {
    pub cpu_time: bool,
    pub allocated_bytes: bool,
}

impl ResourceSupport {
    pub fn any(&self) -> bool {
        self.cpu_time || self.allocated_bytes
    }
}

/// Cumulative resource counters of one thread at one instant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceSample {
    pub thread_id: ThreadId,
    pub thread_name: String,
    pub cpu_time_nanos: Option<u64>,
    pub allocated_bytes: Option<u64>,
}

/// Counters taken right before the sampling loop started and right after it stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceUsage {
    pub thread_name: String,
    pub before: ResourceSample,
    pub after: Option<ResourceSample>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceDelta {
    /// Consumption between the two measurements
    Used {
        cpu_time_nanos: Option<u64>,
        allocated_bytes: Option<u64>,
    },
    /// A counter went backwards: the id now belongs to a different thread
    ThreadChanged,
    /// Only the first measurement was taken
    Incomplete,
}

impl ResourceUsage {
    pub fn new(before: ResourceSample) -> Self {
        ResourceUsage {
            thread_name: before.thread_name.clone(),
            before,
            after: None,
        }
    }

    pub fn delta(&self) -> ResourceDelta {
        let Some(after) = &self.after else {
            return ResourceDelta::Incomplete;
        };

        fn diff(before: Option<u64>, after: Option<u64>) -> Result<Option<u64>, ()> {
            match (before, after) {
                (Some(b), Some(a)) if a < b => Err(()),
                (Some(b), Some(a)) => Ok(Some(a - b)),
                _ => Ok(None),
            }
        }

        match (
            diff(self.before.cpu_time_nanos, after.cpu_time_nanos),
            diff(self.before.allocated_bytes, after.allocated_bytes),
        ) {
            (Ok(cpu_time_nanos), Ok(allocated_bytes)) => ResourceDelta::Used {
                cpu_time_nanos,
                allocated_bytes,
            },
            _ => ResourceDelta::ThreadChanged,
        }
    }
}
