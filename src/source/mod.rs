//! Where thread state comes from.
//!
//! The sampler only talks to a [`ThreadSnapshotSource`]; `ProcfsSource` reads a live
//! Linux process and `MemorySource` serves scripted dumps.

mod memory;
mod procfs;

pub use memory::MemorySource;
pub use procfs::{ProcfsSource, find_process_by_name, sanitize_name};

use crate::error::Result;
use crate::model::{ResourceSample, ResourceSupport, ThreadDump, ThreadId, ThreadRef};
use std::collections::BTreeMap;

/// Threads a snapshot call applies to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ThreadScope {
    All,
    Ids(Vec<ThreadId>),
}

impl ThreadScope {
    pub fn includes(&self, id: ThreadId) -> bool {
        match self {
            ThreadScope::All => true,
            ThreadScope::Ids(ids) => ids.contains(&id),
        }
    }
}

/// Capability to inspect the threads of a monitored process.
///
/// Every call may fail with a transport error when the target is gone or unreachable.
pub trait ThreadSnapshotSource: Send + Sync {
    /// Threads currently alive in the target
    fn threads(&self) -> Result<Vec<ThreadRef>>;

    /// Point-in-time dump of the threads in `scope`. Threads that exited since the
    /// thread list was taken are left out.
    fn snapshot(&self, scope: &ThreadScope) -> Result<Vec<ThreadDump>>;

    fn resource_support(&self) -> ResourceSupport;

    /// Cumulative counters for `ids`; unsupported counters are `None`
    fn resource_usage(&self, ids: &[ThreadId]) -> Result<Vec<ResourceSample>>;

    /// Descriptive key/value pairs about the target, stored with a recording
    fn target_info(&self) -> BTreeMap<String, String> {
        BTreeMap::new()
    }
}
