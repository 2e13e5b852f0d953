//! Queries over a finished [`Recording`].

pub mod method;
pub mod search;
pub mod stack;
pub mod tree;
pub mod window;

pub use method::{FrameStat, MethodReport, MethodStat, aggregate_methods};
pub use search::{SearchHit, ThreadSearch, search};
pub use stack::{StackDump, stack_dump};
pub use tree::{CallTree, CallTreeNode, NodeId, build_call_tree};
pub use window::{TimePoint, TimeWindow, resolve_point, resolve_range};

use crate::error::{Error, Result};
use crate::model::{ThreadId, ThreadSelector};
use crate::recording::Recording;

/// Ids of the recorded threads `selector` picks, ascending
pub fn select_threads(rec: &Recording, selector: &ThreadSelector) -> Result<Vec<ThreadId>> {
    let ids = selector.resolve(&rec.thread_refs());
    if ids.is_empty() {
        return Err(Error::NoTargetThreads(selector.to_string()));
    }
    Ok(ids)
}

/// Resolve an optional range; order values index the first selected thread
pub fn window_for(
    rec: &Recording,
    threads: &[ThreadId],
    range: Option<&str>,
) -> Result<Option<TimeWindow>> {
    range
        .map(|expr| resolve_range(rec, threads.first().copied(), expr))
        .transpose()
}
