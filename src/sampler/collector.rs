use super::{Strategy, now_ms};
use crate::error::Result;
use crate::model::{SampleWindow, ThreadSnapshot};
use crate::source::{ThreadScope, ThreadSnapshotSource};

/// What one collection cycle produced
#[derive(Debug)]
pub enum SampleBatch {
    Snapshots(Vec<ThreadSnapshot>),
    /// The cycle completed but carries no per-cycle data
    Tick,
}

/// One collection cycle of a sampling strategy
pub trait Collector: Send + 'static {
    fn collect(
        &mut self,
        source: &dyn ThreadSnapshotSource,
        scope: &ThreadScope,
    ) -> Result<SampleBatch>;
}

/// Dumps the stacks of all threads in scope and stamps them with the cycle's window
pub struct StackCollector;

impl Collector for StackCollector {
    fn collect(
        &mut self,
        source: &dyn ThreadSnapshotSource,
        scope: &ThreadScope,
    ) -> Result<SampleBatch> {
        let start_ms = now_ms();
        let dumps = source.snapshot(scope)?;
        let window = SampleWindow::new(start_ms, now_ms().max(start_ms));

        Ok(SampleBatch::Snapshots(
            dumps
                .into_iter()
                .map(|dump| ThreadSnapshot::new(dump, window))
                .collect(),
        ))
    }
}

/// Resource counters are read once before and once after the loop, so a cycle is a no-op
pub struct ResourceCollector;

impl Collector for ResourceCollector {
    fn collect(&mut self, _: &dyn ThreadSnapshotSource, _: &ThreadScope) -> Result<SampleBatch> {
        Ok(SampleBatch::Tick)
    }
}

pub fn for_strategy(strategy: Strategy) -> Box<dyn Collector> {
    match strategy {
        Strategy::Stack => Box::new(StackCollector),
        Strategy::Resource => Box::new(ResourceCollector),
    }
}
