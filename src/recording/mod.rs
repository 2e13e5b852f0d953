//! Finished recordings and the session slot holding the current one.

mod session;

pub use session::{Session, canonical_path};

use crate::model::{
    ResourceSample, ResourceUsage, ThreadId, ThreadRef, ThreadSnapshot,
};
use crate::sampler::Strategy;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingState {
    /// Finished, only held in memory
    Stopped,
    /// Written to or loaded from a file
    Persisted,
}

/// The samples and metadata of one finished sampling session.
///
/// Values only exist once the sampling loop has ended, so everything here is
/// read-only apart from the persisted path.
#[derive(Debug, Clone, PartialEq)]
pub struct Recording {
    strategy: Strategy,
    start_time_ms: i64,
    end_time_ms: i64,
    interval_ms: u64,
    limit_ms: u64,
    sample_count: u64,
    targets: Vec<ThreadRef>,
    snapshots: BTreeMap<ThreadId, Vec<ThreadSnapshot>>,
    resources: BTreeMap<ThreadId, ResourceUsage>,
    tool_info: BTreeMap<String, String>,
    target_info: BTreeMap<String, String>,
    source_path: Option<PathBuf>,
}

impl Recording {
    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    pub fn start_time_ms(&self) -> i64 {
        self.start_time_ms
    }

    pub fn end_time_ms(&self) -> i64 {
        self.end_time_ms
    }

    pub fn duration_ms(&self) -> i64 {
        self.end_time_ms - self.start_time_ms
    }

    pub fn interval_ms(&self) -> u64 {
        self.interval_ms
    }

    /// Duration limit, 0 when the recording ran until stopped
    pub fn limit_ms(&self) -> u64 {
        self.limit_ms
    }

    pub fn sample_count(&self) -> u64 {
        self.sample_count
    }

    /// Threads selected when the recording started
    pub fn targets(&self) -> &[ThreadRef] {
        &self.targets
    }

    /// Every thread with data in this recording, ordered by id.
    ///
    /// Threads that appeared only in snapshots take the name of their first snapshot.
    pub fn thread_refs(&self) -> Vec<ThreadRef> {
        let mut refs: BTreeMap<ThreadId, String> = self
            .targets
            .iter()
            .map(|t| (t.id, t.name.clone()))
            .collect();
        for (id, list) in &self.snapshots {
            if let Some(first) = list.first() {
                refs.entry(*id)
                    .or_insert_with(|| first.thread_name().to_string());
            }
        }
        refs.into_iter()
            .map(|(id, name)| ThreadRef { id, name })
            .collect()
    }

    pub fn thread_name(&self, id: ThreadId) -> Option<String> {
        self.thread_refs()
            .into_iter()
            .find(|t| t.id == id)
            .map(|t| t.name)
    }

    /// Snapshots of one thread in capture order (empty if the thread has none)
    pub fn snapshots(&self, id: ThreadId) -> &[ThreadSnapshot] {
        self.snapshots.get(&id).map_or(&[], Vec::as_slice)
    }

    pub fn all_snapshots(&self) -> &BTreeMap<ThreadId, Vec<ThreadSnapshot>> {
        &self.snapshots
    }

    pub fn resources(&self) -> &BTreeMap<ThreadId, ResourceUsage> {
        &self.resources
    }

    pub fn tool_info(&self) -> &BTreeMap<String, String> {
        &self.tool_info
    }

    pub fn target_info(&self) -> &BTreeMap<String, String> {
        &self.target_info
    }

    /// Canonical path this recording was saved to or loaded from
    pub fn source_path(&self) -> Option<&Path> {
        self.source_path.as_deref()
    }

    pub fn state(&self) -> RecordingState {
        if self.source_path.is_some() {
            RecordingState::Persisted
        } else {
            RecordingState::Stopped
        }
    }

    pub(crate) fn set_source_path(&mut self, path: PathBuf) {
        self.source_path = Some(path);
    }
}

/// Assembles a [`Recording`]; used by the sampler, the loader and tests
#[derive(Debug)]
pub struct RecordingBuilder {
    rec: Recording,
}

impl RecordingBuilder {
    pub fn new(strategy: Strategy, start_time_ms: i64) -> Self {
        RecordingBuilder {
            rec: Recording {
                strategy,
                start_time_ms,
                end_time_ms: start_time_ms,
                interval_ms: 0,
                limit_ms: 0,
                sample_count: 0,
                targets: Vec::new(),
                snapshots: BTreeMap::new(),
                resources: BTreeMap::new(),
                tool_info: tool_info(),
                target_info: BTreeMap::new(),
                source_path: None,
            },
        }
    }

    pub fn interval_ms(&mut self, interval_ms: u64) -> &mut Self {
        self.rec.interval_ms = interval_ms;
        self
    }

    pub fn limit_ms(&mut self, limit_ms: u64) -> &mut Self {
        self.rec.limit_ms = limit_ms;
        self
    }

    pub fn targets(&mut self, targets: Vec<ThreadRef>) -> &mut Self {
        self.rec.targets = targets;
        self
    }

    pub fn tool_info(&mut self, info: BTreeMap<String, String>) -> &mut Self {
        self.rec.tool_info = info;
        self
    }

    pub fn target_info(&mut self, info: BTreeMap<String, String>) -> &mut Self {
        self.rec.target_info = info;
        self
    }

    /// Append a snapshot to its thread's list; callers push in capture order
    pub fn push_snapshot(&mut self, snapshot: ThreadSnapshot) -> &mut Self {
        self.rec
            .snapshots
            .entry(snapshot.thread_id())
            .or_default()
            .push(snapshot);
        self
    }

    /// Count one successful collection cycle
    pub fn complete_cycle(&mut self) -> &mut Self {
        self.rec.sample_count += 1;
        self
    }

    pub fn sample_count(&mut self, count: u64) -> &mut Self {
        self.rec.sample_count = count;
        self
    }

    pub fn resource_before(&mut self, sample: ResourceSample) -> &mut Self {
        self.rec
            .resources
            .insert(sample.thread_id, ResourceUsage::new(sample));
        self
    }

    /// Attach the closing measurement; ignored for threads without an opening one
    pub fn resource_after(&mut self, sample: ResourceSample) -> &mut Self {
        if let Some(usage) = self.rec.resources.get_mut(&sample.thread_id) {
            usage.after = Some(sample);
        }
        self
    }

    pub fn build(mut self, end_time_ms: i64) -> Recording {
        self.rec.end_time_ms = end_time_ms.max(self.rec.start_time_ms);
        self.rec
    }
}

/// Describes this tool in saved recordings
pub fn tool_info() -> BTreeMap<String, String> {
    let mut info = BTreeMap::new();
    info.insert("name".to_string(), env!("CARGO_PKG_NAME").to_string());
    info.insert("version".to_string(), env!("CARGO_PKG_VERSION").to_string());
    info.insert("os".to_string(), std::env::consts::OS.to_string());
    info.insert("arch".to_string(), std::env::consts::ARCH.to_string());
    info.insert("pid".to_string(), std::process::id().to_string());
    info
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{SampleWindow, ThreadDump, ThreadState};

    fn snapshot(id: u64, name: &str, start: i64) -> ThreadSnapshot {
        ThreadSnapshot::new(
            ThreadDump::new(ThreadId(id), name, ThreadState::Runnable),
            SampleWindow::new(start, start + 5),
        )
    }

    #[test]
    fn test_builder() {
        let mut builder = RecordingBuilder::new(Strategy::Stack, 1_000);
        builder
            .interval_ms(100)
            .targets(vec![ThreadRef {
                id: ThreadId(1),
                name: "main".into(),
            }])
            .push_snapshot(snapshot(1, "main", 1_000))
            .complete_cycle()
            .push_snapshot(snapshot(1, "main", 1_100))
            .push_snapshot(snapshot(7, "late", 1_100))
            .complete_cycle();
        let rec = builder.build(1_200);

        assert_eq!(rec.sample_count(), 2);
        assert_eq!(rec.duration_ms(), 200);
        assert_eq!(rec.snapshots(ThreadId(1)).len(), 2);
        assert!(rec.snapshots(ThreadId(99)).is_empty());
        assert_eq!(rec.thread_name(ThreadId(7)).as_deref(), Some("late"));
        assert_eq!(rec.thread_refs().len(), 2);
        assert_eq!(rec.state(), RecordingState::Stopped);
        assert_eq!(rec.tool_info()["name"], "stackrec");
    }

    #[test]
    fn test_resource_after_without_before_is_ignored() {
        let sample = ResourceSample {
            thread_id: ThreadId(3),
            thread_name: "t".into(),
            cpu_time_nanos: Some(1),
            allocated_bytes: None,
        };
        let mut builder = RecordingBuilder::new(Strategy::Resource, 0);
        builder.resource_after(sample);
        assert!(builder.build(0).resources().is_empty());
    }
}
