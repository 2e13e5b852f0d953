use super::{ThreadScope, ThreadSnapshotSource};
use crate::error::{Error, Result};
use crate::model::{
    ResourceSample, ResourceSupport, StackFrame, ThreadDump, ThreadId, ThreadRef, ThreadState,
};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// A source that replays scripted thread dumps.
///
/// Each `snapshot` call hands out the next scripted dump of every thread in scope;
/// once a thread's script is exhausted its last dump repeats.
pub struct MemorySource {
    threads: Vec<ThreadRef>,
    support: ResourceSupport,
    target_info: BTreeMap<String, String>,
    state: Mutex<ScriptState>,
}

#[derive(Default)]
struct ScriptState {
    scripts: BTreeMap<ThreadId, Script>,
    counters: BTreeMap<ThreadId, (Option<u64>, Option<u64>)>,
    pending_failures: usize,
    delay: Option<Duration>,
    snapshot_calls: usize,
}

#[derive(Default)]
struct Script {
    dumps: Vec<ThreadDump>,
    next: usize,
}

impl Script {
    fn advance(&mut self) -> Option<ThreadDump> {
        let idx = self.next.min(self.dumps.len().checked_sub(1)?);
        self.next += 1;
        self.dumps.get(idx).cloned()
    }
}

impl Default for MemorySource {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySource {
    pub fn new() -> Self {
        MemorySource {
            threads: Vec::new(),
            support: ResourceSupport::default(),
            target_info: BTreeMap::new(),
            state: Mutex::new(ScriptState::default()),
        }
    }

    pub fn with_thread(mut self, id: u64, name: impl Into<String>) -> Self {
        self.threads.push(ThreadRef {
            id: ThreadId(id),
            name: name.into(),
        });
        self
    }

    /// Script one RUNNABLE dump per entry of `stacks` for thread `id`
    pub fn with_stacks(self, id: u64, stacks: Vec<Vec<StackFrame>>) -> Self {
        let name = self
            .threads
            .iter()
            .find(|t| t.id == ThreadId(id))
            .map(|t| t.name.clone())
            .unwrap_or_default();
        for frames in stacks {
            self.push_dump(
                ThreadDump::new(ThreadId(id), name.clone(), ThreadState::Runnable).with_frames(frames),
            );
        }
        self
    }

    pub fn with_resource_support(mut self, support: ResourceSupport) -> Self {
        self.support = support;
        self
    }

    pub fn with_target_info(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.target_info.insert(key.into(), value.into());
        self
    }

    pub fn push_dump(&self, dump: ThreadDump) {
        self.lock()
            .scripts
            .entry(dump.thread_id)
            .or_default()
            .dumps
            .push(dump);
    }

    /// Set the cumulative counters reported for thread `id`
    pub fn set_counters(&self, id: u64, cpu_time_nanos: Option<u64>, allocated_bytes: Option<u64>) {
        self.lock()
            .counters
            .insert(ThreadId(id), (cpu_time_nanos, allocated_bytes));
    }

    /// Make the next `count` snapshot calls fail with a transport error
    pub fn fail_next(&self, count: usize) {
        self.lock().pending_failures = count;
    }

    /// Make every snapshot call block for `delay` before answering
    pub fn set_delay(&self, delay: Option<Duration>) {
        self.lock().delay = delay;
    }

    pub fn snapshot_calls(&self) -> usize {
        self.lock().snapshot_calls
    }

    fn lock(&self) -> MutexGuard<'_, ScriptState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ThreadSnapshotSource for MemorySource {
    fn threads(&self) -> Result<Vec<ThreadRef>> {
        Ok(self.threads.clone())
    }

    fn snapshot(&self, scope: &ThreadScope) -> Result<Vec<ThreadDump>> {
        let delay = {
            let mut state = self.lock();
            state.snapshot_calls += 1;
            if state.pending_failures > 0 {
                state.pending_failures -= 1;
                return Err(Error::Transport("scripted failure".to_string()));
            }
            state.delay
        };
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }

        let mut state = self.lock();
        Ok(self
            .threads
            .iter()
            .filter(|t| scope.includes(t.id))
            .map(|t| {
                state
                    .scripts
                    .get_mut(&t.id)
                    .and_then(Script::advance)
                    .unwrap_or_else(|| ThreadDump::new(t.id, t.name.clone(), ThreadState::Runnable))
            })
            .collect())
    }

    fn resource_support(&self) -> ResourceSupport {
        self.support
    }

    fn resource_usage(&self, ids: &[ThreadId]) -> Result<Vec<ResourceSample>> {
        let state = self.lock();
        Ok(self
            .threads
            .iter()
            .filter(|t| ids.contains(&t.id))
            .map(|t| {
                let (cpu, alloc) = state.counters.get(&t.id).copied().unwrap_or((None, None));
                ResourceSample {
                    thread_id: t.id,
                    thread_name: t.name.clone(),
                    cpu_time_nanos: cpu.filter(|_| self.support.cpu_time),
                    allocated_bytes: alloc.filter(|_| self.support.allocated_bytes),
                }
            })
            .collect())
    }

    fn target_info(&self) -> BTreeMap<String, String> {
        self.target_info.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(method: &str) -> StackFrame {
        StackFrame::new("A", method)
    }

    #[test]
    fn test_script_advances_then_repeats() {
        let source = MemorySource::new()
            .with_thread(1, "main")
            .with_stacks(1, vec![vec![frame("run")], vec![frame("idle")]]);

        let scope = ThreadScope::All;
        let methods: Vec<String> = (0..3)
            .map(|_| source.snapshot(&scope).unwrap()[0].frames[0].method_name.clone())
            .collect();
        assert_eq!(methods, ["run", "idle", "idle"]);
        assert_eq!(source.snapshot_calls(), 3);
    }

    #[test]
    fn test_scope_filters_threads() {
        let source = MemorySource::new().with_thread(1, "main").with_thread(2, "worker");
        let dumps = source.snapshot(&ThreadScope::Ids(vec![ThreadId(2)])).unwrap();
        assert_eq!(dumps.len(), 1);
        assert_eq!(dumps[0].thread_name, "worker");
    }

    #[test]
    fn test_scripted_failures() {
        let source = MemorySource::new().with_thread(1, "main");
        source.fail_next(1);
        assert!(matches!(
            source.snapshot(&ThreadScope::All),
            Err(Error::Transport(_))
        ));
        assert!(source.snapshot(&ThreadScope::All).is_ok());
    }

    #[test]
    fn test_counters_respect_support() {
        let source = MemorySource::new()
            .with_thread(1, "main")
            .with_resource_support(ResourceSupport {
                cpu_time: true,
                allocated_bytes: false,
            });
        source.set_counters(1, Some(10), Some(20));
        let usage = source.resource_usage(&[ThreadId(1)]).unwrap();
        assert_eq!(usage[0].cpu_time_nanos, Some(10));
        assert_eq!(usage[0].allocated_bytes, None);
    }
}
