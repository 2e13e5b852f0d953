use super::collector::{self, Collector, SampleBatch};
use super::{SamplingConfig, Strategy, now_ms};
use crate::error::{Error, Result};
use crate::model::{ThreadId, ThreadRef, ThreadSelector};
use crate::recording::{Recording, RecordingBuilder};
use crate::source::{ThreadScope, ThreadSnapshotSource};
use log::{debug, info, warn};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// A running recording. Dropping it without `stop`/`wait` detaches the sampler.
pub struct RecordingHandle {
    stop: Arc<AtomicBool>,
    thread: JoinHandle<Recording>,
}

impl RecordingHandle {
    /// Ask the loop to stop and return the finished recording
    pub fn stop(self) -> Result<Recording> {
        self.stop.store(true, Ordering::Release);
        self.thread.thread().unpark();
        self.join()
    }

    /// Whether the loop ended by itself (duration reached)
    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Block until the loop ends by itself. Never returns for unbounded recordings
    /// unless another party sets the stop flag.
    pub fn wait(self) -> Result<Recording> {
        self.join()
    }

    /// Flag shared with the loop, for wiring into signal handlers
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// Wake the loop so it notices a stop flag set through [`stop_flag`](Self::stop_flag)
    pub fn wake(&self) {
        self.thread.thread().unpark();
    }

    fn join(self) -> Result<Recording> {
        self.thread
            .join()
            .map_err(|_| Error::Sampler("sampler thread panicked".to_string()))
    }
}

/// Start sampling `selector`'s threads on a background thread.
///
/// Fails before anything is spawned when no thread matches, or when the resource
/// strategy is requested but the target reports no usable counter.
pub fn start(
    source: Arc<dyn ThreadSnapshotSource>,
    strategy: Strategy,
    selector: &ThreadSelector,
    config: SamplingConfig,
) -> Result<RecordingHandle> {
    if config.interval.is_zero() {
        return Err(Error::InvalidArgument("interval must be positive".to_string()));
    }

    let threads = source.threads()?;
    let ids = selector.resolve(&threads);
    if ids.is_empty() {
        return Err(Error::NoTargetThreads(selector.to_string()));
    }
    let targets: Vec<ThreadRef> = threads.into_iter().filter(|t| ids.contains(&t.id)).collect();

    let start_ms = now_ms();
    let mut builder = RecordingBuilder::new(strategy, start_ms);
    builder
        .interval_ms(config.interval.as_millis() as u64)
        .limit_ms(config.duration.map_or(0, |d| d.as_millis() as u64))
        .targets(targets)
        .target_info(source.target_info());

    if strategy == Strategy::Resource {
        if !source.resource_support().any() {
            return Err(Error::ResourceCountersUnsupported);
        }
        let before = source.resource_usage(&ids)?;
        if before.is_empty() {
            return Err(Error::NoTargetThreads(selector.to_string()));
        }
        for sample in before {
            builder.resource_before(sample);
        }
    }

    // A wildcard keeps following threads created after the start
    let scope = if selector.is_all() {
        ThreadScope::All
    } else {
        ThreadScope::Ids(ids.clone())
    };

    let worker = CollectWorker::spawn(
        collector::for_strategy(strategy),
        Arc::clone(&source),
        scope,
    )?;

    let stop = Arc::new(AtomicBool::new(false));
    let sampler = SamplerLoop {
        source,
        strategy,
        ids,
        config,
        stop: Arc::clone(&stop),
    };

    let thread = thread::Builder::new()
        .name(format!("stackrec-{}", strategy))
        .spawn(move || sampler.run(worker, builder))?;

    info!("Started {} recording", strategy);
    Ok(RecordingHandle { stop, thread })
}

struct SamplerLoop {
    source: Arc<dyn ThreadSnapshotSource>,
    strategy: Strategy,
    ids: Vec<ThreadId>,
    config: SamplingConfig,
    stop: Arc<AtomicBool>,
}

impl SamplerLoop {
    fn run(self, mut worker: CollectWorker, mut builder: RecordingBuilder) -> Recording {
        let started = Instant::now();
        let mut completed = 0u64;

        while !self.stop.load(Ordering::Acquire) {
            let cycle_start = Instant::now();

            match worker.cycle(self.config.collect_timeout) {
                Ok(batch) => {
                    if let SampleBatch::Snapshots(snapshots) = batch {
                        debug!("Cycle {}: {} thread snapshots", completed + 1, snapshots.len());
                        for snapshot in snapshots {
                            builder.push_snapshot(snapshot);
                        }
                    }
                    builder.complete_cycle();
                    completed += 1;
                }
                Err(e) => warn!("Sampling cycle failed: {}", e),
            }

            if let Some(limit) = self.config.duration
                && started.elapsed() >= limit
            {
                debug!("Duration limit of {:?} reached", limit);
                break;
            }

            pause_until(cycle_start + self.config.interval, &self.stop);
        }

        let end_ms = now_ms();

        if self.strategy == Strategy::Resource {
            match self.source.resource_usage(&self.ids) {
                Ok(after) => {
                    for sample in after {
                        builder.resource_after(sample);
                    }
                }
                Err(e) => warn!("Closing resource measurement failed: {}", e),
            }
        }

        worker.shutdown();

        info!(
            "Stopped {} recording after {} samples",
            self.strategy, completed
        );
        builder.build(end_ms)
    }
}

/// Sleep until `deadline`, returning early once `stop` is set
fn pause_until(deadline: Instant, stop: &AtomicBool) {
    loop {
        if stop.load(Ordering::Acquire) {
            return;
        }
        let now = Instant::now();
        if now >= deadline {
            return;
        }
        thread::park_timeout(deadline - now);
    }
}

/// Runs collections on a helper thread so a hung source can be bounded
struct CollectWorker {
    requests: Sender<()>,
    results: Receiver<Result<SampleBatch>>,
    outstanding: bool,
    thread: JoinHandle<()>,
}

impl CollectWorker {
    fn spawn(
        mut collector: Box<dyn Collector>,
        source: Arc<dyn ThreadSnapshotSource>,
        scope: ThreadScope,
    ) -> std::io::Result<Self> {
        let (requests, request_rx) = mpsc::channel::<()>();
        let (result_tx, results) = mpsc::channel();

        let thread = thread::Builder::new()
            .name("stackrec-collect".to_string())
            .spawn(move || {
                while request_rx.recv().is_ok() {
                    let batch = collector.collect(source.as_ref(), &scope);
                    if result_tx.send(batch).is_err() {
                        break;
                    }
                }
            })?;

        Ok(CollectWorker {
            requests,
            results,
            outstanding: false,
            thread,
        })
    }

    fn cycle(&mut self, timeout: Option<Duration>) -> Result<SampleBatch> {
        if self.outstanding {
            match self.results.try_recv() {
                Ok(_) => {
                    debug!("Discarding batch that arrived after its timeout");
                    self.outstanding = false;
                }
                Err(TryRecvError::Empty) => {
                    return Err(Error::Sampler(
                        "previous collection is still running".to_string(),
                    ));
                }
                Err(TryRecvError::Disconnected) => return Err(worker_gone()),
            }
        }

        self.requests.send(()).map_err(|_| worker_gone())?;

        match timeout {
            None => self.results.recv().map_err(|_| worker_gone())?,
            Some(limit) => match self.results.recv_timeout(limit) {
                Ok(batch) => batch,
                Err(RecvTimeoutError::Timeout) => {
                    self.outstanding = true;
                    Err(Error::CollectTimeout(limit))
                }
                Err(RecvTimeoutError::Disconnected) => Err(worker_gone()),
            },
        }
    }

    fn shutdown(self) {
        let CollectWorker {
            requests,
            outstanding,
            thread,
            ..
        } = self;
        drop(requests);
        if outstanding {
            // Still blocked in the source; leave it to finish on its own
            warn!("Collector thread still busy at shutdown, detaching it");
            return;
        }
        if thread.join().is_err() {
            warn!("Collector thread panicked");
        }
    }
}

fn worker_gone() -> Error {
    Error::Sampler("collector thread exited".to_string())
}
