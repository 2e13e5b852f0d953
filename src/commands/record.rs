use crate::error::{Error, Result};
use crate::model::ThreadSelector;
use crate::recording::Session;
use crate::sampler::{self, SamplingConfig, Strategy};
use crate::source::{ProcfsSource, ThreadSnapshotSource, sanitize_name};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Options of one `record` invocation
#[derive(Debug, Clone)]
pub struct RecordOptions {
    pub strategy: Strategy,
    pub threads: ThreadSelector,
    pub pid: u32,
    pub interval: Option<Duration>,
    pub duration: Option<Duration>,
    pub collect_timeout: Option<Duration>,
    pub output: Option<PathBuf>,
    pub force: bool,
}

impl RecordOptions {
    pub fn sampling_config(&self) -> SamplingConfig {
        let config = SamplingConfig::for_strategy(self.strategy)
            .with_duration(self.duration)
            .with_collect_timeout(self.collect_timeout);
        match self.interval {
            Some(interval) => config.with_interval(interval),
            None => config,
        }
    }
}

/// `stackrec.<process>.<yymmddHHMMSS>.db`
pub fn default_output_path(process_name: &str) -> PathBuf {
    let timestamp = chrono::Local::now().format("%y%m%d%H%M%S");
    PathBuf::from(format!(
        "stackrec.{}.{}.db",
        sanitize_name(process_name),
        timestamp
    ))
}

/// Run the record command
pub fn run(opts: &RecordOptions) -> Result<()> {
    let source = ProcfsSource::new(opts.pid)?;
    eprintln!("Attaching to {} (PID {})", source.name(), source.pid());

    let output_path = opts
        .output
        .clone()
        .unwrap_or_else(|| default_output_path(source.name()));
    check_output(&output_path, opts.force)?;
    eprintln!("Output: {}", output_path.display());

    let interrupted = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&interrupted);
    ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst))
        .map_err(|e| Error::Sampler(format!("Failed to set Ctrl-C handler: {}", e)))?;

    record(Arc::new(source), opts, &output_path, &interrupted)?;
    Ok(())
}

/// Sample `source` until `interrupted` is set or the duration limit passes,
/// then save to `output`
pub fn record(
    source: Arc<dyn ThreadSnapshotSource>,
    opts: &RecordOptions,
    output: &Path,
    interrupted: &AtomicBool,
) -> Result<PathBuf> {
    let config = opts.sampling_config();
    let handle = sampler::start(source, opts.strategy, &opts.threads, config.clone())?;

    match config.duration {
        Some(limit) => eprintln!(
            "Recording {} samples every {:?} for {:?} (Ctrl-C to stop early)...",
            opts.strategy, config.interval, limit
        ),
        None => eprintln!(
            "Recording {} samples every {:?} (Ctrl-C to stop)...",
            opts.strategy, config.interval
        ),
    }

    let started = Instant::now();
    let stop = handle.stop_flag();
    while !handle.is_finished() {
        if interrupted.load(Ordering::SeqCst) && !stop.swap(true, Ordering::AcqRel) {
            handle.wake();
        }
        std::thread::sleep(POLL_INTERVAL);
        eprint!("\rElapsed: {:.1}s", started.elapsed().as_secs_f64());
    }
    eprintln!();

    let recording = handle.wait()?;
    eprintln!(
        "Recording complete. Samples: {}, threads: {}, duration: {}ms",
        recording.sample_count(),
        recording.targets().len(),
        recording.duration_ms()
    );

    let mut session = Session::new();
    session.install(recording);
    let saved = session.save(output)?;
    println!("Saved {}", saved.display());
    Ok(saved)
}

fn check_output(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        return Err(Error::InvalidArgument(format!(
            "{} already exists (use --force to overwrite)",
            path.display()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(interval: Option<Duration>) -> RecordOptions {
        RecordOptions {
            strategy: Strategy::Resource,
            threads: ThreadSelector::All,
            pid: 1,
            interval,
            duration: Some(Duration::ZERO),
            collect_timeout: None,
            output: None,
            force: false,
        }
    }

    #[test]
    fn test_sampling_config_defaults() {
        let config = options(None).sampling_config();
        assert_eq!(config.interval, Duration::from_secs(1));
        assert_eq!(config.duration, None);

        let config = options(Some(Duration::from_millis(20))).sampling_config();
        assert_eq!(config.interval, Duration::from_millis(20));
    }

    #[test]
    fn test_default_output_path() {
        let path = default_output_path("my app");
        let name = path.to_string_lossy();
        assert!(name.starts_with("stackrec.my-app."));
        assert!(name.ends_with(".db"));
    }

    #[test]
    fn test_existing_output_needs_force() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("taken.db");
        std::fs::write(&path, b"x").unwrap();
        assert!(check_output(&path, false).is_err());
        assert!(check_output(&path, true).is_ok());
        assert!(check_output(&dir.path().join("free.db"), false).is_ok());
    }
}
