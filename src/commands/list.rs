use crate::error::Result;
use crate::storage::{RecordingSummary, read_summary};
use log::debug;
use std::path::Path;

/// Find all stackrec recordings in a directory, newest first
pub fn find_recordings(dir: &Path) -> Result<Vec<RecordingSummary>> {
    let mut recordings = Vec::new();

    let entries = std::fs::read_dir(dir)?;
    for entry in entries.flatten() {
        let path = entry.path();
        if !is_recording_name(&path) {
            continue;
        }
        match read_summary(&path) {
            Ok(summary) => recordings.push(summary),
            Err(e) => debug!("Skipping {}: {}", path.display(), e),
        }
    }

    recordings.sort_by(|a, b| b.start_time_ms.cmp(&a.start_time_ms));

    Ok(recordings)
}

/// Whether the file name follows the `stackrec.*.db` pattern
fn is_recording_name(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|name| name.starts_with("stackrec.") && name.ends_with(".db"))
}

fn format_duration(secs: f64) -> String {
    if secs >= 60.0 {
        format!("{:.0}m{:.0}s", (secs / 60.0).floor(), secs % 60.0)
    } else {
        format!("{:.1}s", secs)
    }
}

/// Run the list command
pub fn run(dir: Option<&Path>) -> Result<()> {
    let search_dir = dir.unwrap_or_else(|| Path::new("."));
    let recordings = find_recordings(search_dir)?;

    if recordings.is_empty() {
        println!("No stackrec recordings found in {}", search_dir.display());
        return Ok(());
    }

    println!(
        "{:<44} {:>12} {:>9} {:>10} {:>10} {:>8}",
        "FILE", "PROCESS", "STRATEGY", "DURATION", "SAMPLES", "THREADS"
    );
    println!("{}", "-".repeat(98));

    for recording in recordings {
        let filename = recording
            .path
            .file_name()
            .map(|n| n.to_string_lossy())
            .unwrap_or_default();

        println!(
            "{:<44} {:>12} {:>9} {:>10} {:>10} {:>8}",
            filename,
            recording.process_name,
            recording.strategy.as_str(),
            format_duration(recording.duration_secs()),
            recording.sample_count,
            recording.thread_count
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::{RecordingBuilder, Session};
    use crate::sampler::Strategy;

    fn save(dir: &Path, name: &str, start_ms: i64) {
        let mut session = Session::new();
        session.install(RecordingBuilder::new(Strategy::Stack, start_ms).build(start_ms + 1_000));
        session.save(&dir.join(name)).unwrap();
    }

    #[test]
    fn test_find_recordings_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        save(dir.path(), "stackrec.app.1.db", 1_000);
        save(dir.path(), "stackrec.app.2.db", 5_000);
        save(dir.path(), "other.db", 9_000);
        std::fs::write(dir.path().join("stackrec.junk.db"), b"junk").unwrap();

        let found = find_recordings(dir.path()).unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].start_time_ms, 5_000);
        assert_eq!(found[1].start_time_ms, 1_000);
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(12.34), "12.3s");
        assert_eq!(format_duration(125.0), "2m5s");
    }
}
