use crate::error::{Error, Result};
use crate::model::pattern::{literal_len, wildcard_match};
use crate::model::{SampleWindow, ThreadId};
use crate::recording::Recording;

/// Shortest pattern accepted, counting only non-wildcard characters
pub const MIN_PATTERN_LEN: usize = 3;

/// A run of consecutive samples sharing one matching frame
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    /// Display text of the matched frame
    pub frame_text: String,
    /// 1-based, inclusive
    pub first_order: usize,
    pub last_order: usize,
    /// Matching occurrences, a recursive frame counts once per occurrence
    pub hit_count: u64,
    /// First matched sample's start to last matched sample's end
    pub span: SampleWindow,
    /// `hit_count` over the thread's sample count
    pub ratio: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ThreadSearch {
    pub thread_id: ThreadId,
    pub thread_name: String,
    pub sample_count: usize,
    pub hits: Vec<SearchHit>,
}

/// Find the frames whose `Class.method` matches `pattern` and merge them into
/// runs per thread. Every requested thread is reported, matched or not.
pub fn search(rec: &Recording, threads: &[ThreadId], pattern: &str) -> Result<Vec<ThreadSearch>> {
    if literal_len(pattern) < MIN_PATTERN_LEN {
        return Err(Error::PatternTooShort {
            pattern: pattern.to_string(),
            min: MIN_PATTERN_LEN,
        });
    }

    Ok(threads
        .iter()
        .map(|&thread| search_thread(rec, thread, pattern))
        .collect())
}

fn search_thread(rec: &Recording, thread: ThreadId, pattern: &str) -> ThreadSearch {
    let list = rec.snapshots(thread);
    let mut hits: Vec<SearchHit> = Vec::new();

    for (idx, snapshot) in list.iter().enumerate() {
        let order = idx + 1;
        for frame in snapshot.frames() {
            if !wildcard_match(&frame.call_site_name(), pattern) {
                continue;
            }
            let text = frame.to_string();
            let open = hits
                .iter_mut()
                .rev()
                .find(|hit| hit.frame_text == text && hit.last_order + 1 >= order);
            match open {
                Some(hit) => {
                    hit.hit_count += 1;
                    hit.last_order = order;
                    hit.span.end_ms = snapshot.window.end_ms;
                }
                None => hits.push(SearchHit {
                    frame_text: text,
                    first_order: order,
                    last_order: order,
                    hit_count: 1,
                    span: snapshot.window,
                    ratio: 0.0,
                }),
            }
        }
    }

    for hit in &mut hits {
        hit.ratio = hit.hit_count as f64 / list.len() as f64;
    }

    ThreadSearch {
        thread_id: thread,
        thread_name: rec.thread_name(thread).unwrap_or_default(),
        sample_count: list.len(),
        hits,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{StackFrame, ThreadDump, ThreadSnapshot, ThreadState};
    use crate::recording::RecordingBuilder;
    use crate::sampler::Strategy;

    fn recording(stacks: &[&[&str]]) -> Recording {
        let mut builder = RecordingBuilder::new(Strategy::Stack, 0);
        for (i, methods) in stacks.iter().enumerate() {
            let start = i as i64 * 100;
            let frames = methods
                .iter()
                .map(|m| StackFrame::new("app.Worker", *m).with_location("Worker.java", 10))
                .collect();
            builder
                .push_snapshot(ThreadSnapshot::new(
                    ThreadDump::new(ThreadId(1), "main", ThreadState::Runnable).with_frames(frames),
                    SampleWindow::new(start, start + 5),
                ))
                .complete_cycle();
        }
        builder.build(stacks.len() as i64 * 100)
    }

    #[test]
    fn test_short_pattern_rejected() {
        let rec = recording(&[&["run"]]);
        assert!(matches!(
            search(&rec, &[ThreadId(1)], "*a*"),
            Err(Error::PatternTooShort { min: 3, .. })
        ));
    }

    #[test]
    fn test_no_match_yields_empty_runs() {
        let rec = recording(&[&["run"], &["run"]]);
        let result = search(&rec, &[ThreadId(1)], "*.nothing").unwrap();
        assert_eq!(result.len(), 1);
        assert!(result[0].hits.is_empty());
    }

    #[test]
    fn test_every_sample_matching_is_one_run() {
        let rec = recording(&[&["run", "work"], &["run"], &["run", "idle"]]);
        let result = search(&rec, &[ThreadId(1)], "app.Worker.run").unwrap();
        let hits = &result[0].hits;
        assert_eq!(hits.len(), 1);
        assert_eq!((hits[0].first_order, hits[0].last_order), (1, 3));
        assert_eq!(hits[0].hit_count, 3);
        assert_eq!(hits[0].span, SampleWindow::new(0, 205));
        assert_eq!(hits[0].ratio, 1.0);
        assert_eq!(hits[0].frame_text, "app.Worker.run(Worker.java:10)");
    }

    #[test]
    fn test_gap_splits_runs() {
        let rec = recording(&[&["work"], &["idle"], &["work"], &["work"]]);
        let result = search(&rec, &[ThreadId(1)], "*.wo?k").unwrap();
        let runs: Vec<_> = result[0]
            .hits
            .iter()
            .map(|h| (h.first_order, h.last_order, h.hit_count))
            .collect();
        assert_eq!(runs, [(1, 1, 1), (3, 4, 2)]);
        assert_eq!(result[0].hits[1].ratio, 0.5);
    }

    #[test]
    fn test_recursion_counts_within_run() {
        let rec = recording(&[&["walk", "walk"]]);
        let result = search(&rec, &[ThreadId(1)], "*walk").unwrap();
        assert_eq!(result[0].hits.len(), 1);
        assert_eq!(result[0].hits[0].hit_count, 2);
    }
}
