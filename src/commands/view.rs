use crate::analysis::{
    self, CallTree, FrameStat, MethodReport, StackDump, ThreadSearch, TimeWindow,
    window::format_timestamp,
};
use crate::cli::ViewQuery;
use crate::error::Result;
use crate::model::{ResourceDelta, ThreadId, ThreadSnapshot};
use crate::recording::{Recording, Session};
use comfy_table::Table;
use std::path::Path;

/// Run the view command: load `file` and answer one query about it
pub fn run(file: &Path, query: &ViewQuery) -> Result<()> {
    let mut session = Session::new();
    let rec = session.load(file)?;
    println!("{}", render(rec, query)?);
    Ok(())
}

/// Text answer to `query`
pub fn render(rec: &Recording, query: &ViewQuery) -> Result<String> {
    match query {
        ViewQuery::Info => Ok(render_info(rec)),
        ViewQuery::Method { threads, range } => {
            let ids = analysis::select_threads(rec, threads)?;
            let window = analysis::window_for(rec, &ids, range.as_deref())?;
            let report = analysis::aggregate_methods(rec, &ids, window.as_ref());
            Ok(render_methods(rec, window.as_ref(), &report))
        }
        ViewQuery::Thread { threads, range } => {
            let ids = analysis::select_threads(rec, threads)?;
            let window = analysis::window_for(rec, &ids, range.as_deref())?;
            let sections: Vec<String> = ids
                .iter()
                .map(|&id| {
                    let tree = analysis::build_call_tree(id, rec.snapshots(id), window.as_ref());
                    render_tree(rec, &tree)
                })
                .collect();
            Ok(sections.join("\n"))
        }
        ViewQuery::Stack { thread, point } => {
            let thread = ThreadId(*thread);
            let point = analysis::resolve_point(rec, thread, point)?;
            Ok(render_stack(rec, &analysis::stack_dump(rec, thread, point)))
        }
        ViewQuery::Search { threads, pattern } => {
            let ids = analysis::select_threads(rec, threads)?;
            let found = analysis::search(rec, &ids, pattern)?;
            Ok(render_search(rec, &found))
        }
    }
}

pub fn render_info(rec: &Recording) -> String {
    let mut out = vec![
        format!(
            "Record Time      : {} ~ {}",
            format_timestamp(rec.start_time_ms()),
            format_timestamp(rec.end_time_ms())
        ),
        format!("Duration         : {} ms", rec.duration_ms()),
        format!("Strategy         : {}", rec.strategy()),
        format!("Interval         : {} ms", rec.interval_ms()),
        format!("Sample Count     : {}", rec.sample_count()),
        format!(
            "Dump File Path   : {}",
            rec.source_path()
                .map_or_else(|| "N/A(in-memory)".to_string(), |p| p.display().to_string())
        ),
        format!("Tool             : {}", join_pairs(rec.tool_info().iter())),
        format!("Target           : {}", join_pairs(rec.target_info().iter())),
        String::new(),
        "Record Thread List".to_string(),
    ];

    let mut threads = Table::new();
    threads.set_header(vec!["TID", "NAME", "SAMPLES"]);
    for thread in rec.thread_refs() {
        threads.add_row(vec![
            thread.id.to_string(),
            thread.name.clone(),
            rec.snapshots(thread.id).len().to_string(),
        ]);
    }
    out.push(threads.to_string());

    if !rec.resources().is_empty() {
        out.push(String::new());
        out.push("Resource Usage".to_string());
        let mut usage = Table::new();
        usage.set_header(vec!["TID", "NAME", "CPU TIME", "ALLOCATED"]);
        for (id, resource) in rec.resources() {
            let (cpu, alloc) = match resource.delta() {
                ResourceDelta::Used {
                    cpu_time_nanos,
                    allocated_bytes,
                } => (
                    cpu_time_nanos.map_or_else(|| "-".to_string(), |ns| {
                        format!("{:.1} ms", ns as f64 / 1_000_000.0)
                    }),
                    allocated_bytes.map_or_else(|| "-".to_string(), format_bytes),
                ),
                ResourceDelta::ThreadChanged => {
                    ("changed thread".to_string(), "changed thread".to_string())
                }
                ResourceDelta::Incomplete => ("-".to_string(), "-".to_string()),
            };
            usage.add_row(vec![id.to_string(), resource.thread_name.clone(), cpu, alloc]);
        }
        out.push(usage.to_string());
    }

    out.join("\n")
}

pub fn render_methods(rec: &Recording, window: Option<&TimeWindow>, report: &MethodReport) -> String {
    let mut out = vec![period_line(rec, window), String::new()];
    if report.methods.is_empty() {
        out.push("No samples in range".to_string());
        return out.join("\n");
    }

    for method in &report.methods {
        out.push(format!(
            "{} [{}] {}",
            stat_prefix(&method.root),
            method.root.threads.len(),
            method.call_site
        ));
        if method.lines.len() > 1 {
            for (line, stat) in &method.lines {
                let line = line.map_or_else(|| "?".to_string(), |l| l.to_string());
                out.push(format!(
                    "        {} . line {} (ThreadList={})",
                    stat_prefix(stat),
                    line,
                    join_ids(&stat.threads)
                ));
            }
        }
    }
    out.join("\n")
}

pub fn render_tree(rec: &Recording, tree: &CallTree) -> String {
    let name = rec.thread_name(tree.thread_id).unwrap_or_default();
    let mut out = vec![format!(
        "@ \"{}\" Id={} samples={}",
        name, tree.thread_id, tree.sample_count
    )];
    if tree.is_empty() {
        out.push("  (no samples)".to_string());
        return out.join("\n");
    }

    let width = tree.max_depth().to_string().len();
    for id in tree.walk() {
        let node = tree.node(id);
        let frame = node
            .frame
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_default();
        out.push(format!(
            "{} [{:>width$}] {}{}",
            stat_prefix(&node.stats),
            node.depth,
            "  ".repeat(node.depth.max(0) as usize),
            frame
        ));
    }
    out.join("\n")
}

pub fn render_stack(rec: &Recording, dump: &StackDump<'_>) -> String {
    let mut out = vec![format!("@ \"{}\" Id={}", dump.thread_name, dump.thread_id)];
    let Some(period) = dump.period() else {
        out.push("No samples at this time".to_string());
        return out.join("\n");
    };
    out.push(format!("Period  : {}", format_period(rec, period.start_ms, period.end_ms)));

    let (first, last) = (&dump.samples[0], &dump.samples[dump.samples.len() - 1]);
    if dump.samples.len() == 1 {
        out.push(format!("State   : {}", first.dump.state));
        out.push(format!("Blocked : {}", counter(first.dump.blocked_count, first.dump.blocked_time_ms)));
        out.push(format!("Waited  : {}", counter(first.dump.waited_count, first.dump.waited_time_ms)));
        if let Some(lock) = &first.dump.lock_name {
            out.push(format!("Lock    : {}", lock));
        }
    } else {
        out.push(format!("Count   : {}", dump.samples.len()));
        out.push(format!(
            "Blocked : {} ~ {}",
            counter(first.dump.blocked_count, first.dump.blocked_time_ms),
            counter(last.dump.blocked_count, last.dump.blocked_time_ms)
        ));
        out.push(format!(
            "Waited  : {} ~ {}",
            counter(first.dump.waited_count, first.dump.waited_time_ms),
            counter(last.dump.waited_count, last.dump.waited_time_ms)
        ));
    }

    out.push("Traces".to_string());
    for (offset, sample) in dump.samples.iter().enumerate() {
        if dump.samples.len() > 1 {
            out.push(format!(
                "  [{}] {} {}",
                dump.first_order + offset,
                format_period(rec, sample.window.start_ms, sample.window.end_ms),
                sample.dump.state
            ));
        }
        out.extend(trace_lines(sample));
    }
    out.join("\n")
}

pub fn render_search(rec: &Recording, found: &[ThreadSearch]) -> String {
    let mut out = Vec::new();
    for thread in found.iter().filter(|t| !t.hits.is_empty()) {
        out.push(format!("@ \"{}\" Id={}", thread.thread_name, thread.thread_id));
        for hit in &thread.hits {
            out.push(format!("  Found Stack Frame : {}", hit.frame_text));
            out.push(format!(
                "    Period  : {}",
                format_period(rec, hit.span.start_ms, hit.span.end_ms)
            ));
            out.push(format!(
                "    Count   : {}/{} ({:.2}%)",
                hit.hit_count,
                thread.sample_count,
                hit.ratio * 100.0
            ));
            out.push(format!("    Indexes : {} ~ {}", hit.first_order, hit.last_order));
        }
    }
    if out.is_empty() {
        out.push("No matching stack frame".to_string());
    }
    out.join("\n")
}

/// Innermost frame first, like a thread dump
fn trace_lines(sample: &ThreadSnapshot) -> Vec<String> {
    sample
        .frames()
        .iter()
        .rev()
        .map(|frame| format!("\tat {}", frame))
        .collect()
}

fn stat_prefix(stat: &FrameStat) -> String {
    format!(
        "[{:6.2}%]({}/{})({}/{}ms)",
        stat.hit_ratio() * 100.0,
        stat.hit_count,
        stat.total_hits,
        stat.sample_time_ms,
        stat.total_sample_time_ms
    )
}

fn period_line(rec: &Recording, window: Option<&TimeWindow>) -> String {
    let (from, to) = window.map_or((rec.start_time_ms(), rec.end_time_ms()), |w| (w.from_ms, w.to_ms));
    format!("Period : {}", format_period(rec, from, to))
}

/// Absolute bounds plus their offsets from the recording start
fn format_period(rec: &Recording, from_ms: i64, to_ms: i64) -> String {
    format!(
        "{} ~ {} ({}ms ~ {}ms)",
        format_timestamp(from_ms),
        format_timestamp(to_ms),
        from_ms - rec.start_time_ms(),
        to_ms - rec.start_time_ms()
    )
}

fn counter(count: u64, time_ms: Option<u64>) -> String {
    match time_ms {
        Some(ms) => format!("{}({} ms)", count, ms),
        None => format!("{}(-)", count),
    }
}

fn join_pairs<'a>(pairs: impl Iterator<Item = (&'a String, &'a String)>) -> String {
    pairs
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(", ")
}

fn join_ids<'a>(ids: impl IntoIterator<Item = &'a ThreadId>) -> String {
    ids.into_iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

fn format_bytes(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;
    const GB: f64 = MB * 1024.0;
    let b = bytes as f64;
    if b >= GB {
        format!("{:.1}GB", b / GB)
    } else if b >= MB {
        format!("{:.1}MB", b / MB)
    } else if b >= KB {
        format!("{:.1}KB", b / KB)
    } else {
        format!("{}B", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        ResourceSample, SampleWindow, StackFrame, ThreadDump, ThreadRef, ThreadSelector,
        ThreadState,
    };
    use crate::recording::RecordingBuilder;
    use crate::sampler::Strategy;

    fn frame(method: &str, line: u32) -> StackFrame {
        StackFrame::new("A", method).with_location("A.java", line)
    }

    fn recording() -> Recording {
        let mut builder = RecordingBuilder::new(Strategy::Stack, 0);
        builder.interval_ms(100).targets(vec![ThreadRef {
            id: ThreadId(1),
            name: "main".into(),
        }]);
        for (i, leaf) in [("work", 5), ("work", 6), ("idle", 9)].iter().enumerate() {
            let start = i as i64 * 100;
            builder
                .push_snapshot(ThreadSnapshot::new(
                    ThreadDump::new(ThreadId(1), "main", ThreadState::Runnable)
                        .with_frames(vec![frame("run", 1), frame(leaf.0, leaf.1)]),
                    SampleWindow::new(start, start + 10),
                ))
                .complete_cycle();
        }
        builder.build(300)
    }

    #[test]
    fn test_method_view_shows_line_breakdown() {
        let rec = recording();
        let query = ViewQuery::Method {
            threads: ThreadSelector::All,
            range: None,
        };
        let text = render(&rec, &query).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert!(lines[2].ends_with("[1] A.run()"));
        assert!(lines[2].contains("(3/6)"));
        assert!(lines[3].ends_with("[1] A.work()"));
        assert!(lines[4].contains("line 5 (ThreadList=1)"));
        assert!(lines[5].contains("line 6"));
        assert!(lines[6].ends_with("A.idle()"));
    }

    #[test]
    fn test_thread_view_indents_by_depth() {
        let rec = recording();
        let query = ViewQuery::Thread {
            threads: "\"ma*\"".parse().unwrap(),
            range: Some("2~3".to_string()),
        };
        let text = render(&rec, &query).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "@ \"main\" Id=1 samples=2");
        assert!(lines[1].ends_with("[0] A.run(A.java:1)"));
        assert!(lines[2].ends_with("[1]   A.work(A.java:6)"));
    }

    #[test]
    fn test_stack_view_prints_innermost_first() {
        let rec = recording();
        let query = ViewQuery::Stack {
            thread: 1,
            point: "3".to_string(),
        };
        let text = render(&rec, &query).unwrap();
        assert!(text.contains("State   : RUNNABLE"));
        let traces: Vec<&str> = text.lines().filter(|l| l.starts_with("\tat ")).collect();
        assert_eq!(traces, ["\tat A.idle(A.java:9)", "\tat A.run(A.java:1)"]);
    }

    #[test]
    fn test_search_view() {
        let rec = recording();
        let query = ViewQuery::Search {
            threads: ThreadSelector::All,
            pattern: "A.wor*".to_string(),
        };
        let text = render(&rec, &query).unwrap();
        assert_eq!(text.matches("Found Stack Frame").count(), 2);
        assert!(text.contains("Indexes : 2 ~ 2"));

        let query = ViewQuery::Search {
            threads: ThreadSelector::All,
            pattern: "*.nope".to_string(),
        };
        assert_eq!(render(&rec, &query).unwrap(), "No matching stack frame");
    }

    #[test]
    fn test_info_lists_threads_and_resources() {
        let mut builder = RecordingBuilder::new(Strategy::Resource, 0);
        let sample = |cpu| ResourceSample {
            thread_id: ThreadId(4),
            thread_name: "pool-1".into(),
            cpu_time_nanos: Some(cpu),
            allocated_bytes: None,
        };
        builder
            .interval_ms(1000)
            .targets(vec![ThreadRef {
                id: ThreadId(4),
                name: "pool-1".into(),
            }])
            .resource_before(sample(1_000_000))
            .resource_after(sample(6_000_000));
        let rec = builder.build(2_000);

        let text = render_info(&rec);
        assert!(text.contains("N/A(in-memory)"));
        assert!(text.contains("pool-1"));
        assert!(text.contains("5.0 ms"));
    }

    #[test]
    fn test_bad_queries_are_errors() {
        let rec = recording();
        let query = ViewQuery::Method {
            threads: ThreadSelector::ids([9]),
            range: None,
        };
        assert!(render(&rec, &query).is_err());

        let query = ViewQuery::Search {
            threads: ThreadSelector::All,
            pattern: "ab".to_string(),
        };
        assert!(render(&rec, &query).is_err());
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512B");
        assert_eq!(format_bytes(2048), "2.0KB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.0MB");
    }
}
