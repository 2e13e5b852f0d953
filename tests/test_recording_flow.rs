use stackrec::analysis::{aggregate_methods, build_call_tree, resolve_range, search};
use stackrec::commands::record::{RecordOptions, record};
use stackrec::commands::view::render;
use stackrec::cli::ViewQuery;
use stackrec::model::{StackFrame, ThreadId, ThreadSelector};
use stackrec::recording::Session;
use stackrec::sampler::{self, SamplingConfig, Strategy};
use stackrec::source::MemorySource;
use stackrec::Error;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::{Duration, Instant};

fn frame(method: &str, line: u32) -> StackFrame {
    StackFrame::new("A", method).with_location("A.java", line)
}

/// `main` runs A.run -> A.work three times, then A.run -> A.idle
fn source() -> MemorySource {
    let work = vec![frame("run", 10), frame("work", 20)];
    let idle = vec![frame("run", 10), frame("idle", 30)];
    MemorySource::new()
        .with_thread(1, "main")
        .with_thread(2, "gc")
        .with_stacks(
            1,
            vec![work.clone(), work.clone(), work, idle.clone(), idle],
        )
        .with_stacks(2, vec![vec![frame("collect", 1)]])
        .with_target_info("process_name", "demo")
}

#[test]
fn test_five_sample_scenario() {
    let handle = sampler::start(
        Arc::new(source()),
        Strategy::Stack,
        &"\"main\"".parse().unwrap(),
        SamplingConfig::for_strategy(Strategy::Stack)
            .with_interval(Duration::from_millis(100))
            .with_duration(Some(Duration::from_millis(350))),
    )
    .unwrap();

    // cycles start at 0, 100, ... 400ms; the limit is checked after each
    // collection, so the 400ms cycle is the fifth one counted
    let rec = handle.wait().unwrap();
    assert_eq!(rec.sample_count(), 5);

    let main = ThreadId(1);
    assert_eq!(rec.snapshots(main).len(), 5);
    assert!(rec.snapshots(ThreadId(2)).is_empty());

    let report = aggregate_methods(&rec, &[main], None);
    let hits: Vec<(String, u64)> = report
        .methods
        .iter()
        .map(|m| (m.call_site.method_name.clone(), m.root.hit_count))
        .collect();
    assert_eq!(
        hits,
        [
            ("run".to_string(), 5),
            ("work".to_string(), 3),
            ("idle".to_string(), 2)
        ]
    );

    let tree = build_call_tree(main, rec.snapshots(main), None);
    let root_children = tree.children_sorted(stackrec::analysis::tree::ROOT);
    assert_eq!(root_children.len(), 1);
    let run = tree.node(root_children[0]);
    assert_eq!(run.stats.hit_count, 5);
    let below: Vec<(String, u64)> = tree
        .children_sorted(root_children[0])
        .into_iter()
        .map(|id| {
            let node = tree.node(id);
            (node.frame.as_ref().unwrap().method_name.clone(), node.stats.hit_count)
        })
        .collect();
    assert_eq!(below, [("work".to_string(), 3), ("idle".to_string(), 2)]);
}

#[test]
fn test_cycle_count_tracks_elapsed_time() {
    let interval = Duration::from_millis(25);
    let started = Instant::now();
    let handle = sampler::start(
        Arc::new(source()),
        Strategy::Stack,
        &ThreadSelector::All,
        SamplingConfig::for_strategy(Strategy::Stack)
            .with_interval(interval)
            .with_duration(Some(Duration::from_millis(250))),
    )
    .unwrap();
    let rec = handle.wait().unwrap();
    let elapsed = started.elapsed();

    let expected = elapsed.as_millis() as u64 / interval.as_millis() as u64;
    assert!(rec.sample_count() >= 5, "only {} samples", rec.sample_count());
    assert!(rec.sample_count() <= expected + 1);
    for list in rec.all_snapshots().values() {
        for pair in list.windows(2) {
            assert!(pair[0].window.end_ms <= pair[1].window.start_ms);
        }
    }
}

#[test]
fn test_save_load_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("stackrec.demo.db");

    let handle = sampler::start(
        Arc::new(source()),
        Strategy::Stack,
        &ThreadSelector::All,
        SamplingConfig::for_strategy(Strategy::Stack)
            .with_interval(Duration::from_millis(10))
            .with_duration(Some(Duration::from_millis(60))),
    )
    .unwrap();
    let original = handle.wait().unwrap();

    let mut writer = Session::new();
    writer.install(original.clone());
    writer.save(&path).unwrap();
    assert!(matches!(writer.save(&path), Err(Error::AlreadyPersisted(_))));

    let mut reader = Session::new();
    let loaded = reader.load(&path).unwrap();
    assert_eq!(loaded.sample_count(), original.sample_count());
    assert_eq!(loaded.start_time_ms(), original.start_time_ms());
    assert_eq!(loaded.end_time_ms(), original.end_time_ms());
    for (id, list) in original.all_snapshots() {
        assert_eq!(loaded.snapshots(*id), list.as_slice());
    }
    assert_eq!(loaded.target_info().get("process_name").unwrap(), "demo");
}

#[test]
fn test_record_command_then_view() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("stackrec.demo.1.db");
    let opts = RecordOptions {
        strategy: Strategy::Stack,
        threads: "1".parse().unwrap(),
        pid: 0,
        interval: Some(Duration::from_millis(10)),
        duration: Some(Duration::from_millis(80)),
        collect_timeout: Some(Duration::from_secs(1)),
        output: Some(output.clone()),
        force: false,
    };
    let saved = record(Arc::new(source()), &opts, &output, &AtomicBool::new(false)).unwrap();
    assert!(saved.is_file());

    let mut session = Session::new();
    let rec = session.load(&saved).unwrap();
    let info = render(rec, &ViewQuery::Info).unwrap();
    assert!(info.contains(&saved.display().to_string()));
    assert!(info.contains("main"));

    let stack = render(
        rec,
        &ViewQuery::Stack {
            thread: 1,
            point: "1".to_string(),
        },
    )
    .unwrap();
    assert!(stack.contains("\tat A.work(A.java:20)"));
}

#[test]
fn test_interrupted_record_stops_early() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("stackrec.demo.2.db");
    let opts = RecordOptions {
        strategy: Strategy::Stack,
        threads: ThreadSelector::All,
        pid: 0,
        interval: Some(Duration::from_secs(30)),
        duration: None,
        collect_timeout: None,
        output: None,
        force: false,
    };

    let started = Instant::now();
    let saved = record(Arc::new(source()), &opts, &output, &AtomicBool::new(true)).unwrap();
    assert!(started.elapsed() < Duration::from_secs(5));

    let mut session = Session::new();
    assert!(session.load(&saved).unwrap().sample_count() <= 1);
}

#[test]
fn test_order_range_and_search_over_recording() {
    let handle = sampler::start(
        Arc::new(source()),
        Strategy::Stack,
        &ThreadSelector::ids([1]),
        SamplingConfig::for_strategy(Strategy::Stack)
            .with_interval(Duration::from_millis(10))
            .with_duration(Some(Duration::from_millis(100))),
    )
    .unwrap();
    let rec = handle.wait().unwrap();
    let main = ThreadId(1);
    let list = rec.snapshots(main);
    assert!(list.len() >= 5);

    for k in 1..=list.len() {
        let window = resolve_range(&rec, Some(main), &format!("{k}~{k}")).unwrap();
        assert_eq!(window.from_ms, list[k - 1].window.start_ms);
        assert_eq!(window.to_ms, list[k - 1].window.end_ms);
    }

    // A.run is on every stack: one run over the whole thread
    let found = search(&rec, &[main], "A.run").unwrap();
    assert_eq!(found[0].hits.len(), 1);
    let hit = &found[0].hits[0];
    assert_eq!((hit.first_order, hit.last_order), (1, list.len()));
    assert_eq!(hit.ratio, 1.0);

    assert!(search(&rec, &[main], "B.none*").unwrap()[0].hits.is_empty());

    // every frame is counted once per occurrence
    let report = aggregate_methods(&rec, &[main], None);
    let depth_sum: usize = list.iter().map(|s| s.frames().len()).sum();
    let hit_sum: u64 = report.methods.iter().map(|m| m.root.hit_count).sum();
    assert_eq!(hit_sum, depth_sum as u64);

    let tree = build_call_tree(main, list, None);
    let root_sum: u64 = tree
        .root()
        .children
        .iter()
        .map(|&id| tree.node(id).stats.hit_count)
        .sum();
    assert_eq!(root_sum, list.len() as u64);
}
