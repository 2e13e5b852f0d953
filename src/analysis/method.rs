use super::window::{TimeWindow, is_selected};
use crate::model::{CallSite, ThreadId};
use crate::recording::Recording;
use std::collections::{BTreeMap, BTreeSet};

/// Accumulated hits and time of one call site (or one line of it)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameStat {
    pub hit_count: u64,
    /// Sum of the collection cost of the samples that hit
    pub real_time_ms: i64,
    /// Sum of the time each hitting sample stands for
    pub sample_time_ms: i64,
    pub threads: BTreeSet<ThreadId>,
    /// Denominators shared by every stat of one aggregation
    pub total_hits: u64,
    pub total_sample_time_ms: i64,
}

impl FrameStat {
    pub(crate) fn with_totals(total_hits: u64, total_sample_time_ms: i64) -> Self {
        FrameStat {
            total_hits,
            total_sample_time_ms,
            ..Default::default()
        }
    }

    pub(crate) fn hit(&mut self, thread: ThreadId, real_time_ms: i64, sample_time_ms: i64) {
        self.hit_count += 1;
        self.real_time_ms += real_time_ms;
        self.sample_time_ms += sample_time_ms;
        self.threads.insert(thread);
    }

    /// Share of `total_hits`, 0.0 when there is nothing to divide by
    pub fn hit_ratio(&self) -> f64 {
        if self.total_hits == 0 {
            0.0
        } else {
            self.hit_count as f64 / self.total_hits as f64
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodStat {
    pub call_site: CallSite,
    /// Every occurrence of the call site, whatever the line
    pub root: FrameStat,
    /// Per-line breakdown, hottest first
    pub lines: Vec<(Option<u32>, FrameStat)>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MethodReport {
    /// Hottest call site first
    pub methods: Vec<MethodStat>,
    pub total_hits: u64,
    pub total_sample_time_ms: i64,
}

/// Roll every frame of every selected sample up by call site.
///
/// Each occurrence counts, so a recursive method hits twice in one sample. A
/// sample stands for the time until the next sample of its thread (its own
/// duration for the last one).
pub fn aggregate_methods(
    rec: &Recording,
    threads: &[ThreadId],
    window: Option<&TimeWindow>,
) -> MethodReport {
    let mut sites: BTreeMap<CallSite, (FrameStat, BTreeMap<Option<u32>, FrameStat>)> =
        BTreeMap::new();
    let mut total_hits = 0u64;
    let mut total_sample_time_ms = 0i64;

    for &thread in threads {
        let list = rec.snapshots(thread);
        for (idx, snapshot) in list.iter().enumerate() {
            if !is_selected(window, snapshot) {
                continue;
            }
            let real_time = snapshot.real_time_ms();
            let sample_time = list
                .get(idx + 1)
                .map_or(real_time, |next| next.window.start_ms - snapshot.window.start_ms);

            for frame in snapshot.frames() {
                let (root, lines) = sites.entry(frame.call_site()).or_default();
                root.hit(thread, real_time, sample_time);
                lines
                    .entry(frame.line_number)
                    .or_default()
                    .hit(thread, real_time, sample_time);
                total_hits += 1;
                total_sample_time_ms += sample_time;
            }
        }
    }

    let with_totals = |mut stat: FrameStat| {
        stat.total_hits = total_hits;
        stat.total_sample_time_ms = total_sample_time_ms;
        stat
    };

    let mut methods: Vec<MethodStat> = sites
        .into_iter()
        .map(|(call_site, (root, lines))| {
            let mut lines: Vec<(Option<u32>, FrameStat)> = lines
                .into_iter()
                .map(|(line, stat)| (line, with_totals(stat)))
                .collect();
            // Stable sort keeps ascending line order among equal hits
            lines.sort_by(|a, b| b.1.hit_count.cmp(&a.1.hit_count));
            MethodStat {
                call_site,
                root: with_totals(root),
                lines,
            }
        })
        .collect();
    methods.sort_by(|a, b| b.root.hit_count.cmp(&a.root.hit_count));

    MethodReport {
        methods,
        total_hits,
        total_sample_time_ms,
    }
}
