use super::window::TimePoint;
use crate::model::{SampleWindow, ThreadId, ThreadSnapshot};
use crate::recording::Recording;

/// The samples of one thread around a point in time
#[derive(Debug, Clone, PartialEq)]
pub struct StackDump<'a> {
    pub thread_id: ThreadId,
    pub thread_name: String,
    /// 1-based order of the first selected sample
    pub first_order: usize,
    pub samples: &'a [ThreadSnapshot],
}

impl StackDump<'_> {
    /// First selected start to last selected end
    pub fn period(&self) -> Option<SampleWindow> {
        let (first, last) = (self.samples.first()?, self.samples.last()?);
        Some(SampleWindow::new(first.window.start_ms, last.window.end_ms))
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Select the samples `point` designates on `thread`.
///
/// An instant picks the sample collected at that time, or, when it fell between
/// two collections, the one before and the one after.
pub fn stack_dump(rec: &Recording, thread: ThreadId, point: TimePoint) -> StackDump<'_> {
    let list = rec.snapshots(thread);
    let range = match point {
        TimePoint::Instant(at) => match list.iter().rposition(|s| s.window.start_ms <= at) {
            Some(idx) if list[idx].window.contains(at) => idx..idx + 1,
            Some(idx) => idx..(idx + 2).min(list.len()),
            None => 0..0,
        },
        TimePoint::Order(order) if (1..=list.len()).contains(&order) => order - 1..order,
        TimePoint::Order(_) => 0..0,
        TimePoint::Second(second) => {
            let first = list.iter().position(|s| s.window.within(second, second + 999));
            match first {
                Some(first) => {
                    let len = list[first..]
                        .iter()
                        .take_while(|s| s.window.within(second, second + 999))
                        .count();
                    first..first + len
                }
                None => 0..0,
            }
        }
    };

    StackDump {
        thread_id: thread,
        thread_name: rec.thread_name(thread).unwrap_or_default(),
        first_order: range.start + 1,
        samples: &list[range],
    }
}
