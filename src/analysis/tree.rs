use super::method::FrameStat;
use super::window::{TimeWindow, is_selected};
use crate::model::{FrameKey, StackFrame, ThreadId, ThreadSnapshot};

/// Index of a node in its [`CallTree`]
pub type NodeId = usize;

pub const ROOT: NodeId = 0;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallTreeNode {
    /// `None` only for the synthetic root
    pub frame: Option<StackFrame>,
    pub stats: FrameStat,
    pub children: Vec<NodeId>,
    pub parent: Option<NodeId>,
    /// Root is -1, its children 0
    pub depth: i32,
}

impl CallTreeNode {
    pub fn key(&self) -> Option<FrameKey> {
        self.frame.as_ref().map(StackFrame::key)
    }
}

/// Merged call paths of one thread's samples, stored as an arena
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallTree {
    pub thread_id: ThreadId,
    nodes: Vec<CallTreeNode>,
    max_depth: i32,
    /// Samples merged into the tree
    pub sample_count: u64,
}

impl CallTree {
    pub fn node(&self, id: NodeId) -> &CallTreeNode {
        &self.nodes[id]
    }

    pub fn root(&self) -> &CallTreeNode {
        &self.nodes[ROOT]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }

    /// Deepest frame depth, -1 for an empty tree
    pub fn max_depth(&self) -> i32 {
        self.max_depth
    }

    /// Children of `id`, most hits first (ties keep first-seen order)
    pub fn children_sorted(&self, id: NodeId) -> Vec<NodeId> {
        let mut children = self.nodes[id].children.clone();
        children.sort_by(|a, b| {
            self.nodes[*b]
                .stats
                .hit_count
                .cmp(&self.nodes[*a].stats.hit_count)
        });
        children
    }

    /// Depth-first walk in presentation order, root excluded
    pub fn walk(&self) -> Vec<NodeId> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack: Vec<NodeId> = self.children_sorted(ROOT).into_iter().rev().collect();
        while let Some(id) = stack.pop() {
            order.push(id);
            stack.extend(self.children_sorted(id).into_iter().rev());
        }
        order
    }

    fn child_matching(&self, parent: NodeId, frame: &StackFrame) -> Option<NodeId> {
        self.nodes[parent].children.iter().copied().find(|&child| {
            self.nodes[child]
                .frame
                .as_ref()
                .is_some_and(|f| f.matches_key(&frame.key()))
        })
    }

    fn add_child(&mut self, parent: NodeId, frame: &StackFrame, stats: FrameStat) -> NodeId {
        let depth = self.nodes[parent].depth + 1;
        let id = self.nodes.len();
        self.nodes.push(CallTreeNode {
            frame: Some(frame.clone()),
            stats,
            children: Vec::new(),
            parent: Some(parent),
            depth,
        });
        self.nodes[parent].children.push(id);
        self.max_depth = self.max_depth.max(depth);
        id
    }
}

/// Merge a thread's samples into a call tree.
///
/// Paths are matched on (class, method, line) from the outermost frame down, so
/// a node's hit count is the number of samples that passed through it.
pub fn build_call_tree(
    thread_id: ThreadId,
    list: &[ThreadSnapshot],
    window: Option<&TimeWindow>,
) -> CallTree {
    let (total_hits, total_time) = denominators(list, window);

    let mut tree = CallTree {
        thread_id,
        nodes: vec![CallTreeNode {
            frame: None,
            stats: FrameStat::with_totals(total_hits, total_time),
            children: Vec::new(),
            parent: None,
            depth: -1,
        }],
        max_depth: -1,
        sample_count: 0,
    };

    for (idx, snapshot) in list.iter().enumerate() {
        if !is_selected(window, snapshot) {
            continue;
        }
        let real_time = snapshot.real_time_ms();
        let sample_time = list
            .get(idx + 1)
            .map_or(real_time, |next| next.window.start_ms - snapshot.window.start_ms);

        tree.sample_count += 1;
        tree.nodes[ROOT].stats.hit(thread_id, real_time, sample_time);

        let mut cursor = ROOT;
        for frame in snapshot.frames() {
            cursor = match tree.child_matching(cursor, frame) {
                Some(child) => child,
                None => tree.add_child(
                    cursor,
                    frame,
                    FrameStat::with_totals(total_hits, total_time),
                ),
            };
            tree.nodes[cursor].stats.hit(thread_id, real_time, sample_time);
        }
    }

    tree
}

/// (sample count, covered time) used as ratio denominators
fn denominators(list: &[ThreadSnapshot], window: Option<&TimeWindow>) -> (u64, i64) {
    let (Some(first), Some(last)) = (list.first(), list.last()) else {
        return (0, 0);
    };
    let Some(window) = window else {
        return (list.len() as u64, last.window.end_ms - first.window.start_ms);
    };

    let count = list.iter().filter(|s| window.selects(&s.window)).count() as u64;

    // From the first sample starting in the window to where the last sample
    // ending in it hands over to its successor
    let end = list
        .iter()
        .rposition(|s| s.window.end_ms <= window.to_ms)
        .map(|idx| {
            list.get(idx + 1)
                .map_or(list[idx].window.end_ms, |next| next.window.start_ms)
        });
    let start = list
        .iter()
        .find(|s| s.window.start_ms >= window.from_ms)
        .map(|s| s.window.start_ms);

    match (start, end) {
        (Some(start), Some(end)) => (count, (end - start).max(0)),
        _ => (count, 0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{SampleWindow, ThreadDump, ThreadState};

    fn sample(start: i64, methods: &[(&str, u32)]) -> ThreadSnapshot {
        let frames = methods
            .iter()
            .map(|(m, line)| StackFrame::new("A", *m).with_location("A.java", *line))
            .collect();
        ThreadSnapshot::new(
            ThreadDump::new(ThreadId(1), "main", ThreadState::Runnable).with_frames(frames),
            SampleWindow::new(start, start + 10),
        )
    }

    fn names(tree: &CallTree, ids: &[NodeId]) -> Vec<String> {
        ids.iter()
            .map(|&id| tree.node(id).frame.as_ref().map(|f| f.method_name.clone()).unwrap_or_default())
            .collect()
    }

    #[test]
    fn test_shared_prefixes_merge() {
        let list = vec![
            sample(0, &[("run", 1), ("idle", 9)]),
            sample(100, &[("run", 1), ("work", 5), ("calc", 7)]),
            sample(200, &[("run", 1), ("work", 5)]),
        ];
        let tree = build_call_tree(ThreadId(1), &list, None);

        assert_eq!(tree.sample_count, 3);
        assert_eq!(tree.max_depth(), 2);
        assert_eq!(tree.root().children.len(), 1);

        let run = tree.root().children[0];
        assert_eq!(tree.node(run).stats.hit_count, 3);
        assert_eq!(names(&tree, &tree.children_sorted(run)), ["work", "idle"]);
        assert_eq!(names(&tree, &tree.walk()), ["run", "work", "calc", "idle"]);
        assert_eq!(tree.node(run).stats.total_hits, 3);
        assert_eq!(tree.node(run).stats.total_sample_time_ms, 210);
    }

    #[test]
    fn test_different_lines_split() {
        let list = vec![sample(0, &[("run", 1)]), sample(100, &[("run", 2)])];
        let tree = build_call_tree(ThreadId(1), &list, None);
        assert_eq!(tree.root().children.len(), 2);
    }

    #[test]
    fn test_hits_never_grow_towards_leaves() {
        let list = vec![
            sample(0, &[("a", 1), ("b", 1), ("c", 1)]),
            sample(100, &[("a", 1), ("b", 1)]),
            sample(200, &[("a", 1), ("d", 1)]),
        ];
        let tree = build_call_tree(ThreadId(1), &list, None);
        for id in tree.walk() {
            let node = tree.node(id);
            let parent = tree.node(node.parent.unwrap());
            assert!(node.stats.hit_count <= parent.stats.hit_count);
        }
    }

    #[test]
    fn test_windowed_denominators() {
        let list = vec![
            sample(0, &[("a", 1)]),
            sample(100, &[("a", 1)]),
            sample(200, &[("a", 1)]),
            sample(300, &[("a", 1)]),
        ];
        let window = TimeWindow {
            from_ms: 100,
            to_ms: 215,
        };
        let tree = build_call_tree(ThreadId(1), &list, Some(&window));
        assert_eq!(tree.sample_count, 2);
        let a = tree.node(tree.root().children[0]);
        assert_eq!(a.stats.hit_count, 2);
        assert_eq!(a.stats.total_hits, 2);
        // 100 .. start of the sample after the last one inside (300)
        assert_eq!(a.stats.total_sample_time_ms, 200);
    }

    #[test]
    fn test_empty_list() {
        let tree = build_call_tree(ThreadId(1), &[], None);
        assert!(tree.is_empty());
        assert_eq!(tree.max_depth(), -1);
        assert!(tree.walk().is_empty());
    }
}
