mod frame;
pub mod pattern;
mod selector;
mod snapshot;

pub use frame::{CallSite, FrameKey, StackFrame};
pub use selector::{SelectorItem, ThreadSelector};
pub use snapshot::{
    ResourceDelta, ResourceSample, ResourceSupport, ResourceUsage, SampleWindow, ThreadDump,
    ThreadId, ThreadRef, ThreadSnapshot, ThreadState,
};
