// Local diagnostics: heap dump sessions and thread dumps

mod heap;
mod thread;

pub use heap::{HeapDumpManager, HeapDumper, ProcessMapDumper};
pub use thread::{
    ProcThreadDumper, ThreadContext, ThreadContextGuard, ThreadContextRegistry, ThreadDumper,
    deadlock_cycles,
};
