// Process management: fixed process table, descriptors and saved contexts
pub mod context;
pub mod fd;
pub mod pcb;

/// Process id; also the index of the process's physical address-space slot.
pub type Pid = usize;
pub type TerminalId = usize;

pub use context::{Launch, SavedContext};
pub use fd::{Backend, OpenFile, TerminalEnd};
pub use pcb::{ProcessControlBlock, ProcessError, ProcessTable};
