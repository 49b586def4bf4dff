// Saved register state for suspended kernel control flow
use crate::process::Pid;

/// Stack and base pointer of a suspended kernel path.
///
/// Callee-saved registers live on the suspended stack itself; this pair is
/// enough to continue it. The layout is read by the context primitives in
/// `userspace.rs`: `rsp` at offset 0, `rbp` at offset 8.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SavedContext {
    pub rsp: u64,
    pub rbp: u64,
}

/// Everything needed to drop into a freshly loaded process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Launch {
    pub pid: Pid,
    pub entry: u64,
    pub user_stack: u64,
    /// Where the launching kernel path saves itself so `halt` can resume it.
    pub resume_point: *mut SavedContext,
}
