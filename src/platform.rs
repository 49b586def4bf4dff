//! Hardware abstraction layer.
//!
//! The kernel core only talks to the machine through these traits. The
//! bare-metal implementation lives in `machine.rs`; the integration tests
//! drive the same core over a simulated machine.

use x86_64::PhysAddr;

use crate::process::{Launch, Pid, SavedContext};

/// Translation-cache control.
pub trait Mmu {
    /// Drop every cached translation after a page-table rewrite.
    fn flush_tlb(&mut self);
}

/// Byte access to physical memory.
pub trait PhysMemory {
    fn phys(&self, addr: PhysAddr, len: usize) -> &[u8];
    fn phys_mut(&mut self, addr: PhysAddr, len: usize) -> &mut [u8];
}

/// Everything the kernel needs from the CPU and its surroundings.
pub trait Platform: Mmu + PhysMemory {
    /// Point the privilege-transition stack (TSS rsp0) at `pid`'s kernel stack.
    fn set_kernel_stack(&mut self, pid: Pid);

    /// Move the hardware text cursor.
    fn set_cursor(&mut self, x: usize, y: usize);

    /// Capture the caller's context into `save`, then drop to user mode at
    /// `launch.entry` with `launch.user_stack`.
    ///
    /// Returns only when someone calls [`Platform::resume`] on `save`; the
    /// return value is the status handed to that call.
    ///
    /// # Safety
    ///
    /// `save` must stay valid until it is resumed, and the address space for
    /// `launch.pid` must be active.
    unsafe fn enter_user(save: *mut SavedContext, launch: &Launch) -> i32;

    /// Continue a context captured by `enter_user` or `switch`, making the
    /// suspended call return `status`.
    ///
    /// # Safety
    ///
    /// `context` must hold a live capture whose stack has not been reused.
    unsafe fn resume(context: *const SavedContext, status: i32) -> !;

    /// Save the running context into `save` and continue `restore`.
    ///
    /// # Safety
    ///
    /// Same requirements as [`Platform::resume`] for `restore`.
    unsafe fn switch(save: *mut SavedContext, restore: *const SavedContext);

    /// Run `f` with maskable interrupts disabled.
    fn without_interrupts<R>(f: impl FnOnce() -> R) -> R;

    /// Mask interrupts until the next return to user mode restores the
    /// flags, or until a resumed context does.
    fn disable_interrupts();

    /// Sleep until the next interrupt has been serviced.
    fn halt_until_interrupt();
}
