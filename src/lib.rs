// Multiprogramming core for the mpos teaching kernel
#![cfg_attr(not(test), no_std)]
#![cfg_attr(feature = "bare-metal", feature(abi_x86_interrupt))]

pub mod config;
pub mod fs;
pub mod kernel;
pub mod keyboard;
pub mod memory;
pub mod platform;
pub mod process;
pub mod rtc;
pub mod scheduler;
pub mod serial;
pub mod signal;
pub mod syscalls;
pub mod terminal;

#[cfg(feature = "bare-metal")]
pub mod gdt;
#[cfg(feature = "bare-metal")]
pub mod interrupts;
#[cfg(feature = "bare-metal")]
pub mod machine;
#[cfg(feature = "bare-metal")]
pub mod userspace;
#[cfg(feature = "bare-metal")]
pub mod vga_buffer;

pub use kernel::Kernel;
pub use process::{Pid, TerminalId};
pub use syscalls::{SyscallError, SyscallResult};

/// Bring up descriptor tables and the interrupt controllers.
///
/// Interrupts stay disabled; `kernel_main` enables them once the kernel
/// singleton exists.
#[cfg(feature = "bare-metal")]
pub fn init() {
    gdt::init();
    interrupts::init_idt();
    interrupts::init_pics();
    scheduler::init_pit(config::SCHEDULER_HZ);
    interrupts::init_rtc();
}

/// Idle forever, waking only to service interrupts.
#[cfg(feature = "bare-metal")]
pub fn hlt_loop() -> ! {
    loop {
        x86_64::instructions::hlt();
    }
}
