// Kernel-wide limits and fixed addresses

/// Process slots. A pid is an index into the process table.
pub const NUM_PROCESSES: usize = 6;
/// Descriptor table entries per process; 0 and 1 are reserved.
pub const NUM_FDS: usize = 8;
pub const FIRST_FREE_FD: usize = 2;
pub const NUM_TERMINALS: usize = 3;

pub const LINE_BUFFER_SIZE: usize = 128;
pub const ARG_BUFFER_SIZE: usize = 128;
pub const COMMAND_SIZE: usize = 128;
pub const FILENAME_SIZE: usize = 32;

pub const SHELL: &[u8] = b"shell";
pub const EXIT_COMMAND: &[u8] = b"exit";

// User virtual layout: a single 4 MiB window at 128 MiB.
pub const USER_WINDOW_START: u64 = 0x0800_0000;
pub const USER_WINDOW_SIZE: u64 = 0x0040_0000;
pub const USER_WINDOW_END: u64 = USER_WINDOW_START + USER_WINDOW_SIZE;
pub const PROGRAM_IMAGE_ADDRESS: u64 = 0x0804_8000;
pub const USER_STACK_TOP: u64 = USER_WINDOW_END - 8;
pub const VIDMAP_ADDRESS: u64 = 0x0880_0000;

// Physical slot of pid p starts at PROCESS_PHYS_BASE + p * PROCESS_SLOT_SIZE.
pub const PROCESS_PHYS_BASE: u64 = 0x0080_0000;
pub const PROCESS_SLOT_SIZE: u64 = USER_WINDOW_SIZE;

pub const KERNEL_STACK_SIZE: usize = 8 * 1024;

pub const EXECUTABLE_MAGIC: [u8; 4] = [0x7f, b'E', b'L', b'F'];
pub const ENTRY_POINT_OFFSET: u32 = 24;

/// Status delivered to the parent when a process is killed by a fault.
pub const FAULT_STATUS: i32 = 256;

pub const SCHEDULER_HZ: u32 = 100;
pub const RTC_BASE_HZ: u32 = 1024;
pub const RTC_DEFAULT_HZ: u32 = 2;

// Text mode
pub const TEXT_COLUMNS: usize = 80;
pub const TEXT_ROWS: usize = 25;
pub const SCREEN_BYTES: usize = TEXT_COLUMNS * TEXT_ROWS * 2;
pub const PAGE_SIZE: u64 = 4096;
pub const LIVE_VIDEO_PHYS: u64 = 0xB8000;
pub const TERMINAL_ATTRIBUTES: [u8; NUM_TERMINALS] = [0x07, 0x0A, 0x0B];
