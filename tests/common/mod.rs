// Simulated machine and in-memory filesystem for driving a whole kernel
#![allow(dead_code)]

use std::cell::Cell;

use mpos::config::{
    ENTRY_POINT_OFFSET, EXECUTABLE_MAGIC, LIVE_VIDEO_PHYS, PROCESS_PHYS_BASE, PROCESS_SLOT_SIZE,
    NUM_PROCESSES, SCREEN_BYTES,
};
use mpos::fs::{DirEntry, FileType, FsError, Storage};
use mpos::kernel::Kernel;
use mpos::memory::{AddressSpace, PageTables, VideoLayout};
use mpos::platform::{Mmu, PhysMemory, Platform};
use mpos::process::{Launch, Pid, SavedContext};
use mpos::signal::Signals;
use mpos::syscalls::{Exec, IoOutcome};
use x86_64::structures::paging::PageTable;
use x86_64::{PhysAddr, VirtAddr};

pub const TERMINAL_PAGES: [u64; 3] = [0xB9000, 0xBA000, 0xBB000];
pub const VIDMAP_TABLE_PHYS: u64 = 0x5000;

thread_local! {
    /// Interrupt flag of the simulated CPU.
    static INTERRUPTS: Cell<bool> = Cell::new(true);
    /// Interrupt flag seen by the last `resume`.
    static RESUMED_WITH_INTERRUPTS: Cell<Option<bool>> = Cell::new(None);
}

pub fn interrupts_enabled() -> bool {
    INTERRUPTS.with(Cell::get)
}

pub fn resumed_with_interrupts() -> Option<bool> {
    RESUMED_WITH_INTERRUPTS.with(Cell::get)
}

/// 32 MiB of physical memory: low memory plus all six process slots.
pub struct SimMachine {
    pub memory: Vec<u8>,
    pub flushes: usize,
    pub cursor: (usize, usize),
    pub kernel_stack: Option<Pid>,
}

impl SimMachine {
    pub fn new() -> Self {
        let size = (PROCESS_PHYS_BASE + NUM_PROCESSES as u64 * PROCESS_SLOT_SIZE) as usize;
        Self {
            memory: vec![0; size],
            flushes: 0,
            cursor: (0, 0),
            kernel_stack: None,
        }
    }
}

impl Mmu for SimMachine {
    fn flush_tlb(&mut self) {
        self.flushes += 1;
    }
}

impl PhysMemory for SimMachine {
    fn phys(&self, addr: PhysAddr, len: usize) -> &[u8] {
        let start = addr.as_u64() as usize;
        &self.memory[start..start + len]
    }

    fn phys_mut(&mut self, addr: PhysAddr, len: usize) -> &mut [u8] {
        let start = addr.as_u64() as usize;
        &mut self.memory[start..start + len]
    }
}

impl Platform for SimMachine {
    fn set_kernel_stack(&mut self, pid: Pid) {
        self.kernel_stack = Some(pid);
    }

    fn set_cursor(&mut self, x: usize, y: usize) {
        self.cursor = (x, y);
    }

    unsafe fn enter_user(_save: *mut SavedContext, _launch: &Launch) -> i32 {
        0
    }

    unsafe fn resume(_context: *const SavedContext, status: i32) -> ! {
        RESUMED_WITH_INTERRUPTS.with(|seen| seen.set(Some(interrupts_enabled())));
        panic!("simulated machine cannot resume a context (status {})", status);
    }

    unsafe fn switch(_save: *mut SavedContext, _restore: *const SavedContext) {}

    fn without_interrupts<R>(f: impl FnOnce() -> R) -> R {
        let was = INTERRUPTS.with(|flag| flag.replace(false));
        let result = f();
        INTERRUPTS.with(|flag| flag.set(was));
        result
    }

    fn disable_interrupts() {
        INTERRUPTS.with(|flag| flag.set(false));
    }

    fn halt_until_interrupt() {}
}

/// Flat list of files; the index of a file is its inode.
pub struct MemFs {
    files: Vec<(&'static str, FileType, Vec<u8>)>,
}

impl MemFs {
    pub fn new(files: Vec<(&'static str, FileType, Vec<u8>)>) -> Self {
        Self { files }
    }

    /// Directory, timer device, two programs and a text file.
    pub fn standard() -> Self {
        Self::new(vec![
            (".", FileType::Directory, Vec::new()),
            ("rtc", FileType::Rtc, Vec::new()),
            ("shell", FileType::Regular, program(0x0804_8040, 200)),
            ("hello", FileType::Regular, program(0x0804_8100, 300)),
            ("frame0.txt", FileType::Regular, frame()),
            ("empty", FileType::Regular, Vec::new()),
        ])
    }
}

impl Storage for MemFs {
    fn lookup_by_name(&self, name: &[u8]) -> Option<DirEntry> {
        self.files
            .iter()
            .position(|(file, _, _)| file.as_bytes() == name)
            .and_then(|i| self.lookup_by_index(i))
    }

    fn lookup_by_index(&self, index: usize) -> Option<DirEntry> {
        let (name, file_type, _) = self.files.get(index)?;
        Some(DirEntry::new(name.as_bytes(), *file_type, index as u32))
    }

    fn read_bytes(&self, inode: u32, offset: u32, buf: &mut [u8]) -> Result<usize, FsError> {
        let (_, _, data) = self.files.get(inode as usize).ok_or(FsError::BadInode)?;
        let offset = offset as usize;
        if offset >= data.len() {
            return Ok(0);
        }
        let count = buf.len().min(data.len() - offset);
        buf[..count].copy_from_slice(&data[offset..offset + count]);
        Ok(count)
    }
}

/// An executable image: signature, entry point, then filler.
pub fn program(entry: u32, len: usize) -> Vec<u8> {
    let mut image = vec![0x90; len];
    image[..4].copy_from_slice(&EXECUTABLE_MAGIC);
    let at = ENTRY_POINT_OFFSET as usize;
    image[at..at + 4].copy_from_slice(&entry.to_le_bytes());
    image
}

/// A text file spanning more than one 4 KiB block.
pub fn frame() -> Vec<u8> {
    (0..5000).map(|i| b"fish\n"[i % 5]).collect()
}

pub type SimKernel = Kernel<SimMachine, MemFs>;

pub fn boot() -> SimKernel {
    boot_with(MemFs::standard())
}

pub fn boot_with(fs: MemFs) -> SimKernel {
    boot_storage(fs)
}

pub fn boot_storage<S: Storage>(storage: S) -> Kernel<SimMachine, S> {
    let tables = PageTables {
        directory: leaked_table(),
        video_table: leaked_table(),
        vidmap_table: leaked_table(),
        vidmap_table_phys: PhysAddr::new(VIDMAP_TABLE_PHYS),
    };
    let video = VideoLayout {
        live: PhysAddr::new(LIVE_VIDEO_PHYS),
        terminals: TERMINAL_PAGES.map(PhysAddr::new),
    };
    let signals: &'static Signals = Box::leak(Box::new(Signals::new()));
    Kernel::new(SimMachine::new(), storage, AddressSpace::new(tables, video), signals)
}

fn leaked_table() -> &'static mut PageTable {
    Box::leak(Box::new(PageTable::new()))
}

/// Run `command` and return the launched pid.
pub fn launch(kernel: &mut SimKernel, command: &str) -> Pid {
    match kernel.execute(command.as_bytes()) {
        Ok(Exec::Launch(launch)) => launch.pid,
        other => panic!("execute({:?}) did not launch: {:?}", command, other),
    }
}

pub fn done(outcome: Result<IoOutcome, mpos::SyscallError>) -> usize {
    match outcome {
        Ok(IoOutcome::Done(count)) => count,
        other => panic!("expected a completed transfer, got {:?}", other),
    }
}

/// Scratch area inside the user window, clear of the loaded image.
pub fn scratch(offset: u64) -> VirtAddr {
    VirtAddr::new(0x0830_0000 + offset)
}

/// Text cells (characters only) of a screen page.
pub fn screen_text(kernel: &SimKernel, page: PhysAddr) -> Vec<u8> {
    kernel
        .platform()
        .phys(page, SCREEN_BYTES)
        .iter()
        .step_by(2)
        .copied()
        .collect()
}

pub fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|window| window == needle)
}
