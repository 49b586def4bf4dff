//! Address space manager.
//!
//! Every process sees the same 4 MiB user window; switching processes is a
//! rewrite of the two 2 MiB directory entries that back it. The physical
//! region behind the window is a pure function of the pid. Two more
//! mappings are managed here: the kernel's video page, which points either
//! at the live framebuffer or at a terminal's private page, and the optional
//! per-process vidmap page that exposes the same target to user code.

use core::fmt;

use x86_64::structures::paging::{PageTable, PageTableFlags};
use x86_64::{PhysAddr, VirtAddr};

use crate::config::{
    LIVE_VIDEO_PHYS, NUM_PROCESSES, NUM_TERMINALS, PAGE_SIZE, PROCESS_PHYS_BASE,
    PROCESS_SLOT_SIZE, USER_WINDOW_END, USER_WINDOW_START, VIDMAP_ADDRESS,
};
use crate::platform::{Mmu, PhysMemory};
use crate::process::{Pid, TerminalId};

const HUGE_PAGE_SIZE: u64 = 2 * 1024 * 1024;
const DIRECTORY_ENTRIES: usize = 512;
const USER_DIRECTORY_INDEX: usize = (USER_WINDOW_START / HUGE_PAGE_SIZE) as usize;
const USER_DIRECTORY_ENTRIES: usize = (PROCESS_SLOT_SIZE / HUGE_PAGE_SIZE) as usize;
const VIDMAP_DIRECTORY_INDEX: usize = (VIDMAP_ADDRESS / HUGE_PAGE_SIZE) as usize;
const VIDMAP_TABLE_INDEX: usize = ((VIDMAP_ADDRESS % HUGE_PAGE_SIZE) / PAGE_SIZE) as usize;
const VIDEO_TABLE_INDEX: usize = (LIVE_VIDEO_PHYS / PAGE_SIZE) as usize;

/// Physical base of `pid`'s address-space slot.
pub fn process_slot(pid: Pid) -> PhysAddr {
    PhysAddr::new(PROCESS_PHYS_BASE + pid as u64 * PROCESS_SLOT_SIZE)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryError {
    /// The user range leaves the mapped user window.
    InvalidRange,
}

impl fmt::Display for MemoryError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            MemoryError::InvalidRange => write!(f, "Address outside the user window"),
        }
    }
}

/// Where video writes through the kernel's video page land.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoTarget {
    Foreground,
    Terminal(TerminalId),
}

/// Physical pages used for text output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoLayout {
    pub live: PhysAddr,
    pub terminals: [PhysAddr; NUM_TERMINALS],
}

/// The page tables this module rewrites.
pub struct PageTables {
    /// Level-2 table covering virtual 0..1 GiB.
    pub directory: &'static mut PageTable,
    /// Level-1 table covering virtual 0..2 MiB, which holds the video page.
    pub video_table: &'static mut PageTable,
    /// Level-1 table behind the vidmap directory entry.
    pub vidmap_table: &'static mut PageTable,
    pub vidmap_table_phys: PhysAddr,
}

pub struct AddressSpace {
    tables: PageTables,
    video: VideoLayout,
    video_target: VideoTarget,
    vidmap_enabled: [bool; NUM_PROCESSES],
    mapped: Option<Pid>,
}

impl AddressSpace {
    pub fn new(tables: PageTables, video: VideoLayout) -> Self {
        let mut space = Self {
            tables,
            video,
            video_target: VideoTarget::Foreground,
            vidmap_enabled: [false; NUM_PROCESSES],
            mapped: None,
        };
        for index in USER_DIRECTORY_INDEX..USER_DIRECTORY_INDEX + USER_DIRECTORY_ENTRIES {
            space.tables.directory[index].set_unused();
        }
        space.tables.directory[VIDMAP_DIRECTORY_INDEX].set_unused();
        space.tables.vidmap_table[VIDMAP_TABLE_INDEX].set_unused();
        space.write_video_entries();
        space
    }

    pub fn video(&self) -> &VideoLayout {
        &self.video
    }

    pub fn mapped(&self) -> Option<Pid> {
        self.mapped
    }

    pub fn video_target(&self) -> VideoTarget {
        self.video_target
    }

    /// Point the user window at `pid`'s physical slot.
    pub fn map_process(&mut self, pid: Pid, mmu: &mut impl Mmu) {
        let user = PageTableFlags::PRESENT
            | PageTableFlags::WRITABLE
            | PageTableFlags::USER_ACCESSIBLE
            | PageTableFlags::HUGE_PAGE;
        let base = process_slot(pid);
        for i in 0..USER_DIRECTORY_ENTRIES {
            self.tables.directory[USER_DIRECTORY_INDEX + i]
                .set_addr(base + i as u64 * HUGE_PAGE_SIZE, user);
        }
        self.mapped = Some(pid);
        self.write_vidmap_entry();
        mmu.flush_tlb();
    }

    pub fn remap_video(&mut self, target: VideoTarget, mmu: &mut impl Mmu) {
        self.video_target = target;
        self.write_video_entries();
        mmu.flush_tlb();
    }

    /// Physical page behind the current video target.
    pub fn video_phys(&self) -> PhysAddr {
        match self.video_target {
            VideoTarget::Foreground => self.video.live,
            VideoTarget::Terminal(tid) => self.video.terminals[tid],
        }
    }

    /// Expose the video page to `pid` and store its address at `out`.
    ///
    /// `out` must hold a full pointer inside the user window; otherwise
    /// nothing is mapped.
    pub fn vidmap<P: Mmu + PhysMemory>(
        &mut self,
        pid: Pid,
        out: VirtAddr,
        platform: &mut P,
    ) -> Result<VirtAddr, MemoryError> {
        let size = core::mem::size_of::<u64>() as u64;
        let start = out.as_u64();
        if start < USER_WINDOW_START || start > USER_WINDOW_END - size {
            return Err(MemoryError::InvalidRange);
        }
        let slot = self.user_range(out, size as usize)?;

        self.vidmap_enabled[pid] = true;
        self.write_vidmap_entry();
        platform.flush_tlb();

        platform
            .phys_mut(slot, size as usize)
            .copy_from_slice(&VIDMAP_ADDRESS.to_le_bytes());
        Ok(VirtAddr::new(VIDMAP_ADDRESS))
    }

    pub fn vidmap_enabled(&self, pid: Pid) -> bool {
        self.vidmap_enabled.get(pid).copied().unwrap_or(false)
    }

    /// Drop `pid`'s vidmap page.
    pub fn unmap_vidmap(&mut self, pid: Pid, mmu: &mut impl Mmu) {
        if let Some(enabled) = self.vidmap_enabled.get_mut(pid) {
            *enabled = false;
        }
        self.write_vidmap_entry();
        mmu.flush_tlb();
    }

    /// Walk the managed mappings for `addr`.
    pub fn translate(&self, addr: VirtAddr) -> Option<PhysAddr> {
        let raw = addr.as_u64();
        let index = (raw / HUGE_PAGE_SIZE) as usize;
        if index >= DIRECTORY_ENTRIES {
            return None;
        }
        let entry = &self.tables.directory[index];
        if !entry.flags().contains(PageTableFlags::PRESENT) {
            return None;
        }
        if entry.flags().contains(PageTableFlags::HUGE_PAGE) {
            return Some(entry.addr() + raw % HUGE_PAGE_SIZE);
        }
        if index != VIDMAP_DIRECTORY_INDEX {
            return None;
        }
        let page = &self.tables.vidmap_table[((raw % HUGE_PAGE_SIZE) / PAGE_SIZE) as usize];
        if !page.flags().contains(PageTableFlags::PRESENT) {
            return None;
        }
        Some(page.addr() + raw % PAGE_SIZE)
    }

    /// Physical start of a user buffer that is mapped contiguously: either
    /// inside the user window or inside the vidmap page.
    pub fn user_range(&self, addr: VirtAddr, len: usize) -> Result<PhysAddr, MemoryError> {
        let start = addr.as_u64();
        let end = start
            .checked_add(len as u64)
            .ok_or(MemoryError::InvalidRange)?;
        let inside = |lo: u64, hi: u64| start >= lo && end <= hi;
        if !inside(USER_WINDOW_START, USER_WINDOW_END)
            && !inside(VIDMAP_ADDRESS, VIDMAP_ADDRESS + PAGE_SIZE)
        {
            return Err(MemoryError::InvalidRange);
        }
        self.translate(addr).ok_or(MemoryError::InvalidRange)
    }

    fn write_video_entries(&mut self) {
        let target = self.video_phys();
        self.tables.video_table[VIDEO_TABLE_INDEX]
            .set_addr(target, PageTableFlags::PRESENT | PageTableFlags::WRITABLE);
        if self.tables.vidmap_table[VIDMAP_TABLE_INDEX]
            .flags()
            .contains(PageTableFlags::PRESENT)
        {
            self.tables.vidmap_table[VIDMAP_TABLE_INDEX].set_addr(target, user_page());
        }
    }

    fn write_vidmap_entry(&mut self) {
        let enabled = self.mapped.map_or(false, |pid| self.vidmap_enabled[pid]);
        if enabled {
            let target = self.video_phys();
            self.tables.directory[VIDMAP_DIRECTORY_INDEX]
                .set_addr(self.tables.vidmap_table_phys, user_page());
            self.tables.vidmap_table[VIDMAP_TABLE_INDEX].set_addr(target, user_page());
        } else {
            self.tables.directory[VIDMAP_DIRECTORY_INDEX].set_unused();
            self.tables.vidmap_table[VIDMAP_TABLE_INDEX].set_unused();
        }
    }
}

fn user_page() -> PageTableFlags {
    PageTableFlags::PRESENT | PageTableFlags::WRITABLE | PageTableFlags::USER_ACCESSIBLE
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PROGRAM_IMAGE_ADDRESS;

    /// Physical memory sized to cover two process slots.
    struct FakeMachine {
        flushes: usize,
        memory: Vec<u8>,
    }

    impl FakeMachine {
        fn new() -> Self {
            Self {
                flushes: 0,
                memory: vec![0; (PROCESS_PHYS_BASE + 2 * PROCESS_SLOT_SIZE) as usize],
            }
        }
    }

    impl Mmu for FakeMachine {
        fn flush_tlb(&mut self) {
            self.flushes += 1;
        }
    }

    impl PhysMemory for FakeMachine {
        fn phys(&self, addr: PhysAddr, len: usize) -> &[u8] {
            let start = addr.as_u64() as usize;
            &self.memory[start..start + len]
        }

        fn phys_mut(&mut self, addr: PhysAddr, len: usize) -> &mut [u8] {
            let start = addr.as_u64() as usize;
            &mut self.memory[start..start + len]
        }
    }

    fn leaked_table() -> &'static mut PageTable {
        Box::leak(Box::new(PageTable::new()))
    }

    fn space() -> AddressSpace {
        let tables = PageTables {
            directory: leaked_table(),
            video_table: leaked_table(),
            vidmap_table: leaked_table(),
            vidmap_table_phys: PhysAddr::new(0x5000),
        };
        let video = VideoLayout {
            live: PhysAddr::new(LIVE_VIDEO_PHYS),
            terminals: [
                PhysAddr::new(0xB9000),
                PhysAddr::new(0xBA000),
                PhysAddr::new(0xBB000),
            ],
        };
        AddressSpace::new(tables, video)
    }

    #[test]
    fn user_window_follows_the_mapped_pid() {
        let mut machine = FakeMachine::new();
        let mut space = space();
        let addr = VirtAddr::new(PROGRAM_IMAGE_ADDRESS);
        assert_eq!(space.translate(addr), None);

        space.map_process(0, &mut machine);
        assert_eq!(
            space.translate(addr),
            Some(PhysAddr::new(PROCESS_PHYS_BASE + 0x48000))
        );
        space.map_process(1, &mut machine);
        assert_eq!(
            space.translate(addr),
            Some(PhysAddr::new(PROCESS_PHYS_BASE + PROCESS_SLOT_SIZE + 0x48000))
        );
        // the second 2 MiB half is covered too
        let high = VirtAddr::new(USER_WINDOW_END - 1);
        assert_eq!(
            space.translate(high),
            Some(PhysAddr::new(PROCESS_PHYS_BASE + 2 * PROCESS_SLOT_SIZE - 1))
        );
        assert_eq!(machine.flushes, 2);
    }

    #[test]
    fn vidmap_rejects_pointers_outside_the_window() {
        let mut machine = FakeMachine::new();
        let mut space = space();
        space.map_process(0, &mut machine);
        let flushes = machine.flushes;

        for bad in [0u64, USER_WINDOW_START - 8, USER_WINDOW_END - 4, VIDMAP_ADDRESS] {
            assert_eq!(
                space.vidmap(0, VirtAddr::new(bad), &mut machine),
                Err(MemoryError::InvalidRange)
            );
        }
        assert!(!space.vidmap_enabled(0));
        assert_eq!(space.translate(VirtAddr::new(VIDMAP_ADDRESS)), None);
        assert_eq!(machine.flushes, flushes);
    }

    #[test]
    fn vidmap_writes_the_address_and_follows_video_target() {
        let mut machine = FakeMachine::new();
        let mut space = space();
        space.map_process(1, &mut machine);

        let out = VirtAddr::new(USER_WINDOW_END - 8);
        assert_eq!(
            space.vidmap(1, out, &mut machine),
            Ok(VirtAddr::new(VIDMAP_ADDRESS))
        );
        let slot = space.translate(out).unwrap();
        assert_eq!(
            machine.phys(slot, 8),
            &VIDMAP_ADDRESS.to_le_bytes()[..]
        );
        assert_eq!(
            space.translate(VirtAddr::new(VIDMAP_ADDRESS + 2)),
            Some(PhysAddr::new(LIVE_VIDEO_PHYS + 2))
        );

        space.remap_video(VideoTarget::Terminal(2), &mut machine);
        assert_eq!(
            space.translate(VirtAddr::new(VIDMAP_ADDRESS)),
            Some(PhysAddr::new(0xBB000))
        );

        // another process does not see it
        space.map_process(0, &mut machine);
        assert_eq!(space.translate(VirtAddr::new(VIDMAP_ADDRESS)), None);
        space.map_process(1, &mut machine);
        assert!(space.translate(VirtAddr::new(VIDMAP_ADDRESS)).is_some());

        space.unmap_vidmap(1, &mut machine);
        assert_eq!(space.translate(VirtAddr::new(VIDMAP_ADDRESS)), None);
    }

    #[test]
    fn user_range_stays_inside_one_mapping() {
        let mut machine = FakeMachine::new();
        let mut space = space();
        space.map_process(0, &mut machine);
        assert!(space.user_range(VirtAddr::new(USER_WINDOW_END - 16), 16).is_ok());
        assert_eq!(
            space.user_range(VirtAddr::new(USER_WINDOW_END - 16), 17),
            Err(MemoryError::InvalidRange)
        );
        assert_eq!(
            space.user_range(VirtAddr::new(0x1000), 4),
            Err(MemoryError::InvalidRange)
        );
    }
}
