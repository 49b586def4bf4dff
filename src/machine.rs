//! The bare-metal `Platform` and the kernel singleton.

use core::ptr::{addr_of, addr_of_mut};

use conquer_once::spin::OnceCell;
use spin::Mutex;
use x86_64::instructions::interrupts;
use x86_64::instructions::port::Port;
use x86_64::registers::control::Cr3;
use x86_64::structures::paging::page_table::PageTableEntry;
use x86_64::structures::paging::{OffsetPageTable, PageTable, PageTableFlags, Translate};
use x86_64::{PhysAddr, VirtAddr};

use crate::config::{LIVE_VIDEO_PHYS, NUM_TERMINALS, TEXT_COLUMNS};
use crate::fs::BootImage;
use crate::gdt;
use crate::kernel::Kernel;
use crate::memory::{AddressSpace, PageTables, VideoLayout};
use crate::platform::{Mmu, PhysMemory, Platform};
use crate::process::{Launch, Pid, SavedContext};
use crate::signal::Signals;
use crate::userspace;

pub type MachineKernel = Kernel<Machine, BootImage<'static>>;

static SIGNALS: Signals = Signals::new();
static KERNEL: OnceCell<Mutex<MachineKernel>> = OnceCell::uninit();

#[repr(C, align(4096))]
struct Page([u8; 4096]);

static mut TERMINAL_PAGES: [Page; NUM_TERMINALS] = [const { Page([0; 4096]) }; NUM_TERMINALS];
static mut VIDMAP_TABLE: PageTable = PageTable::new();
/// Filled in when the bootloader left a level of the low-memory walk empty.
static mut SPARE_TABLES: [PageTable; 3] = [const { PageTable::new() }; 3];

/// Physical memory is reached through the bootloader's offset mapping.
pub struct Machine {
    physical_memory_offset: VirtAddr,
}

impl Machine {
    unsafe fn table_at(&self, phys: PhysAddr) -> &'static mut PageTable {
        unsafe { &mut *(self.physical_memory_offset + phys.as_u64()).as_mut_ptr() }
    }
}

impl Mmu for Machine {
    fn flush_tlb(&mut self) {
        x86_64::instructions::tlb::flush_all();
    }
}

impl PhysMemory for Machine {
    fn phys(&self, addr: PhysAddr, len: usize) -> &[u8] {
        let virt = self.physical_memory_offset + addr.as_u64();
        unsafe { core::slice::from_raw_parts(virt.as_ptr(), len) }
    }

    fn phys_mut(&mut self, addr: PhysAddr, len: usize) -> &mut [u8] {
        let virt = self.physical_memory_offset + addr.as_u64();
        unsafe { core::slice::from_raw_parts_mut(virt.as_mut_ptr(), len) }
    }
}

impl Platform for Machine {
    fn set_kernel_stack(&mut self, pid: Pid) {
        gdt::set_kernel_stack(pid);
    }

    fn set_cursor(&mut self, x: usize, y: usize) {
        let position = (y * TEXT_COLUMNS + x) as u16;
        let mut index = Port::<u8>::new(0x3D4);
        let mut data = Port::<u8>::new(0x3D5);
        unsafe {
            index.write(0x0F);
            data.write((position & 0xFF) as u8);
            index.write(0x0E);
            data.write((position >> 8) as u8);
        }
    }

    unsafe fn enter_user(save: *mut SavedContext, launch: &Launch) -> i32 {
        let (user_cs, user_ss) = gdt::user_selectors();
        unsafe { userspace::enter_user_mode(save, launch.entry, launch.user_stack, user_cs, user_ss) }
    }

    unsafe fn resume(context: *const SavedContext, status: i32) -> ! {
        unsafe { userspace::resume_context(context, status) }
    }

    unsafe fn switch(save: *mut SavedContext, restore: *const SavedContext) {
        unsafe { userspace::switch_context(save, restore) }
    }

    fn without_interrupts<R>(f: impl FnOnce() -> R) -> R {
        interrupts::without_interrupts(f)
    }

    fn disable_interrupts() {
        interrupts::disable();
    }

    fn halt_until_interrupt() {
        interrupts::enable_and_hlt();
    }
}

/// Build the kernel singleton over the running page tables.
///
/// # Safety
///
/// Call once, with interrupts disabled, and with the complete physical
/// memory mapped at `physical_memory_offset`.
pub unsafe fn init_kernel(physical_memory_offset: VirtAddr, storage: BootImage<'static>) {
    let mut machine = Machine {
        physical_memory_offset,
    };
    let (tables, video) = unsafe { low_memory_tables(&machine) };
    let memory = AddressSpace::new(tables, video);
    machine.flush_tlb();
    KERNEL.init_once(|| Mutex::new(Kernel::new(machine, storage, memory, &SIGNALS)));
    crate::serial_println!("[boot] kernel ready");
}

pub fn try_kernel() -> Option<&'static Mutex<MachineKernel>> {
    KERNEL.try_get().ok()
}

pub fn kernel() -> &'static Mutex<MachineKernel> {
    match try_kernel() {
        Some(kernel) => kernel,
        None => panic!("kernel used before init_kernel"),
    }
}

/// Walk P4[0] -> P3[0] -> P2 and P2[0] -> P1, installing spare tables where
/// the bootloader left a hole, and open the path to the user window.
unsafe fn low_memory_tables(machine: &Machine) -> (PageTables, VideoLayout) {
    let (l4_frame, _) = Cr3::read();
    let (spares, vidmap_table_phys, terminals) = unsafe {
        let l4 = machine.table_at(l4_frame.start_address());
        let translator = OffsetPageTable::new(l4, machine.physical_memory_offset);
        let phys = |ptr: *const u8| match translator.translate_addr(VirtAddr::from_ptr(ptr)) {
            Some(addr) => addr,
            None => panic!("kernel static {:p} is not mapped", ptr),
        };
        let spares: [PhysAddr; 3] =
            core::array::from_fn(|i| phys(addr_of!(SPARE_TABLES[i]) as *const u8));
        let terminals: [PhysAddr; NUM_TERMINALS] =
            core::array::from_fn(|i| phys(addr_of!(TERMINAL_PAGES[i]) as *const u8));
        (spares, phys(addr_of!(VIDMAP_TABLE) as *const u8), terminals)
    };

    unsafe {
        let l4 = machine.table_at(l4_frame.start_address());
        let l3 = descend(machine, &mut l4[0], spares[0], true);
        let directory = descend(machine, &mut l3[0], spares[1], true);
        let video_table = descend(machine, &mut directory[0], spares[2], false);
        let tables = PageTables {
            directory,
            video_table,
            vidmap_table: &mut *addr_of_mut!(VIDMAP_TABLE),
            vidmap_table_phys,
        };
        let video = VideoLayout {
            live: PhysAddr::new(LIVE_VIDEO_PHYS),
            terminals,
        };
        (tables, video)
    }
}

unsafe fn descend(
    machine: &Machine,
    entry: &mut PageTableEntry,
    spare: PhysAddr,
    user: bool,
) -> &'static mut PageTable {
    let mut flags = PageTableFlags::PRESENT | PageTableFlags::WRITABLE;
    if user {
        flags |= PageTableFlags::USER_ACCESSIBLE;
    }
    if entry.is_unused() {
        entry.set_addr(spare, flags);
    } else if entry.flags().contains(PageTableFlags::HUGE_PAGE) {
        panic!("huge page where a low-memory table was expected");
    } else {
        entry.set_flags(entry.flags() | flags);
    }
    unsafe { machine.table_at(entry.addr()) }
}
