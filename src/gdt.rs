// Segments, the TSS and the per-process kernel stacks
use core::ptr::addr_of_mut;

use lazy_static::lazy_static;
use x86_64::instructions::segmentation::{Segment, CS, DS, ES, SS};
use x86_64::instructions::tables::load_tss;
use x86_64::structures::gdt::{Descriptor, GlobalDescriptorTable, SegmentSelector};
use x86_64::structures::tss::TaskStateSegment;
use x86_64::VirtAddr;

use crate::config::{KERNEL_STACK_SIZE, NUM_PROCESSES};
use crate::process::Pid;

pub const DOUBLE_FAULT_IST_INDEX: u16 = 0;

const DOUBLE_FAULT_STACK_SIZE: usize = 4096 * 5;

#[repr(C, align(16))]
struct KernelStack([u8; KERNEL_STACK_SIZE]);

/// One kernel stack per process slot. A ring-3 trap lands on the stack of
/// whichever pid was last handed to `set_kernel_stack`.
static mut KERNEL_STACKS: [KernelStack; NUM_PROCESSES] =
    [const { KernelStack([0; KERNEL_STACK_SIZE]) }; NUM_PROCESSES];

static mut DOUBLE_FAULT_STACK: [u8; DOUBLE_FAULT_STACK_SIZE] = [0; DOUBLE_FAULT_STACK_SIZE];

/// Lives in a `static mut` because rsp0 is rewritten on every process switch.
static mut TSS: TaskStateSegment = TaskStateSegment::new();

pub struct Selectors {
    pub kernel_code: SegmentSelector,
    pub kernel_data: SegmentSelector,
    pub user_code: SegmentSelector,
    pub user_data: SegmentSelector,
    tss: SegmentSelector,
}

lazy_static! {
    pub static ref GDT_AND_SELECTORS: (GlobalDescriptorTable, Selectors) = {
        let tss = unsafe {
            let tss = addr_of_mut!(TSS);
            let stack_start = VirtAddr::from_ptr(addr_of_mut!(DOUBLE_FAULT_STACK));
            (*tss).interrupt_stack_table[DOUBLE_FAULT_IST_INDEX as usize] =
                stack_start + DOUBLE_FAULT_STACK_SIZE;
            &*tss
        };

        let mut gdt = GlobalDescriptorTable::new();
        let kernel_code = gdt.add_entry(Descriptor::kernel_code_segment());
        let kernel_data = gdt.add_entry(Descriptor::kernel_data_segment());
        let user_data = gdt.add_entry(Descriptor::user_data_segment());
        let user_code = gdt.add_entry(Descriptor::user_code_segment());
        let tss = gdt.add_entry(Descriptor::tss_segment(tss));
        (
            gdt,
            Selectors {
                kernel_code,
                kernel_data,
                user_code,
                user_data,
                tss,
            },
        )
    };
}

pub fn init() {
    let (gdt, selectors) = &*GDT_AND_SELECTORS;
    gdt.load();
    unsafe {
        CS::set_reg(selectors.kernel_code);
        SS::set_reg(selectors.kernel_data);
        DS::set_reg(selectors.kernel_data);
        ES::set_reg(selectors.kernel_data);
        load_tss(selectors.tss);
    }
    crate::serial_println!("[boot] GDT loaded with TSS");
}

/// Selectors with RPL 3, as pushed in an `iretq` frame.
pub fn user_selectors() -> (u64, u64) {
    let selectors = &GDT_AND_SELECTORS.1;
    (
        u64::from(selectors.user_code.0 | 3),
        u64::from(selectors.user_data.0 | 3),
    )
}

/// Point rsp0 at the top of `pid`'s kernel stack.
pub fn set_kernel_stack(pid: Pid) {
    if pid >= NUM_PROCESSES {
        return;
    }
    unsafe {
        let top = VirtAddr::from_ptr(addr_of_mut!(KERNEL_STACKS[pid])) + KERNEL_STACK_SIZE;
        // TaskStateSegment is packed; copy the array out and back.
        let tss = addr_of_mut!(TSS);
        let mut stacks = (*tss).privilege_stack_table;
        stacks[0] = top;
        (*tss).privilege_stack_table = stacks;
    }
}
