// src/interrupts.rs
use lazy_static::lazy_static;
use pic8259::ChainedPics;
use x86_64::instructions::port::Port;
use x86_64::structures::idt::{InterruptDescriptorTable, InterruptStackFrame, PageFaultErrorCode};
use x86_64::PrivilegeLevel;
use x86_64::VirtAddr;

use crate::gdt;
use crate::machine::{self, Machine};
use crate::platform::Platform;
use crate::scheduler::Switch;
use crate::syscalls::{self, Exec, Halt, SyscallArgs};

pub const PIC_1_OFFSET: u8 = 32;
pub const PIC_2_OFFSET: u8 = PIC_1_OFFSET + 8;

#[derive(Debug, Clone, Copy)]
#[repr(u8)]
pub enum InterruptIndex {
    Timer = PIC_1_OFFSET,
    Keyboard,
    Rtc = PIC_2_OFFSET,
    Syscall = 0x80,
}

impl InterruptIndex {
    fn as_u8(self) -> u8 {
        self as u8
    }

    fn as_usize(self) -> usize {
        usize::from(self.as_u8())
    }
}

pub static PICS: spin::Mutex<ChainedPics> =
    spin::Mutex::new(unsafe { ChainedPics::new(PIC_1_OFFSET, PIC_2_OFFSET) });

lazy_static! {
    static ref IDT: InterruptDescriptorTable = {
        let mut idt = InterruptDescriptorTable::new();
        idt.divide_error.set_handler_fn(divide_error_handler);
        idt.debug.set_handler_fn(debug_handler);
        idt.breakpoint.set_handler_fn(breakpoint_handler);
        idt.overflow.set_handler_fn(overflow_handler);
        idt.bound_range_exceeded.set_handler_fn(bound_range_handler);
        idt.invalid_opcode.set_handler_fn(invalid_opcode_handler);
        idt.device_not_available.set_handler_fn(device_not_available_handler);
        idt.invalid_tss.set_handler_fn(invalid_tss_handler);
        idt.segment_not_present.set_handler_fn(segment_not_present_handler);
        idt.stack_segment_fault.set_handler_fn(stack_segment_handler);
        idt.general_protection_fault.set_handler_fn(general_protection_handler);
        idt.page_fault.set_handler_fn(page_fault_handler);
        idt.x87_floating_point.set_handler_fn(x87_handler);
        idt.alignment_check.set_handler_fn(alignment_check_handler);
        idt.simd_floating_point.set_handler_fn(simd_handler);
        unsafe {
            idt.double_fault
                .set_handler_fn(double_fault_handler)
                .set_stack_index(gdt::DOUBLE_FAULT_IST_INDEX);
        }
        idt[InterruptIndex::Timer.as_usize()].set_handler_fn(timer_interrupt_handler);
        idt[InterruptIndex::Keyboard.as_usize()].set_handler_fn(keyboard_interrupt_handler);
        idt[InterruptIndex::Rtc.as_usize()].set_handler_fn(rtc_interrupt_handler);
        // Trap gate: a blocking read must stay preemptible.
        unsafe {
            idt[InterruptIndex::Syscall.as_usize()]
                .set_handler_addr(VirtAddr::new(syscall_entry as *const () as u64))
                .set_privilege_level(PrivilegeLevel::Ring3)
                .disable_interrupts(false);
        }
        idt
    };
}

pub fn init_idt() {
    IDT.load();
}

/// Remap both PICs and unmask timer, keyboard, cascade and RTC.
pub fn init_pics() {
    unsafe {
        PICS.lock().initialize();
        let mut primary = Port::<u8>::new(0x21);
        let mut secondary = Port::<u8>::new(0xA1);
        primary.write(0b1111_1000);
        secondary.write(0b1111_1110);
    }
    crate::serial_println!("[boot] PIC masks written");
}

/// Periodic RTC interrupt at the 1024 Hz base rate.
pub fn init_rtc() {
    unsafe {
        let mut select = Port::<u8>::new(0x70);
        let mut data = Port::<u8>::new(0x71);

        // register B, bit 6: periodic interrupt enable
        select.write(0x8B);
        let prev = data.read();
        select.write(0x8B);
        data.write(prev | 0x40);

        // register A, rate 6 = 1024 Hz
        select.write(0x8A);
        let prev = data.read();
        select.write(0x8A);
        data.write((prev & 0xF0) | 6);
    }
    crate::serial_println!("[boot] RTC at 1024 Hz");
}

fn end_of_interrupt(index: InterruptIndex) {
    unsafe {
        PICS.lock().notify_end_of_interrupt(index.as_u8());
    }
}

extern "x86-interrupt" fn timer_interrupt_handler(_stack_frame: InterruptStackFrame) {
    // Acknowledge first: this handler may not return for a long time.
    end_of_interrupt(InterruptIndex::Timer);

    let Some(kernel) = machine::try_kernel() else {
        return;
    };
    let switch = kernel.lock().tick();
    match switch {
        Switch::Stay => {}
        Switch::Resume { save, restore } => unsafe { Machine::switch(save, restore) },
        Switch::Start(launch) => unsafe {
            Machine::enter_user(launch.resume_point, &launch);
        },
    }
}

extern "x86-interrupt" fn keyboard_interrupt_handler(_stack_frame: InterruptStackFrame) {
    let mut port = Port::new(0x60);
    let scancode: u8 = unsafe { port.read() };
    if let Some(kernel) = machine::try_kernel() {
        kernel.lock().keyboard(scancode);
    }
    end_of_interrupt(InterruptIndex::Keyboard);
}

extern "x86-interrupt" fn rtc_interrupt_handler(_stack_frame: InterruptStackFrame) {
    // Register C must be read or the RTC stops interrupting.
    unsafe {
        Port::<u8>::new(0x70).write(0x0C);
        Port::<u8>::new(0x71).read();
    }
    if let Some(kernel) = machine::try_kernel() {
        kernel.lock().rtc_interrupt();
    }
    end_of_interrupt(InterruptIndex::Rtc);
}

/// Kill the faulting user process, or panic if nothing can replace it.
fn exception(stack_frame: &InterruptStackFrame, name: &str) {
    if stack_frame.code_segment & 3 != 3 {
        panic!("EXCEPTION: {} in kernel mode\n{:#?}", name, stack_frame);
    }
    let outcome = machine::kernel().lock().fault(name);
    match outcome {
        Ok(Exec::Halt(Halt::Resume { context, status })) => unsafe {
            Machine::resume(&context, status)
        },
        // The replacement shell is never resumed, so this frame is abandoned.
        Ok(Exec::Launch(launch)) => unsafe {
            Machine::enter_user(launch.resume_point, &launch);
        },
        Ok(Exec::Halt(Halt::Ignored)) => panic!("EXCEPTION: {} left pid running", name),
        Err(err) => panic!("EXCEPTION: {} with no shell to run ({})", name, err),
    }
}

macro_rules! exception_handler {
    ($handler:ident, $name:expr) => {
        extern "x86-interrupt" fn $handler(stack_frame: InterruptStackFrame) {
            exception(&stack_frame, $name);
        }
    };
    ($handler:ident, $name:expr, error_code) => {
        extern "x86-interrupt" fn $handler(stack_frame: InterruptStackFrame, error_code: u64) {
            crate::serial_println!("[fault] {} error code {:#x}", $name, error_code);
            exception(&stack_frame, $name);
        }
    };
}

exception_handler!(divide_error_handler, "divide error");
exception_handler!(debug_handler, "debug");
exception_handler!(overflow_handler, "overflow");
exception_handler!(bound_range_handler, "bound range exceeded");
exception_handler!(invalid_opcode_handler, "invalid opcode");
exception_handler!(device_not_available_handler, "device not available");
exception_handler!(x87_handler, "x87 floating point");
exception_handler!(simd_handler, "SIMD floating point");
exception_handler!(invalid_tss_handler, "invalid TSS", error_code);
exception_handler!(segment_not_present_handler, "segment not present", error_code);
exception_handler!(stack_segment_handler, "stack segment fault", error_code);
exception_handler!(general_protection_handler, "general protection fault", error_code);
exception_handler!(alignment_check_handler, "alignment check", error_code);

extern "x86-interrupt" fn breakpoint_handler(stack_frame: InterruptStackFrame) {
    if stack_frame.code_segment & 3 == 3 {
        exception(&stack_frame, "breakpoint");
    } else {
        crate::serial_println!("EXCEPTION: BREAKPOINT\n{:#?}", stack_frame);
    }
}

extern "x86-interrupt" fn page_fault_handler(
    stack_frame: InterruptStackFrame,
    error_code: PageFaultErrorCode,
) {
    use x86_64::registers::control::Cr2;

    crate::serial_println!(
        "[fault] page fault at {:?} ({:?})",
        Cr2::read(),
        error_code
    );
    exception(&stack_frame, "page fault");
}

extern "x86-interrupt" fn double_fault_handler(
    stack_frame: InterruptStackFrame,
    _error_code: u64,
) -> ! {
    panic!("EXCEPTION: DOUBLE FAULT\n{:#?}", stack_frame);
}

#[unsafe(naked)]
extern "C" fn syscall_entry() -> ! {
    core::arch::naked_asm!(
        // Save all GPRs
        "push r15",
        "push r14",
        "push r13",
        "push r12",
        "push r11",
        "push r10",
        "push r9",
        "push r8",
        "push rbp",
        "push rdi",
        "push rsi",
        "push rdx",
        "push rcx",
        "push rbx",
        "push rax",
        // The 5-word trap frame plus 15 pushes keep rsp 16-byte aligned.
        //
        // [rsp]    = rax (syscall number)
        // [rsp+24] = rdx
        // [rsp+32] = rsi
        // [rsp+40] = rdi
        "mov rdi, [rsp]",
        "mov rsi, [rsp+40]",
        "mov rdx, [rsp+32]",
        "mov rcx, [rsp+24]",
        "call {dispatch}",
        // Write return value into saved rax slot
        "mov [rsp], rax",
        "pop rax",
        "pop rbx",
        "pop rcx",
        "pop rdx",
        "pop rsi",
        "pop rdi",
        "pop rbp",
        "pop r8",
        "pop r9",
        "pop r10",
        "pop r11",
        "pop r12",
        "pop r13",
        "pop r14",
        "pop r15",
        "iretq",
        dispatch = sym syscall_dispatch,
    );
}

extern "C" fn syscall_dispatch(number: u64, arg0: u64, arg1: u64, arg2: u64) -> i64 {
    let args = SyscallArgs { arg0, arg1, arg2 };
    syscalls::handle_syscall(machine::kernel(), number, args).into()
}
