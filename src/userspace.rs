//! Context primitives: entering ring 3 and continuing suspended kernel paths.
//!
//! All three functions share one frame layout. The suspended path pushes
//! its callee-saved registers (rbx first, r15 last) and stores rsp and rbp
//! into a [`SavedContext`]; continuing it loads rsp, pops the registers and
//! `ret`s to whoever called the capturing function. Caller-saved registers
//! are already spilled by the compiler around the call.

use core::arch::naked_asm;

use crate::process::SavedContext;

/// Capture the caller into `save`, then `iretq` to ring 3.
///
/// Returns, with the status handed to [`resume_context`], once the launched
/// process halts.
///
/// # Safety
///
/// `save` must stay valid until resumed; `entry` and `user_stack` must be
/// mapped user-accessible in the active address space.
#[unsafe(naked)]
pub unsafe extern "C" fn enter_user_mode(
    _save: *mut SavedContext,
    _entry: u64,
    _user_stack: u64,
    _user_cs: u64,
    _user_ss: u64,
) -> i32 {
    naked_asm!(
        "cli",
        "push rbx",
        "push rbp",
        "push r12",
        "push r13",
        "push r14",
        "push r15",
        "mov [rdi], rsp",
        "mov [rdi + 8], rbp",
        // iretq frame: SS, RSP, RFLAGS (IF set), CS, RIP
        "push r8",
        "push rdx",
        "push 0x202",
        "push rcx",
        "push rsi",
        "iretq",
    );
}

/// Continue `context`, making its capturing call return `status`.
///
/// # Safety
///
/// `context` must hold a capture whose stack is still intact.
#[unsafe(naked)]
pub unsafe extern "C" fn resume_context(_context: *const SavedContext, _status: i32) -> ! {
    naked_asm!(
        "cli",
        "mov rsp, [rdi]",
        "mov rbp, [rdi + 8]",
        "mov eax, esi",
        "pop r15",
        "pop r14",
        "pop r13",
        "pop r12",
        "pop rbp",
        "pop rbx",
        "ret",
    );
}

/// Save the running path into `save` and continue `restore`.
///
/// # Safety
///
/// Same as [`resume_context`] for `restore`.
#[unsafe(naked)]
pub unsafe extern "C" fn switch_context(_save: *mut SavedContext, _restore: *const SavedContext) {
    naked_asm!(
        "push rbx",
        "push rbp",
        "push r12",
        "push r13",
        "push r14",
        "push r15",
        "mov [rdi], rsp",
        "mov [rdi + 8], rbp",
        "mov rsp, [rsi]",
        "mov rbp, [rsi + 8]",
        "pop r15",
        "pop r14",
        "pop r13",
        "pop r12",
        "pop rbp",
        "pop rbx",
        "xor eax, eax",
        "ret",
    );
}
