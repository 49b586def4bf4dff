// src/syscalls.rs
use core::fmt;

use spin::Mutex;
use x86_64::VirtAddr;

use crate::config::{
    ARG_BUFFER_SIZE, COMMAND_SIZE, ENTRY_POINT_OFFSET, EXECUTABLE_MAGIC, EXIT_COMMAND,
    FILENAME_SIZE, FIRST_FREE_FD, LINE_BUFFER_SIZE, NUM_FDS, PROGRAM_IMAGE_ADDRESS,
    USER_STACK_TOP, USER_WINDOW_END, USER_WINDOW_START,
};
use crate::fs::{FileType, FsError, Storage};
use crate::kernel::Kernel;
use crate::memory::{process_slot, MemoryError};
use crate::platform::Platform;
use crate::process::{
    Backend, Launch, OpenFile, Pid, ProcessError, SavedContext, TerminalEnd, TerminalId,
};
use crate::rtc::RtcError;
use crate::signal::{block_on, Signal};
use crate::terminal::{TerminalError, TerminalState};

/// System call numbers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u64)]
pub enum SyscallNumber {
    Halt = 1,
    Execute = 2,
    Read = 3,
    Write = 4,
    Open = 5,
    Close = 6,
    GetArgs = 7,
    Vidmap = 8,
    SetHandler = 9,
    SigReturn = 10,
}

impl SyscallNumber {
    pub fn from_raw(number: u64) -> Option<Self> {
        Some(match number {
            1 => SyscallNumber::Halt,
            2 => SyscallNumber::Execute,
            3 => SyscallNumber::Read,
            4 => SyscallNumber::Write,
            5 => SyscallNumber::Open,
            6 => SyscallNumber::Close,
            7 => SyscallNumber::GetArgs,
            8 => SyscallNumber::Vidmap,
            9 => SyscallNumber::SetHandler,
            10 => SyscallNumber::SigReturn,
            _ => return None,
        })
    }
}

/// System call arguments (rdi, rsi, rdx)
#[derive(Debug, Clone, Copy, Default)]
pub struct SyscallArgs {
    pub arg0: u64,
    pub arg1: u64,
    pub arg2: u64,
}

/// System call result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyscallResult {
    Success(i64),
    Error(SyscallError),
}

/// System call errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyscallError {
    InvalidSyscall,
    InvalidCommand,
    NotFound,
    NotExecutable,
    LoadFailed,
    ResourceExhausted,
    BadDescriptor,
    InvalidArgument,
    PermissionDenied,
    InvalidRange,
    InvalidTerminal,
    Empty,
    NoProcess,
    Unsupported,
}

/// Broad failure classes user programs can tell apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    ResourceExhausted,
    NotFound,
    InvalidArgument,
    PermissionDenied,
    /// The binary is not a loadable executable.
    ProtocolViolation,
    Unsupported,
}

impl SyscallError {
    pub fn kind(self) -> ErrorKind {
        match self {
            SyscallError::ResourceExhausted => ErrorKind::ResourceExhausted,
            SyscallError::NotFound | SyscallError::Empty | SyscallError::NoProcess => {
                ErrorKind::NotFound
            }
            SyscallError::NotExecutable | SyscallError::LoadFailed => ErrorKind::ProtocolViolation,
            SyscallError::PermissionDenied => ErrorKind::PermissionDenied,
            SyscallError::Unsupported => ErrorKind::Unsupported,
            SyscallError::InvalidSyscall
            | SyscallError::InvalidCommand
            | SyscallError::BadDescriptor
            | SyscallError::InvalidArgument
            | SyscallError::InvalidRange
            | SyscallError::InvalidTerminal => ErrorKind::InvalidArgument,
        }
    }
}

impl fmt::Display for SyscallError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SyscallError::InvalidSyscall => write!(f, "Invalid syscall number"),
            SyscallError::InvalidCommand => write!(f, "Empty command"),
            SyscallError::NotFound => write!(f, "No such file"),
            SyscallError::NotExecutable => write!(f, "Not an executable"),
            SyscallError::LoadFailed => write!(f, "Program image could not be loaded"),
            SyscallError::ResourceExhausted => write!(f, "Out of slots"),
            SyscallError::BadDescriptor => write!(f, "Bad file descriptor"),
            SyscallError::InvalidArgument => write!(f, "Invalid argument"),
            SyscallError::PermissionDenied => write!(f, "Permission denied"),
            SyscallError::InvalidRange => write!(f, "Address outside the user window"),
            SyscallError::InvalidTerminal => write!(f, "No such terminal"),
            SyscallError::Empty => write!(f, "No arguments"),
            SyscallError::NoProcess => write!(f, "No current process"),
            SyscallError::Unsupported => write!(f, "Not supported"),
        }
    }
}

impl From<ProcessError> for SyscallError {
    fn from(err: ProcessError) -> Self {
        match err {
            ProcessError::TableFull | ProcessError::DescriptorTableFull => {
                SyscallError::ResourceExhausted
            }
            ProcessError::NoSuchProcess => SyscallError::NoProcess,
            ProcessError::ReservedDescriptor | ProcessError::BadDescriptor => {
                SyscallError::BadDescriptor
            }
        }
    }
}

impl From<FsError> for SyscallError {
    fn from(err: FsError) -> Self {
        match err {
            FsError::BadInode => SyscallError::NotFound,
            FsError::CorruptBlock => SyscallError::InvalidArgument,
        }
    }
}

impl From<TerminalError> for SyscallError {
    fn from(_: TerminalError) -> Self {
        SyscallError::InvalidTerminal
    }
}

impl From<RtcError> for SyscallError {
    fn from(err: RtcError) -> Self {
        match err {
            RtcError::InvalidFrequency | RtcError::BadLength => SyscallError::InvalidArgument,
            RtcError::NotOpen => SyscallError::BadDescriptor,
        }
    }
}

impl From<MemoryError> for SyscallError {
    fn from(_: MemoryError) -> Self {
        SyscallError::InvalidRange
    }
}

/// Convert syscall result to the value returned in rax
impl From<SyscallResult> for i64 {
    fn from(result: SyscallResult) -> i64 {
        match result {
            SyscallResult::Success(value) => value,
            SyscallResult::Error(_) => -1,
        }
    }
}

impl From<Result<usize, SyscallError>> for SyscallResult {
    fn from(result: Result<usize, SyscallError>) -> Self {
        match result {
            Ok(value) => SyscallResult::Success(value as i64),
            Err(err) => SyscallResult::Error(err),
        }
    }
}

/// How `execute` wants to continue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exec {
    /// Drop into the new process; the caller suspends until it halts.
    Launch(Launch),
    /// The command was the exit alias.
    Halt(Halt),
}

/// How `halt` wants to continue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Halt {
    /// Base shells cannot halt; the caller just returns.
    Ignored,
    /// Continue the parent's suspended `execute`, which returns `status`.
    Resume { context: SavedContext, status: i32 },
}

#[derive(Debug, Clone, Copy)]
pub enum IoOutcome {
    Done(usize),
    /// Nothing to return yet; retry once the signal is raised.
    Blocked(&'static Signal),
}

impl<P: Platform, S: Storage> Kernel<P, S> {
    /// Load and prepare a program for the executing terminal.
    pub fn execute(&mut self, command: &[u8]) -> Result<Exec, SyscallError> {
        let command = trim_start(command);
        let name_len = command
            .iter()
            .position(|&b| b == b' ' || b == 0)
            .unwrap_or(command.len());
        let (name, rest) = command.split_at(name_len);
        if name.is_empty() {
            return Err(SyscallError::InvalidCommand);
        }
        if name == EXIT_COMMAND {
            return self.halt(0).map(Exec::Halt);
        }
        let args = trim_end(trim_start(rest));

        let entry = self.storage.lookup_by_name(name).ok_or(SyscallError::NotFound)?;
        if entry.file_type != FileType::Regular {
            return Err(SyscallError::NotExecutable);
        }
        let mut header = [0u8; ENTRY_POINT_OFFSET as usize + 4];
        let read = self.storage.read_bytes(entry.inode, 0, &mut header)?;
        if read < header.len() || header[..4] != EXECUTABLE_MAGIC {
            return Err(SyscallError::NotExecutable);
        }
        let at = ENTRY_POINT_OFFSET as usize;
        let entry_point =
            u32::from_le_bytes([header[at], header[at + 1], header[at + 2], header[at + 3]]);

        let tid = self.scheduler.executing().unwrap_or(0);
        let parent = self.terminals.get(tid).and_then(|term| term.active);
        let pid = self.processes.create(parent)?;
        self.memory.map_process(pid, &mut self.platform);

        let image_offset = PROGRAM_IMAGE_ADDRESS - USER_WINDOW_START;
        let capacity = (USER_WINDOW_END - PROGRAM_IMAGE_ADDRESS) as usize;
        let image = self
            .platform
            .phys_mut(process_slot(pid) + image_offset, capacity);
        let loaded = self.storage.read_bytes(entry.inode, 0, image).unwrap_or(0);
        if loaded == 0 {
            self.processes.destroy(pid);
            if let Some(parent) = parent {
                self.memory.map_process(parent, &mut self.platform);
            }
            crate::serial_println!("[exec] loading {} failed", show(name));
            return Err(SyscallError::LoadFailed);
        }

        if let Some(parent_pcb) = parent.and_then(|p| self.processes.get_mut(p)) {
            parent_pcb.set_args(args);
        }
        if self.scheduler.executing().is_none() {
            self.scheduler.set_executing(Some(tid));
            if let Some(term) = self.terminals.get_mut(tid) {
                term.state = TerminalState::Running;
            }
        }
        if let Some(term) = self.terminals.get_mut(tid) {
            term.active = Some(pid);
        }
        self.platform.set_kernel_stack(pid);

        crate::serial_println!(
            "[exec] {} -> pid {} (parent {:?}, terminal {})",
            show(name),
            pid,
            parent,
            tid
        );
        let resume_point = match self.processes.get_mut(pid) {
            Some(pcb) => &mut pcb.resume_point as *mut SavedContext,
            None => return Err(SyscallError::NoProcess),
        };
        Ok(Exec::Launch(Launch {
            pid,
            entry: u64::from(entry_point),
            user_stack: USER_STACK_TOP,
            resume_point,
        }))
    }

    /// Tear down the executing process and hand `status` to its parent.
    pub fn halt(&mut self, status: i32) -> Result<Halt, SyscallError> {
        let (tid, pid) = self.current()?;
        let pcb = self.processes.get(pid).ok_or(SyscallError::NoProcess)?;
        let Some(parent) = pcb.parent else {
            return Ok(Halt::Ignored);
        };
        let context = pcb.resume_point;

        self.release(tid, pid);
        if let Some(term) = self.terminals.get_mut(tid) {
            term.active = Some(parent);
        }
        self.memory.map_process(parent, &mut self.platform);
        self.platform.set_kernel_stack(parent);
        crate::serial_println!("[halt] pid {} status {} -> pid {}", pid, status, parent);
        Ok(Halt::Resume { context, status })
    }

    pub fn read(&mut self, fd: usize, buf: VirtAddr, n: usize) -> Result<IoOutcome, SyscallError> {
        let (tid, pid) = self.current()?;
        let file = self.processes.fd(pid, fd)?;
        let phys = self.memory.user_range(buf, n)?;
        let signals = self.signals;

        match file.backend {
            Backend::Terminal(TerminalEnd::Output) => Err(SyscallError::PermissionDenied),
            Backend::Terminal(TerminalEnd::Input) => {
                let line_ready = &signals.line_ready[tid];
                if !line_ready.is_raised() {
                    return Ok(IoOutcome::Blocked(line_ready));
                }
                let mut line = [0u8; LINE_BUFFER_SIZE];
                let count = self.terminals.take_line(tid, &mut line[..n.min(LINE_BUFFER_SIZE)]);
                line_ready.clear();
                self.platform.phys_mut(phys, count).copy_from_slice(&line[..count]);
                Ok(IoOutcome::Done(count))
            }
            Backend::Rtc => {
                let tick = &signals.rtc_tick[tid];
                if self.rtc.poll_read(tid, tick)? {
                    Ok(IoOutcome::Done(0))
                } else {
                    Ok(IoOutcome::Blocked(tick))
                }
            }
            Backend::Directory => {
                let Some(entry) = self.storage.lookup_by_index(file.position as usize) else {
                    self.processes.fd_mut(pid, fd)?.position = 0;
                    return Ok(IoOutcome::Done(0));
                };
                let name = entry.name();
                let count = name.len().min(n).min(FILENAME_SIZE);
                self.platform.phys_mut(phys, count).copy_from_slice(&name[..count]);
                if count > 0 {
                    self.processes.fd_mut(pid, fd)?.position += 1;
                }
                Ok(IoOutcome::Done(count))
            }
            Backend::File => {
                let count = self.storage.read_bytes(
                    file.object,
                    file.position,
                    self.platform.phys_mut(phys, n),
                )?;
                self.processes.fd_mut(pid, fd)?.position += count as u32;
                Ok(IoOutcome::Done(count))
            }
        }
    }

    pub fn write(&mut self, fd: usize, buf: VirtAddr, n: usize) -> Result<IoOutcome, SyscallError> {
        let (tid, pid) = self.current()?;
        let file = self.processes.fd(pid, fd)?;
        let phys = self.memory.user_range(buf, n)?;

        match file.backend {
            Backend::Terminal(TerminalEnd::Input) => Err(SyscallError::PermissionDenied),
            Backend::Terminal(TerminalEnd::Output) => {
                let mut chunk = [0u8; LINE_BUFFER_SIZE];
                let mut done = 0;
                while done < n {
                    let len = (n - done).min(chunk.len());
                    chunk[..len].copy_from_slice(self.platform.phys(phys + done as u64, len));
                    self.terminals.write(tid, &chunk[..len], &mut self.platform);
                    done += len;
                }
                Ok(IoOutcome::Done(n))
            }
            Backend::Rtc => {
                let mut frequency = [0u8; 4];
                if n != frequency.len() {
                    return Err(RtcError::BadLength.into());
                }
                frequency.copy_from_slice(self.platform.phys(phys, n));
                let written = self.rtc.set_frequency(tid, &frequency)?;
                Ok(IoOutcome::Done(written))
            }
            Backend::Directory | Backend::File => Err(SyscallError::PermissionDenied),
        }
    }

    pub fn open(&mut self, name: &[u8]) -> Result<usize, SyscallError> {
        let (tid, pid) = self.current()?;
        let entry = self.storage.lookup_by_name(name).ok_or(SyscallError::NotFound)?;
        let backend = match entry.file_type {
            FileType::Rtc => Backend::Rtc,
            FileType::Directory => Backend::Directory,
            FileType::Regular => Backend::File,
        };
        let fd = self.processes.add_fd(pid, backend, entry.inode)?;
        if let Err(err) = self.open_backend(tid, pid, backend, entry.inode) {
            self.processes.remove_fd(pid, fd)?;
            return Err(err);
        }
        crate::serial_println!("[open] pid {} {} -> fd {}", pid, show(name), fd);
        Ok(fd)
    }

    pub fn close(&mut self, fd: usize) -> Result<usize, SyscallError> {
        let (tid, pid) = self.current()?;
        let file = self.processes.remove_fd(pid, fd)?;
        self.close_backend(tid, pid, file);
        Ok(0)
    }

    /// Copy the argument text the parent recorded for this process.
    pub fn getargs(&mut self, buf: VirtAddr, n: usize) -> Result<usize, SyscallError> {
        let (_, pid) = self.current()?;
        let parent = self
            .processes
            .get(pid)
            .and_then(|pcb| pcb.parent)
            .ok_or(SyscallError::Empty)?;
        let args = self
            .processes
            .get(parent)
            .map(|pcb| pcb.args())
            .ok_or(SyscallError::Empty)?;
        if args.is_empty() {
            return Err(SyscallError::Empty);
        }

        // text plus terminator, cut at n
        let mut text = [0u8; ARG_BUFFER_SIZE + 1];
        text[..args.len()].copy_from_slice(args);
        let count = (args.len() + 1).min(n);
        self.copy_to_user(buf, &text[..count])?;
        Ok(0)
    }

    pub fn vidmap(&mut self, out: VirtAddr) -> Result<usize, SyscallError> {
        let (_, pid) = self.current()?;
        let addr = self.memory.vidmap(pid, out, &mut self.platform)?;
        Ok(addr.as_u64() as usize)
    }

    pub fn set_handler(&mut self, _signum: u64, _handler: VirtAddr) -> Result<usize, SyscallError> {
        Err(SyscallError::Unsupported)
    }

    pub fn sigreturn(&mut self) -> Result<usize, SyscallError> {
        Err(SyscallError::Unsupported)
    }

    fn open_backend(
        &mut self,
        tid: TerminalId,
        pid: Pid,
        backend: Backend,
        object: u32,
    ) -> Result<(), SyscallError> {
        match backend {
            Backend::Rtc => self.rtc.open(tid, pid),
            Backend::File => {
                self.storage.read_bytes(object, 0, &mut [])?;
            }
            Backend::Directory | Backend::Terminal(_) => {}
        }
        Ok(())
    }

    /// Close every descriptor and mapping `pid` holds, then free its slot.
    pub(crate) fn release(&mut self, tid: TerminalId, pid: Pid) {
        for fd in FIRST_FREE_FD..NUM_FDS {
            if let Ok(file) = self.processes.remove_fd(pid, fd) {
                self.close_backend(tid, pid, file);
            }
        }
        self.memory.unmap_vidmap(pid, &mut self.platform);
        self.rtc.close(tid, pid);
        self.processes.destroy(pid);
    }

    fn close_backend(&mut self, tid: TerminalId, pid: Pid, file: OpenFile) {
        if file.backend == Backend::Rtc {
            self.rtc.close(tid, pid);
        }
    }
}

/// Run one system call against the kernel behind `kernel`.
///
/// The lock is only held with interrupts off, and never across a blocking
/// wait or a transition into or out of user mode.
pub fn handle_syscall<P: Platform, S: Storage>(
    kernel: &Mutex<Kernel<P, S>>,
    number: u64,
    args: SyscallArgs,
) -> SyscallResult {
    let Some(syscall) = SyscallNumber::from_raw(number) else {
        crate::serial_println!("[syscall] invalid number {}", number);
        return SyscallResult::Error(SyscallError::InvalidSyscall);
    };
    let locked = |f: &mut dyn FnMut(&mut Kernel<P, S>) -> Result<usize, SyscallError>| {
        P::without_interrupts(|| f(&mut kernel.lock()))
    };

    match syscall {
        SyscallNumber::Halt => {
            let status = (args.arg0 & 0xFF) as i32;
            // Still on the halted pid's kernel stack until the parent resumes.
            P::disable_interrupts();
            let outcome = P::without_interrupts(|| kernel.lock().halt(status));
            finish_halt::<P>(outcome)
        }
        SyscallNumber::Execute => {
            // `exit` halts here too; the trap frame restores the flags.
            P::disable_interrupts();
            let outcome = P::without_interrupts(|| {
                let mut kernel = kernel.lock();
                let mut command = [0u8; COMMAND_SIZE];
                let len = kernel.copy_str_from_user(user_addr(args.arg0)?, &mut command)?;
                kernel.execute(&command[..len])
            });
            match outcome {
                Ok(Exec::Launch(launch)) => {
                    // Returns when the child halts.
                    let status = unsafe { P::enter_user(launch.resume_point, &launch) };
                    SyscallResult::Success(i64::from(status))
                }
                Ok(Exec::Halt(halt)) => finish_halt::<P>(Ok(halt)),
                Err(err) => SyscallResult::Error(err),
            }
        }
        SyscallNumber::Read | SyscallNumber::Write => loop {
            let outcome = P::without_interrupts(|| {
                let mut kernel = kernel.lock();
                let buf = user_addr(args.arg1)?;
                let fd = args.arg0 as usize;
                let n = args.arg2 as usize;
                if syscall == SyscallNumber::Read {
                    kernel.read(fd, buf, n)
                } else {
                    kernel.write(fd, buf, n)
                }
            });
            match outcome {
                Ok(IoOutcome::Done(count)) => return SyscallResult::Success(count as i64),
                Ok(IoOutcome::Blocked(signal)) => block_on(signal.wait(), P::halt_until_interrupt),
                Err(err) => return SyscallResult::Error(err),
            }
        },
        SyscallNumber::Open => locked(&mut |kernel| {
            let mut name = [0u8; FILENAME_SIZE + 1];
            let len = kernel.copy_str_from_user(user_addr(args.arg0)?, &mut name)?;
            kernel.open(&name[..len])
        })
        .into(),
        SyscallNumber::Close => locked(&mut |kernel| kernel.close(args.arg0 as usize)).into(),
        SyscallNumber::GetArgs => {
            locked(&mut |kernel| kernel.getargs(user_addr(args.arg0)?, args.arg1 as usize)).into()
        }
        SyscallNumber::Vidmap => locked(&mut |kernel| kernel.vidmap(user_addr(args.arg0)?)).into(),
        SyscallNumber::SetHandler => locked(&mut |kernel| {
            kernel.set_handler(args.arg0, user_addr(args.arg1)?)
        })
        .into(),
        SyscallNumber::SigReturn => locked(&mut |kernel| kernel.sigreturn()).into(),
    }
}

fn finish_halt<P: Platform>(outcome: Result<Halt, SyscallError>) -> SyscallResult {
    match outcome {
        Ok(Halt::Resume { context, status }) => unsafe { P::resume(&context, status) },
        Ok(Halt::Ignored) => SyscallResult::Success(0),
        Err(err) => SyscallResult::Error(err),
    }
}

fn user_addr(raw: u64) -> Result<VirtAddr, SyscallError> {
    VirtAddr::try_new(raw).map_err(|_| SyscallError::InvalidRange)
}

fn trim_start(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|&b| b != b' ').unwrap_or(bytes.len());
    &bytes[start..]
}

fn trim_end(bytes: &[u8]) -> &[u8] {
    let end = bytes
        .iter()
        .rposition(|&b| b != b' ' && b != 0)
        .map_or(0, |i| i + 1);
    &bytes[..end]
}

fn show(name: &[u8]) -> &str {
    core::str::from_utf8(name).unwrap_or("<non-utf8>")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failures_return_minus_one() {
        assert_eq!(i64::from(SyscallResult::Success(7)), 7);
        assert_eq!(i64::from(SyscallResult::Error(SyscallError::NotFound)), -1);
        let result: SyscallResult = Err::<usize, _>(SyscallError::Unsupported).into();
        assert_eq!(i64::from(result), -1);
    }

    #[test]
    fn bad_signature_is_a_protocol_violation() {
        assert_eq!(SyscallError::NotExecutable.kind(), ErrorKind::ProtocolViolation);
        assert_eq!(SyscallError::Unsupported.kind(), ErrorKind::Unsupported);
        assert_eq!(
            SyscallError::from(ProcessError::TableFull).kind(),
            ErrorKind::ResourceExhausted
        );
        assert_eq!(
            SyscallError::from(ProcessError::ReservedDescriptor),
            SyscallError::BadDescriptor
        );
    }

    #[test]
    fn syscall_numbers_cover_one_through_ten() {
        assert_eq!(SyscallNumber::from_raw(0), None);
        assert_eq!(SyscallNumber::from_raw(1), Some(SyscallNumber::Halt));
        assert_eq!(SyscallNumber::from_raw(10), Some(SyscallNumber::SigReturn));
        assert_eq!(SyscallNumber::from_raw(11), None);
    }

    #[test]
    fn command_trimming() {
        assert_eq!(trim_start(b"   shell"), b"shell");
        assert_eq!(trim_end(b"arg  \0\0"), b"arg");
        assert_eq!(trim_end(b"   "), b"");
    }
}
