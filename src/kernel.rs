//! The kernel core.
//!
//! `Kernel` owns every table the system has and is the only thing that
//! mutates them. It never performs a privilege transition or a stack switch
//! itself: operations that end in one return a description of the
//! transition, and the caller carries it out after releasing the kernel
//! lock. That keeps the core testable over a simulated machine.

use x86_64::VirtAddr;

use crate::config::{FAULT_STATUS, LINE_BUFFER_SIZE, SHELL};
use crate::fs::Storage;
use crate::keyboard::{KeyAction, LineDiscipline};
use crate::memory::{AddressSpace, VideoTarget};
use crate::platform::Platform;
use crate::process::{Pid, ProcessTable, SavedContext, TerminalId};
use crate::rtc::VirtualRtc;
use crate::scheduler::Scheduler;
use crate::signal::Signals;
use crate::syscalls::{Exec, SyscallError};
use crate::terminal::{TerminalState, Terminals};

pub struct Kernel<P: Platform, S: Storage> {
    pub(crate) platform: P,
    pub(crate) storage: S,
    pub(crate) memory: AddressSpace,
    pub(crate) processes: ProcessTable,
    pub(crate) terminals: Terminals,
    pub(crate) scheduler: Scheduler,
    pub(crate) keyboard: LineDiscipline,
    pub(crate) rtc: VirtualRtc,
    pub(crate) signals: &'static Signals,
    /// Where the boot path is parked once the first shell starts.
    pub(crate) idle_context: SavedContext,
}

impl<P: Platform, S: Storage> Kernel<P, S> {
    pub fn new(mut platform: P, storage: S, memory: AddressSpace, signals: &'static Signals) -> Self {
        let video = *memory.video();
        let terminals = Terminals::new(&video, &mut platform);
        Self {
            platform,
            storage,
            memory,
            processes: ProcessTable::new(),
            terminals,
            scheduler: Scheduler::new(),
            keyboard: LineDiscipline::new(),
            rtc: VirtualRtc::new(),
            signals,
            idle_context: SavedContext::default(),
        }
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    pub fn processes(&self) -> &ProcessTable {
        &self.processes
    }

    pub fn terminals(&self) -> &Terminals {
        &self.terminals
    }

    pub fn memory(&self) -> &AddressSpace {
        &self.memory
    }

    pub fn rtc(&self) -> &VirtualRtc {
        &self.rtc
    }

    pub fn signals(&self) -> &'static Signals {
        self.signals
    }

    pub fn executing(&self) -> Option<TerminalId> {
        self.scheduler.executing()
    }

    /// The executing terminal and its active process.
    pub fn current(&self) -> Result<(TerminalId, Pid), SyscallError> {
        let tid = self.scheduler.executing().ok_or(SyscallError::NoProcess)?;
        let pid = self
            .terminals
            .get(tid)
            .and_then(|term| term.active)
            .ok_or(SyscallError::NoProcess)?;
        Ok((tid, pid))
    }

    /// Video mapping a process of terminal `tid` should draw through.
    pub(crate) fn video_target_for(&self, tid: TerminalId) -> VideoTarget {
        if tid == self.terminals.foreground() {
            VideoTarget::Foreground
        } else {
            VideoTarget::Terminal(tid)
        }
    }

    pub fn copy_from_user(&self, addr: VirtAddr, buf: &mut [u8]) -> Result<(), SyscallError> {
        let phys = self.memory.user_range(addr, buf.len())?;
        buf.copy_from_slice(self.platform.phys(phys, buf.len()));
        Ok(())
    }

    pub fn copy_to_user(&mut self, addr: VirtAddr, data: &[u8]) -> Result<(), SyscallError> {
        let phys = self.memory.user_range(addr, data.len())?;
        self.platform
            .phys_mut(phys, data.len())
            .copy_from_slice(data);
        Ok(())
    }

    /// Copy a NUL-terminated user string into `buf`, truncating at its end.
    pub fn copy_str_from_user(&self, addr: VirtAddr, buf: &mut [u8]) -> Result<usize, SyscallError> {
        for (i, slot) in buf.iter_mut().enumerate() {
            let at = addr
                .as_u64()
                .checked_add(i as u64)
                .and_then(|raw| VirtAddr::try_new(raw).ok())
                .ok_or(SyscallError::InvalidRange)?;
            let phys = self.memory.user_range(at, 1)?;
            let byte = self.platform.phys(phys, 1)[0];
            if byte == 0 {
                return Ok(i);
            }
            *slot = byte;
        }
        Ok(buf.len())
    }

    /// Keyboard interrupt: apply one scancode to the foreground terminal.
    pub fn keyboard(&mut self, scancode: u8) {
        let Some(action) = self.keyboard.feed(scancode) else {
            return;
        };
        let fg = self.terminals.foreground();
        match action {
            KeyAction::Char(byte) => {
                if self.terminals.push_input(fg, byte) {
                    self.terminals.print(fg, byte, &mut self.platform);
                }
            }
            KeyAction::Backspace => {
                if self.terminals.pop_input(fg) {
                    self.terminals.print(fg, 0x08, &mut self.platform);
                }
            }
            KeyAction::Enter => {
                if self.terminals.end_line(fg) {
                    self.terminals.print(fg, b'\n', &mut self.platform);
                    self.signals.line_ready[fg].raise();
                }
            }
            KeyAction::ClearScreen => {
                self.terminals.clear(fg, &mut self.platform);
                let mut pending = [0u8; LINE_BUFFER_SIZE];
                let line = self.terminals.get(fg).map_or(&[][..], |term| term.line());
                let len = line.len();
                pending[..len].copy_from_slice(line);
                self.terminals.write(fg, &pending[..len], &mut self.platform);
            }
            KeyAction::SwitchTerminal(target) => self.switch_terminal(target),
        }
    }

    /// Bring `target` to the front and refresh the executing terminal's
    /// video mapping, since its visibility may have changed.
    pub fn switch_terminal(&mut self, target: TerminalId) {
        if let Err(err) = self.terminals.switch_foreground(target, &mut self.platform) {
            crate::serial_println!("[tty] switch to {} failed: {}", target, err);
            return;
        }
        if let Some(tid) = self.scheduler.executing() {
            let video = self.video_target_for(tid);
            self.memory.remap_video(video, &mut self.platform);
        }
    }

    /// Periodic-timer interrupt.
    pub fn rtc_interrupt(&mut self) {
        self.rtc.tick(self.signals);
    }

    /// A user-mode exception: report it and kill the faulting process.
    ///
    /// A child hands `FAULT_STATUS` to its parent. A base shell has nobody
    /// to return to, so the terminal gets a fresh one instead.
    pub fn fault(&mut self, name: &str) -> Result<Exec, SyscallError> {
        let (tid, pid) = self.current()?;
        crate::serial_println!("[fault] {} in pid {} on terminal {}", name, pid, tid);
        self.terminals.write(tid, b"exception: ", &mut self.platform);
        self.terminals.write(tid, name.as_bytes(), &mut self.platform);
        self.terminals.print(tid, b'\n', &mut self.platform);

        if self.processes.get(pid).and_then(|pcb| pcb.parent).is_some() {
            return self.halt(FAULT_STATUS).map(Exec::Halt);
        }
        self.release(tid, pid);
        if let Some(term) = self.terminals.get_mut(tid) {
            term.active = None;
        }
        let restarted = self.execute(SHELL);
        if restarted.is_err() {
            if let Some(term) = self.terminals.get_mut(tid) {
                term.state = TerminalState::Idle;
            }
        }
        restarted
    }
}
