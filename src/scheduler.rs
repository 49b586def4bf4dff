// Timer-driven round robin over terminals
use crate::config::{NUM_TERMINALS, SHELL};
use crate::fs::Storage;
use crate::kernel::Kernel;
use crate::platform::Platform;
use crate::process::{Launch, Pid, SavedContext, TerminalId};
use crate::syscalls::Exec;
use crate::terminal::TerminalState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Scheduler {
    executing: Option<TerminalId>,
}

impl Scheduler {
    pub const fn new() -> Self {
        Self { executing: None }
    }

    /// Terminal holding the CPU. `None` until the first tick.
    pub fn executing(&self) -> Option<TerminalId> {
        self.executing
    }

    pub(crate) fn set_executing(&mut self, tid: Option<TerminalId>) {
        self.executing = tid;
    }

    pub fn next(&self) -> TerminalId {
        self.executing.map_or(0, |tid| (tid + 1) % NUM_TERMINALS)
    }
}

/// The stack switch a tick asks for. Carried out by the interrupt handler
/// once the kernel lock is released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Switch {
    /// Keep running the interrupted context.
    Stay,
    /// Save the interrupted context into `save` and continue `restore`.
    Resume {
        save: *mut SavedContext,
        restore: *const SavedContext,
    },
    /// Save the interrupted context into `launch.resume_point` and start a
    /// terminal's first shell.
    Start(Launch),
}

impl<P: Platform, S: Storage> Kernel<P, S> {
    /// Hand the CPU to the next terminal in rotation.
    pub fn tick(&mut self) -> Switch {
        let previous = self.scheduler.executing();
        let next = self.scheduler.next();
        let save = self.save_slot(previous);

        let video = self.video_target_for(next);
        self.memory.remap_video(video, &mut self.platform);

        let Some(term) = self.terminals.get(next) else {
            return Switch::Stay;
        };
        match (term.state, term.active) {
            (TerminalState::Running, Some(pid)) => {
                self.memory.map_process(pid, &mut self.platform);
                self.platform.set_kernel_stack(pid);
                self.scheduler.set_executing(Some(next));
                match self.processes.get(pid) {
                    Some(pcb) => Switch::Resume {
                        save,
                        restore: &pcb.sched_context,
                    },
                    None => Switch::Stay,
                }
            }
            _ => self.start_shell(previous, next, save),
        }
    }

    fn start_shell(
        &mut self,
        previous: Option<TerminalId>,
        next: TerminalId,
        save: *mut SavedContext,
    ) -> Switch {
        self.set_state(next, TerminalState::Running);
        self.scheduler.set_executing(Some(next));

        match self.execute(SHELL) {
            Ok(Exec::Launch(mut launch)) => {
                crate::serial_println!("[sched] terminal {} started shell pid {}", next, launch.pid);
                launch.resume_point = save;
                Switch::Start(launch)
            }
            outcome => {
                crate::serial_println!("[sched] terminal {} shell failed: {:?}", next, outcome.err());
                self.set_state(next, TerminalState::Idle);
                self.scheduler.set_executing(previous);
                if let Some(tid) = previous {
                    let video = self.video_target_for(tid);
                    self.memory.remap_video(video, &mut self.platform);
                    if let Some(pid) = self.active(tid) {
                        self.memory.map_process(pid, &mut self.platform);
                        self.platform.set_kernel_stack(pid);
                    }
                }
                Switch::Stay
            }
        }
    }

    /// Where the context running on `tid` is saved when it loses the CPU.
    fn save_slot(&mut self, tid: Option<TerminalId>) -> *mut SavedContext {
        let pid = tid.and_then(|tid| self.active(tid));
        match pid.and_then(|pid| self.processes.get_mut(pid)) {
            Some(pcb) => &mut pcb.sched_context,
            None => &mut self.idle_context,
        }
    }

    fn active(&self, tid: TerminalId) -> Option<Pid> {
        self.terminals.get(tid)?.active
    }

    fn set_state(&mut self, tid: TerminalId, state: TerminalState) {
        if let Some(term) = self.terminals.get_mut(tid) {
            term.state = state;
        }
    }
}

/// Initialize the PIT for timer interrupts.
/// `hz` = frequency in Hertz.
#[cfg(feature = "bare-metal")]
pub fn init_pit(hz: u32) {
    use x86_64::instructions::port::Port;

    let divisor: u16 = (1_193_182 / hz) as u16; // PIT runs at 1.193182 MHz
    unsafe {
        let mut command = Port::<u8>::new(0x43);
        let mut channel0 = Port::<u8>::new(0x40);

        // channel 0, low/high byte access, mode 2 (rate generator), binary
        command.write(0x36);
        channel0.write((divisor & 0xFF) as u8);
        channel0.write((divisor >> 8) as u8);
    }
    crate::serial_println!("[sched] PIT at {} Hz", hz);
}
