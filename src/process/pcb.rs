// Process Control Block and the fixed-capacity process table
use core::fmt;

use crate::config::{ARG_BUFFER_SIZE, FIRST_FREE_FD, NUM_FDS, NUM_PROCESSES};
use crate::process::{Backend, OpenFile, Pid, SavedContext};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessControlBlock {
    /// `None` for the base shell of a terminal.
    pub parent: Option<Pid>,
    /// The `execute` call that launched this process; `halt` resumes it.
    pub resume_point: SavedContext,
    /// Where the scheduler left this process when it was preempted.
    pub sched_context: SavedContext,
    pub fds: [Option<OpenFile>; NUM_FDS],
    args: [u8; ARG_BUFFER_SIZE],
    args_len: usize,
}

impl ProcessControlBlock {
    fn new(parent: Option<Pid>) -> Self {
        let mut fds = [None; NUM_FDS];
        fds[0] = Some(OpenFile::stdin());
        fds[1] = Some(OpenFile::stdout());
        Self {
            parent,
            resume_point: SavedContext::default(),
            sched_context: SavedContext::default(),
            fds,
            args: [0; ARG_BUFFER_SIZE],
            args_len: 0,
        }
    }

    /// Replace the recorded argument text, truncated to the buffer.
    pub fn set_args(&mut self, args: &[u8]) {
        let len = args.len().min(ARG_BUFFER_SIZE);
        self.args = [0; ARG_BUFFER_SIZE];
        self.args[..len].copy_from_slice(&args[..len]);
        self.args_len = len;
    }

    pub fn args(&self) -> &[u8] {
        &self.args[..self.args_len]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessError {
    TableFull,
    NoSuchProcess,
    DescriptorTableFull,
    /// Descriptors 0 and 1 cannot be closed.
    ReservedDescriptor,
    BadDescriptor,
}

impl fmt::Display for ProcessError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ProcessError::TableFull => write!(f, "No free process slot"),
            ProcessError::NoSuchProcess => write!(f, "No such process"),
            ProcessError::DescriptorTableFull => write!(f, "No free descriptor"),
            ProcessError::ReservedDescriptor => write!(f, "Descriptor is reserved"),
            ProcessError::BadDescriptor => write!(f, "Descriptor not open"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessTable {
    slots: [Option<ProcessControlBlock>; NUM_PROCESSES],
}

impl ProcessTable {
    pub const fn new() -> Self {
        Self {
            slots: [const { None }; NUM_PROCESSES],
        }
    }

    /// Allocate the lowest free slot.
    pub fn create(&mut self, parent: Option<Pid>) -> Result<Pid, ProcessError> {
        let pid = self
            .slots
            .iter()
            .position(Option::is_none)
            .ok_or(ProcessError::TableFull)?;
        self.slots[pid] = Some(ProcessControlBlock::new(parent));
        Ok(pid)
    }

    /// Release `pid` and everything it holds. No-op when already free.
    pub fn destroy(&mut self, pid: Pid) {
        if let Some(slot) = self.slots.get_mut(pid) {
            *slot = None;
        }
    }

    pub fn exists(&self, pid: Pid) -> bool {
        self.get(pid).is_some()
    }

    pub fn get(&self, pid: Pid) -> Option<&ProcessControlBlock> {
        self.slots.get(pid)?.as_ref()
    }

    pub fn get_mut(&mut self, pid: Pid) -> Option<&mut ProcessControlBlock> {
        self.slots.get_mut(pid)?.as_mut()
    }

    pub fn count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    /// Follow parent links up to the base shell of `pid`'s tree.
    pub fn find_base(&self, pid: Option<Pid>) -> Option<Pid> {
        let mut current = pid?;
        // A chain longer than the table means a corrupt parent link.
        for _ in 0..NUM_PROCESSES {
            match self.get(current)?.parent {
                Some(parent) => current = parent,
                None => return Some(current),
            }
        }
        None
    }

    /// Bind the lowest free descriptor at or above 2.
    pub fn add_fd(&mut self, pid: Pid, backend: Backend, object: u32) -> Result<usize, ProcessError> {
        let pcb = self.get_mut(pid).ok_or(ProcessError::NoSuchProcess)?;
        let fd = (FIRST_FREE_FD..NUM_FDS)
            .find(|&fd| pcb.fds[fd].is_none())
            .ok_or(ProcessError::DescriptorTableFull)?;
        pcb.fds[fd] = Some(OpenFile::new(backend, object));
        Ok(fd)
    }

    /// Unbind `fd`, handing back what it was bound to for the close hook.
    pub fn remove_fd(&mut self, pid: Pid, fd: usize) -> Result<OpenFile, ProcessError> {
        if fd >= NUM_FDS {
            return Err(ProcessError::BadDescriptor);
        }
        if fd < FIRST_FREE_FD {
            return Err(ProcessError::ReservedDescriptor);
        }
        let pcb = self.get_mut(pid).ok_or(ProcessError::NoSuchProcess)?;
        pcb.fds[fd].take().ok_or(ProcessError::BadDescriptor)
    }

    pub fn fd(&self, pid: Pid, fd: usize) -> Result<OpenFile, ProcessError> {
        let pcb = self.get(pid).ok_or(ProcessError::NoSuchProcess)?;
        pcb.fds
            .get(fd)
            .copied()
            .flatten()
            .ok_or(ProcessError::BadDescriptor)
    }

    pub fn fd_mut(&mut self, pid: Pid, fd: usize) -> Result<&mut OpenFile, ProcessError> {
        let pcb = self.get_mut(pid).ok_or(ProcessError::NoSuchProcess)?;
        pcb.fds
            .get_mut(fd)
            .and_then(Option::as_mut)
            .ok_or(ProcessError::BadDescriptor)
    }
}

impl Default for ProcessTable {
    fn default() -> Self {
        Self::new()
    }
}
