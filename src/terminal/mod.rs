//! Terminal multiplexer.
//!
//! Three virtual terminals share one text screen. The foreground terminal
//! owns the live framebuffer; the others draw into private pages that are
//! swapped in when they become visible. Which terminal is visible is
//! independent of which one the scheduler is running.

pub mod screen;

use core::fmt;

use x86_64::PhysAddr;

use crate::config::{LINE_BUFFER_SIZE, NUM_TERMINALS, SCREEN_BYTES, TERMINAL_ATTRIBUTES};
use crate::memory::VideoLayout;
use crate::platform::Platform;
use crate::process::{Pid, TerminalId};
pub use screen::Cursor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalState {
    /// No shell has been started yet.
    Idle,
    Running,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalError {
    InvalidTerminal,
}

impl fmt::Display for TerminalError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TerminalError::InvalidTerminal => write!(f, "No such terminal"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Terminal {
    /// Deepest live process of this terminal's tree.
    pub active: Option<Pid>,
    pub state: TerminalState,
    pub cursor: Cursor,
    line: [u8; LINE_BUFFER_SIZE],
    line_len: usize,
    attribute: u8,
    page: PhysAddr,
}

impl Terminal {
    pub fn line(&self) -> &[u8] {
        &self.line[..self.line_len]
    }

    pub fn attribute(&self) -> u8 {
        self.attribute
    }

    /// Enter was pressed and nobody has read the line yet.
    pub fn line_finished(&self) -> bool {
        self.line().last() == Some(&b'\n')
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Terminals {
    terms: [Terminal; NUM_TERMINALS],
    foreground: TerminalId,
    live: PhysAddr,
}

impl Terminals {
    /// Blank every page; terminal 0 starts visible.
    pub fn new<P: Platform>(video: &VideoLayout, hw: &mut P) -> Self {
        let terms = core::array::from_fn(|tid| Terminal {
            active: None,
            state: TerminalState::Idle,
            cursor: Cursor::default(),
            line: [0; LINE_BUFFER_SIZE],
            line_len: 0,
            attribute: TERMINAL_ATTRIBUTES[tid],
            page: video.terminals[tid],
        });
        let mut terminals = Self {
            terms,
            foreground: 0,
            live: video.live,
        };
        for tid in 0..NUM_TERMINALS {
            let attribute = terminals.terms[tid].attribute;
            let mut cursor = Cursor::default();
            screen::clear(hw.phys_mut(terminals.terms[tid].page, SCREEN_BYTES), &mut cursor, attribute);
        }
        terminals.clear(0, hw);
        terminals
    }

    pub fn foreground(&self) -> TerminalId {
        self.foreground
    }

    pub fn get(&self, tid: TerminalId) -> Option<&Terminal> {
        self.terms.get(tid)
    }

    pub fn get_mut(&mut self, tid: TerminalId) -> Option<&mut Terminal> {
        self.terms.get_mut(tid)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Terminal> {
        self.terms.iter()
    }

    /// Make `target` the visible terminal.
    ///
    /// A terminal that has never run has nothing to show, so switching to
    /// it does nothing.
    pub fn switch_foreground<P: Platform>(
        &mut self,
        target: TerminalId,
        hw: &mut P,
    ) -> Result<(), TerminalError> {
        if target == self.foreground {
            return Ok(());
        }
        if target >= NUM_TERMINALS {
            return Err(TerminalError::InvalidTerminal);
        }
        if self.terms[target].state == TerminalState::Idle {
            return Ok(());
        }

        let mut saved = [0u8; SCREEN_BYTES];
        saved.copy_from_slice(hw.phys(self.live, SCREEN_BYTES));
        hw.phys_mut(self.terms[self.foreground].page, SCREEN_BYTES)
            .copy_from_slice(&saved);

        saved.copy_from_slice(hw.phys(self.terms[target].page, SCREEN_BYTES));
        hw.phys_mut(self.live, SCREEN_BYTES).copy_from_slice(&saved);

        self.foreground = target;
        let cursor = self.terms[target].cursor;
        hw.set_cursor(cursor.x, cursor.y);
        crate::serial_println!("[tty] foreground -> terminal {}", target);
        Ok(())
    }

    /// Draw `byte` on terminal `tid`.
    ///
    /// The visible terminal draws straight to the live framebuffer and
    /// moves the hardware cursor; the others draw into their private page.
    /// Being visible is enough: the foreground terminal draws live even
    /// while another terminal holds the CPU, because keyboard echo arrives
    /// from interrupt context and its private page is stale until the next
    /// switch away.
    pub fn print<P: Platform>(&mut self, tid: TerminalId, byte: u8, hw: &mut P) {
        let visible = tid == self.foreground;
        let Some(term) = self.terms.get_mut(tid) else {
            return;
        };
        let page = if visible { self.live } else { term.page };
        screen::put_byte(hw.phys_mut(page, SCREEN_BYTES), &mut term.cursor, byte, term.attribute);
        if visible {
            hw.set_cursor(term.cursor.x, term.cursor.y);
        }
    }

    pub fn write<P: Platform>(&mut self, tid: TerminalId, bytes: &[u8], hw: &mut P) {
        for &byte in bytes {
            self.print(tid, byte, hw);
        }
    }

    /// Blank `tid`'s screen and home its cursor.
    pub fn clear<P: Platform>(&mut self, tid: TerminalId, hw: &mut P) {
        let visible = tid == self.foreground;
        let Some(term) = self.terms.get_mut(tid) else {
            return;
        };
        let page = if visible { self.live } else { term.page };
        screen::clear(hw.phys_mut(page, SCREEN_BYTES), &mut term.cursor, term.attribute);
        if visible {
            hw.set_cursor(0, 0);
        }
    }

    /// Append a typed byte, leaving room for the terminating newline.
    ///
    /// A finished line is frozen until it has been read.
    pub fn push_input(&mut self, tid: TerminalId, byte: u8) -> bool {
        let Some(term) = self.terms.get_mut(tid) else {
            return false;
        };
        if term.line_finished() || term.line_len >= LINE_BUFFER_SIZE - 1 {
            return false;
        }
        term.line[term.line_len] = byte;
        term.line_len += 1;
        true
    }

    /// Finish the pending line with a newline. False if it already was.
    pub fn end_line(&mut self, tid: TerminalId) -> bool {
        match self.terms.get_mut(tid) {
            Some(term) if !term.line_finished() && term.line_len < LINE_BUFFER_SIZE => {
                term.line[term.line_len] = b'\n';
                term.line_len += 1;
                true
            }
            _ => false,
        }
    }

    pub fn pop_input(&mut self, tid: TerminalId) -> bool {
        match self.terms.get_mut(tid) {
            Some(term) if term.line_len > 0 && !term.line_finished() => {
                term.line_len -= 1;
                true
            }
            _ => false,
        }
    }

    /// Move up to `buf.len()` bytes of the pending line out, discarding the
    /// whole line.
    pub fn take_line(&mut self, tid: TerminalId, buf: &mut [u8]) -> usize {
        let Some(term) = self.terms.get_mut(tid) else {
            return 0;
        };
        let count = buf.len().min(term.line_len);
        buf[..count].copy_from_slice(&term.line[..count]);
        term.line_len = 0;
        count
    }
}
