// Virtual periodic-timer device: one client per terminal over the 1024 Hz RTC
use core::fmt;

use crate::config::{NUM_TERMINALS, RTC_BASE_HZ, RTC_DEFAULT_HZ};
use crate::process::{Pid, TerminalId};
use crate::signal::{Signal, Signals};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RtcError {
    InvalidFrequency,
    /// Frequency writes carry exactly one u32.
    BadLength,
    NotOpen,
}

impl fmt::Display for RtcError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RtcError::InvalidFrequency => write!(f, "Frequency below 2 Hz"),
            RtcError::BadLength => write!(f, "Frequency must be 4 bytes"),
            RtcError::NotOpen => write!(f, "RTC not open on this terminal"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Client {
    owner: Pid,
    /// Base interrupts per virtual tick.
    rate: u32,
    count: u32,
    /// A read is parked waiting for the next virtual tick.
    waiting: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualRtc {
    clients: [Option<Client>; NUM_TERMINALS],
}

impl VirtualRtc {
    pub const fn new() -> Self {
        Self {
            clients: [None; NUM_TERMINALS],
        }
    }

    /// Bind `tid`'s client to `owner` at the default rate.
    pub fn open(&mut self, tid: TerminalId, owner: Pid) {
        self.clients[tid] = Some(Client {
            owner,
            rate: RTC_BASE_HZ / RTC_DEFAULT_HZ,
            count: 0,
            waiting: false,
        });
    }

    /// Set the virtual frequency from a little-endian u32; returns the
    /// bytes consumed.
    pub fn set_frequency(&mut self, tid: TerminalId, bytes: &[u8]) -> Result<usize, RtcError> {
        let client = self.clients[tid].as_mut().ok_or(RtcError::NotOpen)?;
        let raw: [u8; 4] = bytes.try_into().map_err(|_| RtcError::BadLength)?;
        let requested = u32::from_le_bytes(raw);
        if requested < 2 {
            return Err(RtcError::InvalidFrequency);
        }
        let hz = (1u32 << (31 - requested.leading_zeros())).min(RTC_BASE_HZ);
        client.rate = RTC_BASE_HZ / hz;
        client.count = 0;
        Ok(raw.len())
    }

    /// Frequency `tid`'s client currently runs at.
    pub fn frequency(&self, tid: TerminalId) -> Option<u32> {
        self.clients.get(tid)?.map(|client| RTC_BASE_HZ / client.rate)
    }

    /// Try to complete a read: `Ok(true)` once a virtual tick has happened
    /// since the read started.
    pub fn poll_read(&mut self, tid: TerminalId, tick: &Signal) -> Result<bool, RtcError> {
        let client = self.clients[tid].as_mut().ok_or(RtcError::NotOpen)?;
        if !client.waiting {
            tick.clear();
            client.waiting = true;
            return Ok(false);
        }
        if tick.take() {
            client.waiting = false;
            return Ok(true);
        }
        Ok(false)
    }

    /// Unbind the client if `owner` holds it.
    pub fn close(&mut self, tid: TerminalId, owner: Pid) {
        if self.clients[tid].map_or(false, |client| client.owner == owner) {
            self.clients[tid] = None;
        }
    }

    /// One base-rate interrupt.
    pub fn tick(&mut self, signals: &Signals) {
        for (tid, slot) in self.clients.iter_mut().enumerate() {
            if let Some(client) = slot {
                client.count += 1;
                if client.count >= client.rate {
                    client.count = 0;
                    signals.rtc_tick[tid].raise();
                }
            }
        }
    }
}

impl Default for VirtualRtc {
    fn default() -> Self {
        Self::new()
    }
}
