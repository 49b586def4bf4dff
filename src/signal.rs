//! Single-slot condition flags raised from interrupt handlers.
//!
//! A blocked `read` waits on one of these instead of spinning on a plain
//! variable: the caller parks the CPU until an interrupt arrives and only
//! re-checks the kernel state once the handler has raised the flag.

use core::future::Future;
use core::pin::{pin, Pin};
use core::sync::atomic::{AtomicBool, Ordering};
use core::task::{Context, Poll};

use futures_util::task::noop_waker_ref;

use crate::config::NUM_TERMINALS;

#[derive(Debug)]
pub struct Signal {
    raised: AtomicBool,
}

impl Signal {
    pub const fn new() -> Self {
        Self {
            raised: AtomicBool::new(false),
        }
    }

    /// Called from interrupt context.
    pub fn raise(&self) {
        self.raised.store(true, Ordering::Release);
    }

    pub fn is_raised(&self) -> bool {
        self.raised.load(Ordering::Acquire)
    }

    /// Consume the flag, returning whether it was set.
    pub fn take(&self) -> bool {
        self.raised.swap(false, Ordering::AcqRel)
    }

    pub fn clear(&self) {
        self.raised.store(false, Ordering::Release);
    }

    /// Resolves once the flag is raised. Does not consume it.
    pub fn wait(&self) -> Wait<'_> {
        Wait { signal: self }
    }
}

impl Default for Signal {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Wait<'a> {
    signal: &'a Signal,
}

impl Future for Wait<'_> {
    type Output = ();

    // Nothing is registered: `block_on` re-polls after every interrupt.
    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<()> {
        if self.signal.is_raised() {
            Poll::Ready(())
        } else {
            Poll::Pending
        }
    }
}

/// Drive `future` to completion on the current (only) CPU.
///
/// `idle` is called whenever the future is pending; on bare metal it halts
/// until the next interrupt, which is the only thing that can make progress.
pub fn block_on<F: Future>(future: F, mut idle: impl FnMut()) -> F::Output {
    let mut future = pin!(future);
    let mut cx = Context::from_waker(noop_waker_ref());
    loop {
        if let Poll::Ready(output) = future.as_mut().poll(&mut cx) {
            return output;
        }
        idle();
    }
}

/// Every interrupt-raised flag the kernel waits on.
#[derive(Debug)]
pub struct Signals {
    pub line_ready: [Signal; NUM_TERMINALS],
    pub rtc_tick: [Signal; NUM_TERMINALS],
}

impl Signals {
    pub const fn new() -> Self {
        Self {
            line_ready: [const { Signal::new() }; NUM_TERMINALS],
            rtc_tick: [const { Signal::new() }; NUM_TERMINALS],
        }
    }
}

impl Default for Signals {
    fn default() -> Self {
        Self::new()
    }
}
