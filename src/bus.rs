//! The collaborators the protocol engine runs on: a blocking addressed bus
//! primitive and a task delay.

use std::time::Duration;

/// Failures of a single bus phase.
#[derive(thiserror::Error, Debug)]
pub enum BusError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("short write to 0x{address:02X}: {written} of {expected} bytes")]
    ShortWrite {
        address: u8,
        written: usize,
        expected: usize,
    },

    #[error("short read from 0x{address:02X}: {read} of {expected} bytes")]
    ShortRead {
        address: u8,
        read: usize,
        expected: usize,
    },

    #[error("no acknowledge from 0x{0:02X}")]
    NoAcknowledge(u8),

    #[error("bus timed out")]
    Timeout,
}

/// Blocking write-then-read over an addressed bus.
pub trait Bus {
    /// Writes `tx` to `address` and then reads `rx.len()` bytes back.
    ///
    /// An empty `tx` skips the write phase and an empty `rx` skips the read
    /// phase. Either phase fails if it transfers fewer bytes than requested
    /// or does not finish within `timeout`.
    fn perform(
        &mut self,
        address: u8,
        tx: &[u8],
        rx: &mut [u8],
        timeout: Duration,
    ) -> Result<(), BusError>;
}

impl<T: Bus + ?Sized> Bus for Box<T> {
    fn perform(
        &mut self,
        address: u8,
        tx: &[u8],
        rx: &mut [u8],
        timeout: Duration,
    ) -> Result<(), BusError> {
        (**self).perform(address, tx, rx, timeout)
    }
}

/// Suspends the calling task for at least the requested time.
pub trait Delay {
    fn delay(&self, duration: Duration);
}

/// [`Delay`] backed by [`std::thread::sleep`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleep;

impl Delay for ThreadSleep {
    fn delay(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}
