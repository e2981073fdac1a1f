//! Output slots that are never left stale.
//!
//! For callers that keep the last reading in a long lived variable, such as a
//! housekeeping packet: a command that fails after reaching the bus writes a
//! fixed poison value into the slot instead of leaving the previous reading.
//!
//! ```
//! use eps_bat_lib::output::{Poison, StoreExt};
//!
//! let mut version: u16 = 0x0102;
//! let failed: eps_bat_lib::Result<u16> =
//!     Err(eps_bat_lib::bus::BusError::Timeout.into());
//! assert!(failed.store(&mut version).is_err());
//! assert_eq!(version, u16::POISON);
//! ```

use crate::error::Result;

/// Value an output takes when its command failed.
pub trait Poison: Copy {
    const POISON: Self;
}

/// EPS board status.
impl Poison for u8 {
    const POISON: Self = 0xFF;
}

impl Poison for u16 {
    const POISON: Self = 0xFFFF;
}

/// All-PDM state words.
impl Poison for u32 {
    const POISON: Self = 0xFFFF_FFFF;
}

/// Telemetry readings.
impl Poison for f32 {
    const POISON: Self = 0.0;
}

pub trait StoreExt<T> {
    /// Writes the value on success or the poison on a poisoning failure,
    /// and hands the status back.
    fn store(self, out: &mut T) -> Result<()>;
}

impl<T: Poison> StoreExt<T> for Result<T> {
    fn store(self, out: &mut T) -> Result<()> {
        match self {
            Ok(value) => {
                *out = value;
                Ok(())
            }
            Err(error) => {
                if error.poisons_output() {
                    *out = T::POISON;
                }
                Err(error)
            }
        }
    }
}
