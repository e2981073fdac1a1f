//! A library for commanding an EPS motherboard and its battery boards over an
//! addressed two-wire bus.
//!
//! The crate offers two ways to talk to the boards:
//!
//! 1.  **Handles**: [`sync_client::Eps`] and [`sync_client::Bat`] (blocking)
//!     or their `async` twins in [`async_client`]. Each handle shares one bus
//!     with other handles and keeps a command's request and response together
//!     under the bus lock.
//!
//! 2.  **Operations**: the [`eps`] and [`bat`] modules build typed request
//!     frames and response decoders without doing any I/O, for callers that
//!     drive the bus themselves.
//!
//! ## Features
//!
//! - **Complete command tables** for the EPS motherboard and both battery units.
//! - **Range checked arguments**: out of range PDM switches, PCM masks,
//!   watchdog periods, heater codes and timer limits never reach the bus.
//! - **Error escalation**: a command the board refuses is followed by a
//!   "get last error" query, and the cause ends up in [`Error::Firmware`].
//! - **Calibrated telemetry** per hardware unit, see [`telemetry`].
//!
//! ## Quick Start
//!
//! ```no_run
//! use eps_bat_lib::{bus::Bus, sync_client::Eps, telemetry::EpsChannel};
//!
//! fn report<B: Bus>(bus: B) -> eps_bat_lib::Result<()> {
//!     let eps = Eps::new(bus);
//!
//!     eps.switch_pdm_on(4)?;
//!     let states = eps.all_pdm_actual_state()?;
//!     println!("PDM states: 0x{states:03X}");
//!     println!("5V bus: {:.3} V", eps.telemetry(EpsChannel::Vpcm5v)?);
//!
//!     Ok(())
//! }
//! ```
//!
//! On Linux, enable the `linux-i2c` feature and pass a `linux_i2c::I2cDev`
//! opened on `/dev/i2c-N` as the bus.

pub mod bat;
pub mod bus;
pub mod config;
pub mod eps;
pub mod error;
pub mod output;
pub mod protocol;
pub mod sync_client;
pub mod telemetry;
pub mod transaction;

#[cfg_attr(docsrs, doc(cfg(feature = "async-client")))]
#[cfg(feature = "async-client")]
pub mod async_client;

#[cfg_attr(docsrs, doc(cfg(feature = "linux-i2c")))]
#[cfg(feature = "linux-i2c")]
pub mod linux_i2c;

pub use error::{Error, Result};
