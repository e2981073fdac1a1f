//! [`Bus`] over a Linux `/dev/i2c-N` character device.

use crate::bus::{Bus, BusError};
use log::*;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::os::unix::io::AsRawFd;
use std::path::Path;
use std::time::Duration;

nix::ioctl_write_int_bad!(i2c_timeout, 0x0702);
nix::ioctl_write_int_bad!(i2c_slave, 0x0703);

/// An open i2c-dev adapter.
///
/// The target address and timeout are only re-sent to the kernel when they
/// change between calls.
#[derive(Debug)]
pub struct I2cDev {
    file: File,
    address: Option<u8>,
    timeout: Option<Duration>,
}

impl I2cDev {
    pub fn open(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref();
        debug!("Opening i2c adapter {path:?}");
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Ok(Self {
            file,
            address: None,
            timeout: None,
        })
    }

    fn select(&mut self, address: u8, timeout: Duration) -> Result<(), BusError> {
        if self.address != Some(address) {
            // SAFETY: the descriptor is owned by `self.file` and stays open.
            unsafe { i2c_slave(self.file.as_raw_fd(), address.into()) }
                .map_err(std::io::Error::from)?;
            self.address = Some(address);
        }
        if self.timeout != Some(timeout) {
            // the adapter counts in units of 10 ms
            let ticks = timeout.as_millis().div_ceil(10).clamp(1, i32::MAX as u128) as i32;
            // SAFETY: as above.
            unsafe { i2c_timeout(self.file.as_raw_fd(), ticks) }
                .map_err(std::io::Error::from)?;
            self.timeout = Some(timeout);
        }
        Ok(())
    }
}

fn map_io(error: std::io::Error, address: u8) -> BusError {
    match error.raw_os_error() {
        Some(code) if code == nix::errno::Errno::ENXIO as i32 => BusError::NoAcknowledge(address),
        Some(code) if code == nix::errno::Errno::ETIMEDOUT as i32 => BusError::Timeout,
        _ => BusError::Io(error),
    }
}

impl Bus for I2cDev {
    fn perform(
        &mut self,
        address: u8,
        tx: &[u8],
        rx: &mut [u8],
        timeout: Duration,
    ) -> Result<(), BusError> {
        self.select(address, timeout)?;
        if !tx.is_empty() {
            let written = self.file.write(tx).map_err(|e| map_io(e, address))?;
            if written != tx.len() {
                return Err(BusError::ShortWrite {
                    address,
                    written,
                    expected: tx.len(),
                });
            }
        }
        if !rx.is_empty() {
            let read = self.file.read(rx).map_err(|e| map_io(e, address))?;
            if read != rx.len() {
                return Err(BusError::ShortRead {
                    address,
                    read,
                    expected: rx.len(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn missing_adapter() {
        assert!(I2cDev::open("/dev/i2c-does-not-exist").is_err());
    }

    #[test]
    fn errno_mapping() {
        let nack = std::io::Error::from_raw_os_error(nix::errno::Errno::ENXIO as i32);
        assert_matches!(map_io(nack, 0x2B), BusError::NoAcknowledge(0x2B));
        let timeout = std::io::Error::from_raw_os_error(nix::errno::Errno::ETIMEDOUT as i32);
        assert_matches!(map_io(timeout, 0x2B), BusError::Timeout);
        let other = std::io::Error::from_raw_os_error(nix::errno::Errno::EIO as i32);
        assert_matches!(map_io(other, 0x2B), BusError::Io(_));
    }
}
