//! Crate level error type.
//!
//! A failed command falls in one of three classes: the arguments were
//! rejected before any bus traffic, the bus itself failed, or the board
//! answered with the all-ones sentinel.
use crate::{bus::BusError, protocol as proto};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Argument rejected, nothing was sent.
    #[error(transparent)]
    Protocol(#[from] proto::Error),

    #[error(transparent)]
    Bus(#[from] BusError),

    /// The board reported that the command did not execute.
    ///
    /// `cause` is `None` when the follow-up "get last error" command failed too.
    #[error("command 0x{opcode:02X} failed on board: {}", describe(.cause))]
    Firmware {
        opcode: u8,
        cause: Option<proto::FirmwareError>,
    },

    #[error("bus lock poisoned by a panicking thread")]
    LockPoisoned,
}

impl Error {
    /// Whether the failure overwrites an output slot with its poison value.
    ///
    /// Rejected arguments leave outputs alone. An unknown telemetry register
    /// still yields a zero reading.
    pub fn poisons_output(&self) -> bool {
        match self {
            Self::Protocol(proto::Error::UnknownChannel(_)) => true,
            Self::Protocol(_) => false,
            Self::Bus(_) | Self::Firmware { .. } | Self::LockPoisoned => true,
        }
    }
}

fn describe(cause: &Option<proto::FirmwareError>) -> String {
    match cause {
        Some(cause) => cause.to_string(),
        None => "cause unknown".to_string(),
    }
}

/// The result type for board operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poisoning_by_class() {
        assert!(!Error::from(proto::Error::PdmChannelOutOfRange(0)).poisons_output());
        assert!(Error::from(proto::Error::UnknownChannel(0x1234)).poisons_output());
        assert!(Error::from(BusError::Timeout).poisons_output());
        assert!(Error::Firmware {
            opcode: 0x04,
            cause: None
        }
        .poisons_output());
    }

    #[test]
    fn firmware_message() {
        let error = Error::Firmware {
            opcode: 0x54,
            cause: Some(proto::FirmwareError::ChannelInactive),
        };
        assert_eq!(
            error.to_string(),
            "command 0x54 failed on board: selected channel is currently inactive"
        );
        let error = Error::Firmware {
            opcode: 0x10,
            cause: None,
        };
        assert_eq!(error.to_string(), "command 0x10 failed on board: cause unknown");
    }
}
