//! Operations of the battery boards.
//!
//! All battery responses are two bytes. A word of `0xFFFF` means the command
//! did not run.

use crate::{
    protocol::{self as proto, BatCommand as Cmd, FirmwareError, HeaterCode},
    telemetry::BatChannel,
    transaction::{Dialect, Operation, Reply, Request, Response},
};
use std::time::Duration;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(100);

fn error_code(response: &Response) -> u16 {
    response.word()
}

pub static DIALECT: Dialect = Dialect {
    last_error: Cmd::GetLastError.descriptor(),
    error_code,
};

fn word(response: &Response) -> Reply<u16> {
    Reply::from_word(response.word())
}

fn query(command: Cmd, decode: fn(&Response) -> Reply<u16>) -> Operation<u16> {
    Operation::new(Request::new(command.descriptor()), decode)
}

/// Status flags in the high byte of the word.
pub fn board_status() -> Operation<u16> {
    query(Cmd::GetBoardStatus, |response| {
        word(response).map(|status| (status & 0xFF00) >> 8)
    })
}

pub fn last_error() -> Operation<FirmwareError> {
    Operation::new(Request::new(Cmd::GetLastError.descriptor()), |response| {
        Reply::Value(FirmwareError::from(error_code(response)))
    })
}

pub fn version() -> Operation<u16> {
    query(Cmd::GetVersion, word)
}

pub fn checksum() -> Operation<u16> {
    query(Cmd::GetChecksum, word)
}

/// Raw ADC word of one telemetry channel.
pub fn telemetry(channel: BatChannel) -> Operation<u16> {
    Operation::new(
        Request::with_word(Cmd::GetTelemetry.descriptor(), channel.register()),
        word,
    )
}

pub fn brown_out_resets() -> Operation<u16> {
    query(Cmd::GetBrownOutResets, word)
}

pub fn auto_software_resets() -> Operation<u16> {
    query(Cmd::GetAutoSoftwareResets, word)
}

pub fn manual_resets() -> Operation<u16> {
    query(Cmd::GetManualResets, word)
}

/// `1` when the heater controller is enabled.
pub fn heater_status() -> Operation<u16> {
    query(Cmd::GetHeaterStatus, |response| {
        word(response).map(|status| status & 0x0001)
    })
}

pub fn set_heater_status(code: u8) -> Result<Operation<()>, proto::Error> {
    let code = HeaterCode::try_from(code)?;
    Ok(Operation::write_only(Request::with_param(
        Cmd::SetHeaterStatus.descriptor(),
        code as u8,
    )))
}

pub fn manual_reset() -> Operation<()> {
    Operation::write_only(Request::new(Cmd::ManualReset.descriptor()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn request_frames() {
        assert_eq!(board_status().request().frame(), &[0x01, 0x00]);
        assert_eq!(
            telemetry(BatChannel::Vbat).request().frame(),
            &[0x10, 0xE2, 0x80]
        );
        assert_eq!(heater_status().request().frame(), &[0x90, 0x00]);
        assert_eq!(
            set_heater_status(1).unwrap().request().frame(),
            &[0x91, 0x01]
        );
        assert_eq!(manual_reset().request().frame(), &[0x80, 0x00]);
    }

    #[test]
    fn heater_code_range() {
        assert_matches!(set_heater_status(0), Ok(_));
        assert_matches!(
            set_heater_status(2),
            Err(proto::Error::HeaterCodeOutOfRange(2))
        );
    }

    #[test]
    fn board_status_high_byte() {
        let response = Response::from_bytes(&[0x5A, 0x01]);
        assert_eq!(board_status().decode(&response), Reply::Value(0x5A));
        let response = Response::from_bytes(&[0xFF, 0xFF]);
        assert_eq!(board_status().decode(&response), Reply::Sentinel);
    }

    #[test]
    fn heater_status_low_bit() {
        let response = Response::from_bytes(&[0x12, 0x35]);
        assert_eq!(heater_status().decode(&response), Reply::Value(1));
        let response = Response::from_bytes(&[0x12, 0x34]);
        assert_eq!(heater_status().decode(&response), Reply::Value(0));
    }

    #[test]
    fn last_error_whole_word() {
        let response = Response::from_bytes(&[0x00, 0x10]);
        assert_eq!(
            last_error().decode(&response),
            Reply::Value(FirmwareError::CrcMismatch)
        );
    }
}
