//! Operations of the EPS motherboard.
//!
//! Every function builds an [`Operation`] without touching the bus. Argument
//! checks happen here, so a rejected call never reaches the engine.
//!
//! Four byte responses carry the value in the upper word, two byte responses
//! in the whole word. An upper word of `0xFFFF` means the command did not run.

use crate::{
    protocol::{
        self as proto, EpsCommand as Cmd, FirmwareError, PcmMask, PdmChannel, PdmTimerLimit,
        WatchdogPeriod, PDM_STATE_MASK,
    },
    telemetry::EpsChannel,
    transaction::{Dialect, Operation, Reply, Request, Response, SENTINEL},
};
use std::time::Duration;

pub const DEFAULT_ADDRESS: u8 = 0x2B;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(100);

fn error_code(response: &Response) -> u16 {
    (response.long() >> 16) as u16
}

pub static DIALECT: Dialect = Dialect {
    last_error: Cmd::GetLastError.descriptor(),
    error_code,
};

fn upper_word(response: &Response) -> Reply<u16> {
    Reply::from_word(error_code(response))
}

fn word(response: &Response) -> Reply<u16> {
    Reply::from_word(response.word())
}

fn status_byte(response: &Response) -> Reply<u8> {
    upper_word(response).map(|_| ((response.long() & 0x007F_0000) >> 16) as u8)
}

fn pdm_states(response: &Response) -> Reply<u32> {
    upper_word(response).map(|_| response.long() & PDM_STATE_MASK)
}

fn last_error_code(response: &Response) -> Reply<FirmwareError> {
    Reply::Value(FirmwareError::from(error_code(response)))
}

fn query<T>(command: Cmd, decode: fn(&Response) -> Reply<T>) -> Operation<T> {
    Operation::new(Request::new(command.descriptor()), decode)
}

fn command(command: Cmd) -> Operation<()> {
    Operation::write_only(Request::new(command.descriptor()))
}

fn pdm_command(command: Cmd, channel: u8) -> Result<Operation<()>, proto::Error> {
    let channel = PdmChannel::try_from(channel)?;
    Ok(Operation::write_only(Request::with_param(
        command.descriptor(),
        *channel,
    )))
}

fn pdm_query(command: Cmd, channel: u8) -> Result<Operation<u16>, proto::Error> {
    let channel = PdmChannel::try_from(channel)?;
    Ok(Operation::new(
        Request::with_param(command.descriptor(), *channel),
        word,
    ))
}

/// Status flags in the low seven bits.
pub fn board_status() -> Operation<u8> {
    query(Cmd::GetBoardStatus, status_byte)
}

/// Reads the cause of the most recent failure without naming a command.
///
/// Never treated as a sentinel, whatever the board answers.
pub fn last_error() -> Operation<FirmwareError> {
    query(Cmd::GetLastError, last_error_code)
}

pub fn version() -> Operation<u16> {
    query(Cmd::GetVersion, upper_word)
}

pub fn checksum() -> Operation<u16> {
    query(Cmd::GetChecksum, upper_word)
}

/// Raw ADC word of one telemetry channel.
pub fn telemetry(channel: EpsChannel) -> Operation<u16> {
    Operation::new(
        Request::with_word(Cmd::GetTelemetry.descriptor(), channel.register()),
        word,
    )
}

/// Watchdog period in minutes.
pub fn watchdog_period() -> Operation<u16> {
    query(Cmd::GetWatchdogPeriod, word)
}

pub fn set_watchdog_period(minutes: u8) -> Result<Operation<()>, proto::Error> {
    let period = WatchdogPeriod::try_from(minutes)?;
    Ok(Operation::write_only(Request::with_param(
        Cmd::SetWatchdogPeriod.descriptor(),
        *period,
    )))
}

pub fn reset_watchdog() -> Operation<()> {
    command(Cmd::ResetWatchdog)
}

pub fn brown_out_resets() -> Operation<u16> {
    query(Cmd::GetBrownOutResets, upper_word)
}

pub fn auto_software_resets() -> Operation<u16> {
    query(Cmd::GetAutoSoftwareResets, upper_word)
}

pub fn manual_resets() -> Operation<u16> {
    query(Cmd::GetManualResets, upper_word)
}

pub fn watchdog_resets() -> Operation<u16> {
    query(Cmd::GetWatchdogResets, word)
}

pub fn switch_all_pdm_on() -> Operation<()> {
    command(Cmd::SwitchOnAllPdm)
}

pub fn switch_all_pdm_off() -> Operation<()> {
    command(Cmd::SwitchOffAllPdm)
}

/// Switch bits as measured, see [`proto::pdm_state_is_on`].
pub fn all_pdm_actual_state() -> Operation<u32> {
    query(Cmd::GetAllPdmActualState, pdm_states)
}

pub fn all_pdm_expected_state() -> Operation<u32> {
    query(Cmd::GetAllPdmExpectedState, pdm_states)
}

pub fn all_pdm_initial_state() -> Operation<u32> {
    query(Cmd::GetAllPdmInitialState, pdm_states)
}

pub fn set_all_pdm_to_initial_state() -> Operation<()> {
    command(Cmd::SetAllPdmToInitialState)
}

pub fn switch_pdm_on(channel: u8) -> Result<Operation<()>, proto::Error> {
    pdm_command(Cmd::SwitchPdmOn, channel)
}

pub fn switch_pdm_off(channel: u8) -> Result<Operation<()>, proto::Error> {
    pdm_command(Cmd::SwitchPdmOff, channel)
}

pub fn set_pdm_initial_state_on(channel: u8) -> Result<Operation<()>, proto::Error> {
    pdm_command(Cmd::SetPdmInitialStateOn, channel)
}

pub fn set_pdm_initial_state_off(channel: u8) -> Result<Operation<()>, proto::Error> {
    pdm_command(Cmd::SetPdmInitialStateOff, channel)
}

/// `1` when the switch is on. Failures name opcode 0x54 when escalated.
pub fn pdm_actual_status(channel: u8) -> Result<Operation<u16>, proto::Error> {
    pdm_query(Cmd::GetPdmActualStatus, channel)
}

pub fn set_pdm_timer_limit(channel: u8, limit: u8) -> Result<Operation<()>, proto::Error> {
    let packed = PdmTimerLimit::new(channel, limit)?;
    Ok(Operation::write_only(Request::with_word(
        Cmd::SetPdmTimerLimit.descriptor(),
        packed.encode(),
    )))
}

pub fn pdm_timer_limit(channel: u8) -> Result<Operation<u16>, proto::Error> {
    pdm_query(Cmd::GetPdmTimerLimit, channel)
}

/// Elapsed on-time in 30 second periods.
pub fn pdm_timer_value(channel: u8) -> Result<Operation<u16>, proto::Error> {
    pdm_query(Cmd::GetPdmTimerValue, channel)
}

pub fn reset_pcm(mask: u8) -> Result<Operation<()>, proto::Error> {
    let mask = PcmMask::try_from(mask)?;
    Ok(Operation::write_only(Request::with_param(
        Cmd::PcmReset.descriptor(),
        *mask,
    )))
}

/// The board resets itself and sends nothing back.
pub fn manual_reset() -> Operation<()> {
    command(Cmd::ManualReset)
}

/// Whether an upper word marks a command that did not run.
pub fn is_sentinel(response: &Response) -> bool {
    error_code(response) == SENTINEL
}
