//! Command tables and parameter types shared by the EPS and battery boards.
//!
//! Everything here is pure: descriptors are compile-time constants and the
//! parameter types only check ranges, they never touch the bus.

use std::time::Duration;

/// Errors raised while validating caller supplied arguments.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    #[error("PDM channel {0} is out of range ({min}..={max})", min = PdmChannel::MIN, max = PdmChannel::MAX)]
    PdmChannelOutOfRange(u8),

    #[error("PCM reset mask 0x{0:02X} is out of range (0x01..=0x0F)")]
    PcmMaskOutOfRange(u8),

    #[error("watchdog period of {0} minutes is out of range ({min}..={max})", min = WatchdogPeriod::MIN, max = WatchdogPeriod::MAX)]
    WatchdogPeriodOutOfRange(u8),

    #[error("heater code {0} is out of range (0 or 1)")]
    HeaterCodeOutOfRange(u8),

    #[error("PDM timer limit 0x{0:02X} is invalid (0x00, 0x0A..=0xFE or 0xFF)")]
    TimerLimitOutOfRange(u8),

    #[error("telemetry channel 0x{0:04X} does not exist")]
    UnknownChannel(u16),

    #[error("battery telemetry channel {0} does not exist")]
    BatChannelOutOfRange(u8),
}

impl From<std::convert::Infallible> for Error {
    fn from(value: std::convert::Infallible) -> Self {
        match value {}
    }
}

/// Static description of one board command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandDescriptor {
    pub opcode: u8,
    /// Number of response bytes to read back, `0` for write-only commands.
    pub response_len: usize,
    /// Processing time the board needs between request and response.
    pub delay: Duration,
}

impl CommandDescriptor {
    const fn new(opcode: u8, response_len: usize, delay_ms: u64) -> Self {
        Self {
            opcode,
            response_len,
            delay: Duration::from_millis(delay_ms),
        }
    }
}

/// All commands understood by the EPS motherboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EpsCommand {
    GetBoardStatus,
    GetLastError,
    GetVersion,
    GetChecksum,
    GetTelemetry,
    GetWatchdogPeriod,
    SetWatchdogPeriod,
    ResetWatchdog,
    GetBrownOutResets,
    GetAutoSoftwareResets,
    GetManualResets,
    GetWatchdogResets,
    SwitchOnAllPdm,
    SwitchOffAllPdm,
    GetAllPdmActualState,
    GetAllPdmExpectedState,
    GetAllPdmInitialState,
    SetAllPdmToInitialState,
    SwitchPdmOn,
    SwitchPdmOff,
    SetPdmInitialStateOn,
    SetPdmInitialStateOff,
    GetPdmActualStatus,
    SetPdmTimerLimit,
    GetPdmTimerLimit,
    GetPdmTimerValue,
    PcmReset,
    ManualReset,
}

impl EpsCommand {
    pub const ALL: [EpsCommand; 28] = [
        Self::GetBoardStatus,
        Self::GetLastError,
        Self::GetVersion,
        Self::GetChecksum,
        Self::GetTelemetry,
        Self::GetWatchdogPeriod,
        Self::SetWatchdogPeriod,
        Self::ResetWatchdog,
        Self::GetBrownOutResets,
        Self::GetAutoSoftwareResets,
        Self::GetManualResets,
        Self::GetWatchdogResets,
        Self::SwitchOnAllPdm,
        Self::SwitchOffAllPdm,
        Self::GetAllPdmActualState,
        Self::GetAllPdmExpectedState,
        Self::GetAllPdmInitialState,
        Self::SetAllPdmToInitialState,
        Self::SwitchPdmOn,
        Self::SwitchPdmOff,
        Self::SetPdmInitialStateOn,
        Self::SetPdmInitialStateOff,
        Self::GetPdmActualStatus,
        Self::SetPdmTimerLimit,
        Self::GetPdmTimerLimit,
        Self::GetPdmTimerValue,
        Self::PcmReset,
        Self::ManualReset,
    ];

    pub const fn descriptor(self) -> CommandDescriptor {
        use CommandDescriptor as D;
        match self {
            Self::GetBoardStatus => D::new(0x01, 4, 2),
            Self::GetLastError => D::new(0x03, 4, 2),
            Self::GetVersion => D::new(0x04, 4, 2),
            Self::GetChecksum => D::new(0x05, 4, 70),
            Self::GetTelemetry => D::new(0x10, 2, 15),
            Self::GetWatchdogPeriod => D::new(0x20, 2, 1),
            Self::SetWatchdogPeriod => D::new(0x21, 0, 0),
            Self::ResetWatchdog => D::new(0x22, 0, 0),
            Self::GetBrownOutResets => D::new(0x31, 4, 2),
            Self::GetAutoSoftwareResets => D::new(0x32, 4, 2),
            Self::GetManualResets => D::new(0x33, 4, 2),
            Self::GetWatchdogResets => D::new(0x34, 2, 1),
            Self::SwitchOnAllPdm => D::new(0x40, 0, 0),
            Self::SwitchOffAllPdm => D::new(0x41, 0, 0),
            Self::GetAllPdmActualState => D::new(0x42, 4, 20),
            Self::GetAllPdmExpectedState => D::new(0x43, 4, 1),
            Self::GetAllPdmInitialState => D::new(0x44, 4, 20),
            Self::SetAllPdmToInitialState => D::new(0x45, 0, 20),
            Self::SwitchPdmOn => D::new(0x50, 0, 0),
            Self::SwitchPdmOff => D::new(0x51, 0, 0),
            Self::SetPdmInitialStateOn => D::new(0x52, 0, 200),
            Self::SetPdmInitialStateOff => D::new(0x53, 0, 200),
            Self::GetPdmActualStatus => D::new(0x54, 2, 2),
            Self::SetPdmTimerLimit => D::new(0x60, 0, 150),
            Self::GetPdmTimerLimit => D::new(0x61, 2, 5),
            Self::GetPdmTimerValue => D::new(0x62, 2, 1),
            Self::PcmReset => D::new(0x70, 0, 1),
            Self::ManualReset => D::new(0x80, 0, 0),
        }
    }

    pub const fn opcode(self) -> u8 {
        self.descriptor().opcode
    }
}

/// All commands understood by a battery board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BatCommand {
    GetBoardStatus,
    GetLastError,
    GetVersion,
    GetChecksum,
    GetTelemetry,
    GetBrownOutResets,
    GetAutoSoftwareResets,
    GetManualResets,
    GetHeaterStatus,
    SetHeaterStatus,
    ManualReset,
}

impl BatCommand {
    pub const ALL: [BatCommand; 11] = [
        Self::GetBoardStatus,
        Self::GetLastError,
        Self::GetVersion,
        Self::GetChecksum,
        Self::GetTelemetry,
        Self::GetBrownOutResets,
        Self::GetAutoSoftwareResets,
        Self::GetManualResets,
        Self::GetHeaterStatus,
        Self::SetHeaterStatus,
        Self::ManualReset,
    ];

    pub const fn descriptor(self) -> CommandDescriptor {
        use CommandDescriptor as D;
        match self {
            Self::GetBoardStatus => D::new(0x01, 2, 1),
            Self::GetLastError => D::new(0x03, 2, 1),
            Self::GetVersion => D::new(0x04, 2, 1),
            Self::GetChecksum => D::new(0x05, 2, 35),
            Self::GetTelemetry => D::new(0x10, 2, 5),
            Self::GetBrownOutResets => D::new(0x31, 2, 1),
            Self::GetAutoSoftwareResets => D::new(0x32, 2, 1),
            Self::GetManualResets => D::new(0x33, 2, 1),
            Self::GetHeaterStatus => D::new(0x90, 2, 1),
            // The board answers nothing to the set command.
            Self::SetHeaterStatus => D::new(0x91, 0, 1),
            Self::ManualReset => D::new(0x80, 0, 0),
        }
    }

    pub const fn opcode(self) -> u8 {
        self.descriptor().opcode
    }
}

/// A power distribution module switch number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PdmChannel(u8);

impl PdmChannel {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 10;

    /// Iterates all switches in ascending order.
    pub fn all() -> impl Iterator<Item = PdmChannel> {
        (Self::MIN..=Self::MAX).map(PdmChannel)
    }
}

impl TryFrom<u8> for PdmChannel {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        if (Self::MIN..=Self::MAX).contains(&value) {
            Ok(Self(value))
        } else {
            Err(Error::PdmChannelOutOfRange(value))
        }
    }
}

impl std::ops::Deref for PdmChannel {
    type Target = u8;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl std::fmt::Display for PdmChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Bit set of power conditioning module rails to reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PcmMask(u8);

impl PcmMask {
    pub const BATTERY: PcmMask = PcmMask(0x01);
    pub const BUS_5V: PcmMask = PcmMask(0x02);
    pub const BUS_3V3: PcmMask = PcmMask(0x04);
    pub const BUS_12V: PcmMask = PcmMask(0x08);
    pub const ALL: PcmMask = PcmMask(0x0F);

    pub fn contains(self, other: PcmMask) -> bool {
        self.0 & other.0 == other.0
    }
}

impl TryFrom<u8> for PcmMask {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        if (0x01..=0x0F).contains(&value) {
            Ok(Self(value))
        } else {
            Err(Error::PcmMaskOutOfRange(value))
        }
    }
}

impl std::ops::BitOr for PcmMask {
    type Output = PcmMask;
    fn bitor(self, rhs: Self) -> Self::Output {
        PcmMask(self.0 | rhs.0)
    }
}

impl std::ops::Deref for PcmMask {
    type Target = u8;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl std::fmt::Display for PcmMask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{:02X}", self.0)
    }
}

/// Communications watchdog period in minutes.
///
/// The board falls back to [`WatchdogPeriod::DEFAULT`] after every reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WatchdogPeriod(u8);

impl WatchdogPeriod {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 90;
    pub const DEFAULT: WatchdogPeriod = WatchdogPeriod(4);

    pub fn as_duration(self) -> Duration {
        Duration::from_secs(u64::from(self.0) * 60)
    }
}

impl Default for WatchdogPeriod {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl TryFrom<u8> for WatchdogPeriod {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        if (Self::MIN..=Self::MAX).contains(&value) {
            Ok(Self(value))
        } else {
            Err(Error::WatchdogPeriodOutOfRange(value))
        }
    }
}

impl std::ops::Deref for WatchdogPeriod {
    type Target = u8;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl std::fmt::Display for WatchdogPeriod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} min", self.0)
    }
}

/// Battery heater controller setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum HeaterCode {
    Off = 0,
    On = 1,
}

impl TryFrom<u8> for HeaterCode {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Off),
            1 => Ok(Self::On),
            _ => Err(Error::HeaterCodeOutOfRange(value)),
        }
    }
}

impl std::fmt::Display for HeaterCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Off => write!(f, "off"),
            Self::On => write!(f, "on"),
        }
    }
}

/// PDM timer limit byte.
///
/// `0x00` keeps the switch off, `0xFF` keeps it on, `0x0A..=0xFE` counts
/// 30 second periods. `0x01..=0x09` is rejected by the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerLimit(u8);

impl TimerLimit {
    pub const DISABLED: TimerLimit = TimerLimit(0x00);
    pub const ENABLED: TimerLimit = TimerLimit(0xFF);
    pub const MIN_PERIODS: u8 = 0x0A;
    pub const PERIOD: Duration = Duration::from_secs(30);

    /// The limit as a duration, `None` for the two indefinite settings.
    pub fn duration(self) -> Option<Duration> {
        match self {
            Self::DISABLED | Self::ENABLED => None,
            Self(periods) => Some(Self::PERIOD * u32::from(periods)),
        }
    }
}

impl TryFrom<u8> for TimerLimit {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        if value != 0x00 && value < Self::MIN_PERIODS {
            Err(Error::TimerLimitOutOfRange(value))
        } else {
            Ok(Self(value))
        }
    }
}

impl std::ops::Deref for TimerLimit {
    type Target = u8;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl std::fmt::Display for TimerLimit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.duration() {
            None if *self == Self::DISABLED => write!(f, "disabled indefinitely"),
            None => write!(f, "enabled indefinitely"),
            Some(duration) => write!(f, "{}s", duration.as_secs()),
        }
    }
}

/// Channel and limit packed into one word: channel in the high byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PdmTimerLimit {
    pub channel: PdmChannel,
    pub limit: TimerLimit,
}

impl PdmTimerLimit {
    pub fn new(channel: u8, limit: u8) -> Result<Self, Error> {
        Ok(Self {
            channel: PdmChannel::try_from(channel)?,
            limit: TimerLimit::try_from(limit)?,
        })
    }

    pub fn encode(&self) -> u16 {
        u16::from_be_bytes([*self.channel, *self.limit])
    }

    pub fn decode(word: u16) -> Result<Self, Error> {
        let [channel, limit] = word.to_be_bytes();
        Self::new(channel, limit)
    }
}

/// Cause reported by the "get last error" command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FirmwareError {
    CrcMismatch,
    UnknownCommand,
    BadData,
    ChannelDoesNotExist,
    ChannelInactive,
    ResetOccurred,
    AdcError,
    EepromReadError,
    InternalBusError,
    Undefined(u16),
}

impl FirmwareError {
    pub fn code(self) -> u16 {
        match self {
            Self::CrcMismatch => 0x10,
            Self::UnknownCommand => 0x01,
            Self::BadData => 0x02,
            Self::ChannelDoesNotExist => 0x03,
            Self::ChannelInactive => 0x04,
            Self::ResetOccurred => 0x13,
            Self::AdcError => 0x14,
            Self::EepromReadError => 0x20,
            Self::InternalBusError => 0x30,
            Self::Undefined(code) => code,
        }
    }
}

impl From<u16> for FirmwareError {
    fn from(code: u16) -> Self {
        match code {
            0x10 => Self::CrcMismatch,
            0x01 => Self::UnknownCommand,
            0x02 => Self::BadData,
            0x03 => Self::ChannelDoesNotExist,
            0x04 => Self::ChannelInactive,
            0x13 => Self::ResetOccurred,
            0x14 => Self::AdcError,
            0x20 => Self::EepromReadError,
            0x30 => Self::InternalBusError,
            other => Self::Undefined(other),
        }
    }
}

impl std::fmt::Display for FirmwareError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CrcMismatch => write!(f, "CRC code does not match data"),
            Self::UnknownCommand => write!(f, "unknown command received"),
            Self::BadData => write!(f, "supplied data incorrect when processing command"),
            Self::ChannelDoesNotExist => write!(f, "selected channel does not exist"),
            Self::ChannelInactive => write!(f, "selected channel is currently inactive"),
            Self::ResetOccurred => write!(f, "a reset had to occur"),
            Self::AdcError => write!(f, "error with the ADC acquisition"),
            Self::EepromReadError => write!(f, "reading from EEPROM generated an error"),
            Self::InternalBusError => write!(f, "error on the internal SPI bus"),
            Self::Undefined(code) => write!(f, "undefined error (code 0x{code:04X})"),
        }
    }
}

/// Mask of the switch bits in an all-PDM state word, bit `n` is switch `n`.
pub const PDM_STATE_MASK: u32 = 0x0000_07FE;

/// Returns whether `channel` is set in an all-PDM state word.
pub fn pdm_state_is_on(states: u32, channel: PdmChannel) -> bool {
    states & (1 << *channel) != 0
}
