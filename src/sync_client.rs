//! Blocking handles for the EPS motherboard and the battery boards.
//!
//! Each handle owns a shared bus and runs one logical command per call. The
//! EPS handle always holds the bus lock from request to response; the
//! battery handle does so unless its [`BatConfig::serialize`] flag is off.
//!
//! ## Example
//!
//! ```no_run
//! use eps_bat_lib::{
//!     bus::{Bus, ThreadSleep},
//!     config::{BatConfig, EpsConfig},
//!     sync_client::{Bat, Eps},
//!     telemetry::{BatUnit, EpsChannel},
//! };
//! use std::sync::{Arc, Mutex};
//!
//! fn poll<B: Bus>(bus: B) -> eps_bat_lib::Result<()> {
//!     let bus = Arc::new(Mutex::new(bus));
//!     let eps = Eps::from_shared(bus.clone(), ThreadSleep, EpsConfig::default());
//!     let bat = Bat::from_shared(bus, ThreadSleep, BatConfig::for_unit(BatUnit::Cs05876));
//!
//!     eps.switch_pdm_on(3)?;
//!     println!("board temperature: {:.1}", eps.telemetry(EpsChannel::Tbrd)?);
//!     println!("heater enabled: {}", bat.heater_status()? == 1);
//!     Ok(())
//! }
//! ```

use crate::{
    bat,
    bus::{Bus, Delay, ThreadSleep},
    config::{BatConfig, EpsConfig},
    eps,
    error::Result,
    output::StoreExt,
    protocol::FirmwareError,
    telemetry::{BatChannel, BatUnit, EpsChannel, EpsUnit},
    transaction::{Engine, Target},
};
use log::*;
use std::sync::{Arc, Mutex};

pub(crate) fn eps_target(config: &EpsConfig) -> Target {
    Target {
        address: config.address,
        timeout: config.timeout,
        serialize: true,
        label: "EPS".to_string(),
        dialect: &eps::DIALECT,
    }
}

pub(crate) fn bat_target(config: &BatConfig) -> Target {
    if !config.serialize {
        warn!(
            "battery {}: serialization disabled, other bus users may interleave with its commands",
            config.unit
        );
    }
    Target {
        address: config.address(),
        timeout: config.timeout,
        serialize: config.serialize,
        label: format!("battery {}", config.unit),
        dialect: &bat::DIALECT,
    }
}

/// Blocking handle for the EPS motherboard.
#[derive(Debug)]
pub struct Eps<B, D = ThreadSleep> {
    engine: Engine<B, D>,
    unit: EpsUnit,
}

impl<B, D: Clone> Clone for Eps<B, D> {
    fn clone(&self) -> Self {
        Self {
            engine: self.engine.clone(),
            unit: self.unit,
        }
    }
}

impl<B: Bus> Eps<B> {
    /// Creates a handle with the default address, timeout and unit.
    pub fn new(bus: B) -> Self {
        Self::with_config(bus, EpsConfig::default())
    }

    pub fn with_config(bus: B, config: EpsConfig) -> Self {
        Self::from_shared(Arc::new(Mutex::new(bus)), ThreadSleep, config)
    }
}

impl<B: Bus, D: Delay> Eps<B, D> {
    /// Creates a handle on a bus shared with other handles.
    pub fn from_shared(bus: Arc<Mutex<B>>, delay: D, config: EpsConfig) -> Self {
        Self {
            engine: Engine::new(bus, delay, eps_target(&config)),
            unit: config.unit,
        }
    }

    /// Clones the shared bus.
    pub fn clone_shared(&self) -> Arc<Mutex<B>> {
        self.engine.bus().clone()
    }

    pub fn unit(&self) -> EpsUnit {
        self.unit
    }

    pub fn board_status(&self) -> Result<u8> {
        self.engine.execute(eps::board_status())
    }

    /// Reads the cause of the most recent board failure.
    pub fn last_error(&self) -> Result<FirmwareError> {
        self.engine.execute(eps::last_error())
    }

    pub fn version(&self) -> Result<u16> {
        self.engine.execute(eps::version())
    }

    pub fn checksum(&self) -> Result<u16> {
        self.engine.execute(eps::checksum())
    }

    /// Reads one channel and converts it with this unit's calibration.
    pub fn telemetry(&self, channel: EpsChannel) -> Result<f32> {
        let raw = self.engine.execute(eps::telemetry(channel))?;
        Ok(self.unit.calibration(channel).convert(raw))
    }

    /// Like [`Eps::telemetry`] with a raw register address.
    ///
    /// An unknown register fails without bus traffic.
    pub fn telemetry_register(&self, register: u16) -> Result<f32> {
        let channel = self.engine.target().reject(EpsChannel::try_from(register))?;
        self.telemetry(channel)
    }

    /// Stores a reading into a long lived slot.
    ///
    /// Failures write `0.0`, except for VIDIODE_OUT whose slot keeps the
    /// previous reading.
    pub fn telemetry_into(&self, register: u16, out: &mut f32) -> Result<()> {
        let reading = self.telemetry_register(register);
        if register == EpsChannel::VidiodeOut.register() {
            return reading.map(|value| *out = value);
        }
        reading.store(out)
    }

    /// Watchdog period in minutes.
    pub fn watchdog_period(&self) -> Result<u16> {
        self.engine.execute(eps::watchdog_period())
    }

    pub fn set_watchdog_period(&self, minutes: u8) -> Result<()> {
        self.engine.run(eps::set_watchdog_period(minutes))
    }

    pub fn reset_watchdog(&self) -> Result<()> {
        self.engine.execute(eps::reset_watchdog())
    }

    pub fn brown_out_resets(&self) -> Result<u16> {
        self.engine.execute(eps::brown_out_resets())
    }

    pub fn auto_software_resets(&self) -> Result<u16> {
        self.engine.execute(eps::auto_software_resets())
    }

    pub fn manual_resets(&self) -> Result<u16> {
        self.engine.execute(eps::manual_resets())
    }

    pub fn watchdog_resets(&self) -> Result<u16> {
        self.engine.execute(eps::watchdog_resets())
    }

    pub fn switch_all_pdm_on(&self) -> Result<()> {
        self.engine.execute(eps::switch_all_pdm_on())
    }

    pub fn switch_all_pdm_off(&self) -> Result<()> {
        self.engine.execute(eps::switch_all_pdm_off())
    }

    pub fn all_pdm_actual_state(&self) -> Result<u32> {
        self.engine.execute(eps::all_pdm_actual_state())
    }

    pub fn all_pdm_expected_state(&self) -> Result<u32> {
        self.engine.execute(eps::all_pdm_expected_state())
    }

    pub fn all_pdm_initial_state(&self) -> Result<u32> {
        self.engine.execute(eps::all_pdm_initial_state())
    }

    pub fn set_all_pdm_to_initial_state(&self) -> Result<()> {
        self.engine.execute(eps::set_all_pdm_to_initial_state())
    }

    pub fn switch_pdm_on(&self, channel: u8) -> Result<()> {
        self.engine.run(eps::switch_pdm_on(channel))
    }

    pub fn switch_pdm_off(&self, channel: u8) -> Result<()> {
        self.engine.run(eps::switch_pdm_off(channel))
    }

    pub fn set_pdm_initial_state_on(&self, channel: u8) -> Result<()> {
        self.engine.run(eps::set_pdm_initial_state_on(channel))
    }

    pub fn set_pdm_initial_state_off(&self, channel: u8) -> Result<()> {
        self.engine.run(eps::set_pdm_initial_state_off(channel))
    }

    pub fn pdm_actual_status(&self, channel: u8) -> Result<u16> {
        self.engine.run(eps::pdm_actual_status(channel))
    }

    pub fn set_pdm_timer_limit(&self, channel: u8, limit: u8) -> Result<()> {
        self.engine.run(eps::set_pdm_timer_limit(channel, limit))
    }

    pub fn pdm_timer_limit(&self, channel: u8) -> Result<u16> {
        self.engine.run(eps::pdm_timer_limit(channel))
    }

    pub fn pdm_timer_value(&self, channel: u8) -> Result<u16> {
        self.engine.run(eps::pdm_timer_value(channel))
    }

    /// Power cycles the rails selected by `mask`, see [`crate::protocol::PcmMask`].
    pub fn reset_pcm(&self, mask: u8) -> Result<()> {
        self.engine.run(eps::reset_pcm(mask))
    }

    pub fn manual_reset(&self) -> Result<()> {
        self.engine.execute(eps::manual_reset())
    }
}

/// Blocking handle for one battery board.
#[derive(Debug)]
pub struct Bat<B, D = ThreadSleep> {
    engine: Engine<B, D>,
    unit: BatUnit,
}

impl<B, D: Clone> Clone for Bat<B, D> {
    fn clone(&self) -> Self {
        Self {
            engine: self.engine.clone(),
            unit: self.unit,
        }
    }
}

impl<B: Bus> Bat<B> {
    pub fn new(bus: B) -> Self {
        Self::with_config(bus, BatConfig::default())
    }

    pub fn with_config(bus: B, config: BatConfig) -> Self {
        Self::from_shared(Arc::new(Mutex::new(bus)), ThreadSleep, config)
    }
}

impl<B: Bus, D: Delay> Bat<B, D> {
    pub fn from_shared(bus: Arc<Mutex<B>>, delay: D, config: BatConfig) -> Self {
        Self {
            engine: Engine::new(bus, delay, bat_target(&config)),
            unit: config.unit,
        }
    }

    pub fn clone_shared(&self) -> Arc<Mutex<B>> {
        self.engine.bus().clone()
    }

    pub fn unit(&self) -> BatUnit {
        self.unit
    }

    pub fn board_status(&self) -> Result<u16> {
        self.engine.execute(bat::board_status())
    }

    pub fn last_error(&self) -> Result<FirmwareError> {
        self.engine.execute(bat::last_error())
    }

    pub fn version(&self) -> Result<u16> {
        self.engine.execute(bat::version())
    }

    pub fn checksum(&self) -> Result<u16> {
        self.engine.execute(bat::checksum())
    }

    /// Reads one channel and converts it with this unit's calibration.
    pub fn telemetry(&self, channel: BatChannel) -> Result<f32> {
        let raw = self.engine.execute(bat::telemetry(channel))?;
        Ok(self.unit.calibration(channel).convert(raw))
    }

    /// Like [`Bat::telemetry`] with a table index.
    pub fn telemetry_index(&self, index: u8) -> Result<f32> {
        let channel = self.engine.target().reject(BatChannel::try_from(index))?;
        self.telemetry(channel)
    }

    pub fn brown_out_resets(&self) -> Result<u16> {
        self.engine.execute(bat::brown_out_resets())
    }

    pub fn auto_software_resets(&self) -> Result<u16> {
        self.engine.execute(bat::auto_software_resets())
    }

    pub fn manual_resets(&self) -> Result<u16> {
        self.engine.execute(bat::manual_resets())
    }

    pub fn heater_status(&self) -> Result<u16> {
        self.engine.execute(bat::heater_status())
    }

    /// `0` disables the heater controller, `1` enables it.
    pub fn set_heater_status(&self, code: u8) -> Result<()> {
        self.engine.run(bat::set_heater_status(code))
    }

    pub fn manual_reset(&self) -> Result<()> {
        self.engine.execute(bat::manual_reset())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bus::mock::{Event, MockBus, MockDelay},
        error::Error,
        output::Poison,
        protocol::{self as proto, PdmChannel},
    };
    use assert_matches::assert_matches;
    use std::time::Duration;

    fn eps(bus: &MockBus) -> Eps<MockBus, MockDelay> {
        Eps::from_shared(
            Arc::new(Mutex::new(bus.clone())),
            bus.delay(),
            EpsConfig::default(),
        )
    }

    fn bat(bus: &MockBus, config: BatConfig) -> Bat<MockBus, MockDelay> {
        Bat::from_shared(Arc::new(Mutex::new(bus.clone())), bus.delay(), config)
    }

    #[test]
    fn pdm_channel_range_checked_before_bus() {
        let bus = MockBus::new();
        let eps = eps(&bus);
        assert_matches!(
            eps.switch_pdm_on(0),
            Err(Error::Protocol(proto::Error::PdmChannelOutOfRange(0)))
        );
        assert_matches!(
            eps.switch_pdm_off(11),
            Err(Error::Protocol(proto::Error::PdmChannelOutOfRange(11)))
        );
        assert_matches!(eps.pdm_timer_value(11), Err(Error::Protocol(_)));
        assert_eq!(bus.transactions(), 0);

        for channel in PdmChannel::all() {
            assert_matches!(eps.switch_pdm_on(*channel), Ok(()));
        }
        assert_eq!(bus.transactions(), 10);
    }

    #[test]
    fn other_ranges_checked_before_bus() {
        let bus = MockBus::new();
        let eps = eps(&bus);
        assert_matches!(eps.set_watchdog_period(0), Err(Error::Protocol(_)));
        assert_matches!(eps.reset_pcm(0x10), Err(Error::Protocol(_)));
        assert_matches!(eps.set_pdm_timer_limit(5, 0x01), Err(Error::Protocol(_)));
        let bat = bat(&bus, BatConfig::default());
        assert_matches!(bat.set_heater_status(2), Err(Error::Protocol(_)));
        assert_matches!(
            bat.telemetry_index(16),
            Err(Error::Protocol(proto::Error::BatChannelOutOfRange(16)))
        );
        assert_eq!(bus.transactions(), 0);
    }

    #[test]
    fn timer_limit_boundaries() {
        let bus = MockBus::new();
        let eps = eps(&bus);
        for limit in [0x00, 0x0A, 0xFE, 0xFF] {
            assert_matches!(eps.set_pdm_timer_limit(5, limit), Ok(()));
        }
        for limit in [0x01, 0x09] {
            assert_matches!(
                eps.set_pdm_timer_limit(5, limit),
                Err(Error::Protocol(proto::Error::TimerLimitOutOfRange(_)))
            );
        }
        assert_eq!(
            bus.writes(),
            vec![
                vec![0x60, 0x05, 0x00],
                vec![0x60, 0x05, 0x0A],
                vec![0x60, 0x05, 0xFE],
                vec![0x60, 0x05, 0xFF],
            ]
        );
    }

    #[test]
    fn sentinel_poisons_and_escalates() {
        let bus = MockBus::new();
        bus.respond(&[0xFF, 0xFF, 0x12, 0x34])
            .respond(&[0x00, 0x03, 0x00, 0x00]);
        let eps = eps(&bus);

        let mut status = 0x01;
        assert_matches!(
            eps.board_status().store(&mut status),
            Err(Error::Firmware {
                opcode: 0x01,
                cause: Some(FirmwareError::ChannelDoesNotExist)
            })
        );
        assert_eq!(status, u8::POISON);
        assert_eq!(bus.writes(), vec![vec![0x01, 0x00], vec![0x03, 0x01]]);
    }

    #[test]
    fn pdm_states_poisoned() {
        let bus = MockBus::new();
        bus.respond(&[0xFF, 0xFF, 0x00, 0x00])
            .respond(&[0x00, 0x01, 0x00, 0x00]);
        let mut states = 0;
        assert!(eps(&bus).all_pdm_actual_state().store(&mut states).is_err());
        assert_eq!(states, 0xFFFF_FFFF);
        assert_eq!(bus.transactions(), 2);
    }

    #[test]
    fn pdm_actual_status_escalates_own_opcode() {
        let bus = MockBus::new();
        bus.respond(&[0xFF, 0xFF]).respond(&[0x00, 0x04, 0x00, 0x00]);
        assert_matches!(
            eps(&bus).pdm_actual_status(4),
            Err(Error::Firmware {
                opcode: 0x54,
                cause: Some(FirmwareError::ChannelInactive)
            })
        );
        assert_eq!(bus.writes(), vec![vec![0x54, 0x04], vec![0x03, 0x54]]);
    }

    #[test]
    fn transport_failure_does_not_escalate() {
        let bus = MockBus::new();
        bus.fail_next_read();
        let mut version = 0x0102;
        assert_matches!(eps(&bus).version().store(&mut version), Err(Error::Bus(_)));
        assert_eq!(version, 0xFFFF);
        assert_eq!(bus.transactions(), 1);
    }

    #[test]
    fn manual_reset_is_write_only() {
        let bus = MockBus::new();
        assert_matches!(eps(&bus).manual_reset(), Ok(()));
        assert_matches!(bat(&bus, BatConfig::default()).manual_reset(), Ok(()));
        assert_eq!(
            bus.events(),
            vec![
                Event::Write {
                    address: 0x2B,
                    frame: vec![0x80, 0x00]
                },
                Event::Write {
                    address: 0x2D,
                    frame: vec![0x80, 0x00]
                },
            ]
        );
    }

    #[test]
    fn write_only_commands_still_wait() {
        let bus = MockBus::new();
        assert_matches!(eps(&bus).set_pdm_initial_state_on(2), Ok(()));
        assert_eq!(
            bus.events(),
            vec![
                Event::Write {
                    address: 0x2B,
                    frame: vec![0x52, 0x02]
                },
                Event::Delay(Duration::from_millis(200)),
            ]
        );
    }

    #[test]
    fn telemetry_converted() {
        let bus = MockBus::new();
        bus.respond(&[0x03, 0x13]);
        let reading = eps(&bus).telemetry(EpsChannel::Tbrd).unwrap();
        assert!((reading - 18.56).abs() < 0.05, "{reading}");
        assert_eq!(bus.writes(), vec![vec![0x10, 0xE3, 0x08]]);
    }

    #[test]
    fn unknown_register_poisons_without_traffic() {
        let bus = MockBus::new();
        let mut reading = 12.5;
        assert_matches!(
            eps(&bus).telemetry_into(0x1234, &mut reading),
            Err(Error::Protocol(proto::Error::UnknownChannel(0x1234)))
        );
        assert_eq!(reading, 0.0);
        assert_eq!(bus.transactions(), 0);
    }

    #[test]
    fn vidiode_out_keeps_previous_reading() {
        let bus = MockBus::new();
        bus.fail_next_read();
        let eps = eps(&bus);
        let mut reading = 7.25;
        assert!(eps
            .telemetry_into(EpsChannel::VidiodeOut.register(), &mut reading)
            .is_err());
        assert_eq!(reading, 7.25);

        bus.fail_next_read();
        let mut reading = 7.25;
        assert!(eps
            .telemetry_into(EpsChannel::IidiodeOut.register(), &mut reading)
            .is_err());
        assert_eq!(reading, 0.0);
    }

    #[test]
    fn telemetry_sentinel_escalates() {
        let bus = MockBus::new();
        bus.respond(&[0xFF, 0xFF])
            .respond(&[0x00, 0x03, 0x00, 0x00])
            .respond(&[0xFF, 0xFF])
            .respond(&[0x00, 0x03, 0x00, 0x00]);
        let eps = eps(&bus);

        let mut tbrd = 12.5;
        assert_matches!(
            eps.telemetry_into(EpsChannel::Tbrd.register(), &mut tbrd),
            Err(Error::Firmware {
                opcode: 0x10,
                cause: Some(FirmwareError::ChannelDoesNotExist)
            })
        );
        assert_eq!(tbrd, 0.0);

        let mut vidiode = 3.0;
        assert_matches!(
            eps.telemetry_into(EpsChannel::VidiodeOut.register(), &mut vidiode),
            Err(Error::Firmware { opcode: 0x10, .. })
        );
        assert_eq!(vidiode, 3.0);

        assert_eq!(
            bus.writes(),
            vec![
                vec![0x10, 0xE3, 0x08],
                vec![0x03, 0x10],
                vec![0x10, 0xE2, 0x80],
                vec![0x03, 0x10],
            ]
        );
    }

    #[test]
    fn concurrent_eps_calls_do_not_interleave() {
        let bus = MockBus::slow(Duration::from_millis(1));
        for _ in 0..20 {
            bus.respond(&[0x00, 0x07, 0x00, 0x00]);
        }
        let eps = eps(&bus);
        let workers: Vec<_> = (0..2)
            .map(|_| {
                let eps = eps.clone();
                std::thread::spawn(move || {
                    for _ in 0..10 {
                        assert_matches!(eps.version(), Ok(7));
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        let events = bus.events();
        assert_eq!(events.len(), 60);
        for transaction in events.chunks(3) {
            assert_matches!(
                transaction,
                [
                    Event::Write { .. },
                    Event::Delay(_),
                    Event::Read { len: 4, .. }
                ]
            );
        }
    }

    #[test]
    fn bat_decoding_and_label() {
        let bus = MockBus::new();
        bus.respond(&[0x5A, 0x00]).respond(&[0x00, 0x01]);
        let bat = bat(&bus, BatConfig::for_unit(BatUnit::Cs05876));
        assert_matches!(bat.board_status(), Ok(0x5A));
        assert_matches!(bat.heater_status(), Ok(1));
        assert_eq!(bat.engine.target().label, "battery CS05876");
        assert_matches!(
            bus.events().first(),
            Some(Event::Write { address: 0x2A, .. })
        );
    }

    #[test]
    fn bat_sentinel_escalates_with_word_cause() {
        let bus = MockBus::new();
        bus.respond(&[0xFF, 0xFF]).respond(&[0x00, 0x14]);
        let mut heater = 0;
        assert_matches!(
            bat(&bus, BatConfig::default()).heater_status().store(&mut heater),
            Err(Error::Firmware {
                opcode: 0x90,
                cause: Some(FirmwareError::AdcError)
            })
        );
        assert_eq!(heater, 0xFFFF);
        assert_eq!(bus.writes(), vec![vec![0x90, 0x00], vec![0x03, 0x90]]);
    }

    #[test]
    fn bat_boolean_channel() {
        let bus = MockBus::new();
        bus.respond(&[0x02, 0x00]).respond(&[0x01, 0xFF]);
        let bat = bat(&bus, BatConfig::default());
        assert_eq!(bat.telemetry(BatChannel::Hbat1).unwrap(), 0.0);
        assert_eq!(bat.telemetry(BatChannel::Hbat2).unwrap(), 1.0);
    }

    /// Records whether the bus lock was held while the processing delay ran.
    #[derive(Clone)]
    struct LockProbe {
        bus: Arc<Mutex<MockBus>>,
        held: Arc<Mutex<Vec<bool>>>,
    }

    impl Delay for LockProbe {
        fn delay(&self, _duration: Duration) {
            let held = self.bus.try_lock().is_err();
            self.held.lock().unwrap().push(held);
        }
    }

    fn lock_held_during_delay(serialize: bool) -> Vec<bool> {
        let bus = MockBus::new();
        bus.respond(&[0x00, 0x02]);
        let shared = Arc::new(Mutex::new(bus));
        let probe = LockProbe {
            bus: shared.clone(),
            held: Arc::default(),
        };
        let config = BatConfig {
            serialize,
            ..BatConfig::default()
        };
        let bat = Bat::from_shared(shared, probe.clone(), config);
        assert_eq!(bat.engine.target().serialize, serialize);
        assert_matches!(bat.version(), Ok(2));
        let held = probe.held.lock().unwrap().clone();
        held
    }

    #[test]
    fn bat_serialize_flag_controls_lock_span() {
        assert_eq!(lock_held_during_delay(true), vec![true]);
        assert_eq!(lock_held_during_delay(false), vec![false]);
    }

    #[test]
    fn concurrent_bat_calls_do_not_interleave() {
        let bus = MockBus::slow(Duration::from_millis(1));
        for _ in 0..20 {
            bus.respond(&[0x00, 0x05]);
        }
        let bat = bat(&bus, BatConfig::default());
        let workers: Vec<_> = (0..2)
            .map(|_| {
                let bat = bat.clone();
                std::thread::spawn(move || {
                    for _ in 0..10 {
                        assert_matches!(bat.version(), Ok(5));
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        let events = bus.events();
        assert_eq!(events.len(), 60);
        assert!(!events
            .windows(2)
            .any(|pair| matches!(pair, [Event::Write { .. }, Event::Write { .. }])));
        for transaction in events.chunks(3) {
            assert_matches!(
                transaction,
                [
                    Event::Write { .. },
                    Event::Delay(_),
                    Event::Read { len: 2, .. }
                ]
            );
        }
    }

    #[test]
    fn eps_always_serialized() {
        let bus = MockBus::new();
        assert!(eps(&bus).engine.target().serialize);
    }

    #[test]
    fn last_error_accessor() {
        let bus = MockBus::new();
        bus.respond(&[0x00, 0x13, 0x00, 0x00]);
        assert_matches!(eps(&bus).last_error(), Ok(FirmwareError::ResetOccurred));
        assert_eq!(bus.writes(), vec![vec![0x03, 0x00]]);
    }
}
