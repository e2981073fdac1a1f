//! Asynchronous handles for the EPS motherboard and the battery boards.
//!
//! Same commands and the same locking rules as [`crate::sync_client`], over
//! a `tokio::sync::Mutex` and with `tokio::time::sleep` for the processing
//! delay. The bus primitive itself stays blocking.
//!
//! All client methods are `async` and must be `.await`ed.

use crate::{
    bat,
    bus::Bus,
    config::{BatConfig, EpsConfig},
    eps,
    error::Result,
    output::StoreExt,
    protocol::{self as proto, FirmwareError},
    sync_client::{bat_target, eps_target},
    telemetry::{BatChannel, BatUnit, EpsChannel, EpsUnit},
    transaction::{Operation, Reply, Request, Response, Target},
};
use log::*;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};

enum Session<'a, B> {
    Held(MutexGuard<'a, B>),
    Shared(&'a Mutex<B>),
}

impl<B: Bus> Session<'_, B> {
    async fn perform(&mut self, target: &Target, tx: &[u8], rx: &mut [u8]) -> Result<()> {
        match self {
            Self::Held(bus) => bus.perform(target.address, tx, rx, target.timeout)?,
            Self::Shared(mutex) => {
                mutex
                    .lock()
                    .await
                    .perform(target.address, tx, rx, target.timeout)?
            }
        }
        Ok(())
    }
}

#[derive(Debug)]
struct Engine<B> {
    bus: Arc<Mutex<B>>,
    target: Target,
}

impl<B> Clone for Engine<B> {
    fn clone(&self) -> Self {
        Self {
            bus: self.bus.clone(),
            target: self.target.clone(),
        }
    }
}

impl<B: Bus> Engine<B> {
    async fn run<T>(&self, operation: std::result::Result<Operation<T>, proto::Error>) -> Result<T> {
        self.execute(self.target.reject(operation)?).await
    }

    async fn execute<T>(&self, operation: Operation<T>) -> Result<T> {
        let mut session = if self.target.serialize {
            Session::Held(self.bus.lock().await)
        } else {
            Session::Shared(&self.bus)
        };
        let response = self.transact(&mut session, operation.request()).await?;
        match operation.decode(&response) {
            Reply::Value(value) => Ok(value),
            Reply::Sentinel => {
                let opcode = operation.request().opcode();
                let escalation = self.target.dialect.escalation(opcode);
                let outcome = self.transact(&mut session, &escalation).await;
                Err(self.target.dialect.report(&self.target.label, opcode, outcome))
            }
        }
    }

    async fn transact(&self, session: &mut Session<'_, B>, request: &Request) -> Result<Response> {
        let target = &self.target;
        let descriptor = request.descriptor();
        trace!("{}: write {:02X?}", target.label, request.frame());
        if let Err(error) = session.perform(target, request.frame(), &mut []).await {
            warn!(
                "{}: command 0x{:02X} write failed: {error}",
                target.label, descriptor.opcode
            );
            return Err(error);
        }

        if !descriptor.delay.is_zero() {
            tokio::time::sleep(descriptor.delay).await;
        }

        let mut response = Response::with_len(descriptor.response_len);
        if descriptor.response_len > 0 {
            if let Err(error) = session.perform(target, &[], response.bytes_mut()).await {
                warn!(
                    "{}: command 0x{:02X} read failed: {error}",
                    target.label, descriptor.opcode
                );
                return Err(error);
            }
            trace!("{}: read {:02X?}", target.label, response.bytes());
        }
        Ok(response)
    }
}

/// Asynchronous handle for the EPS motherboard.
#[derive(Debug)]
pub struct Eps<B> {
    engine: Engine<B>,
    unit: EpsUnit,
}

impl<B> Clone for Eps<B> {
    fn clone(&self) -> Self {
        Self {
            engine: self.engine.clone(),
            unit: self.unit,
        }
    }
}

impl<B: Bus> Eps<B> {
    pub fn new(bus: B) -> Self {
        Self::from_shared(Arc::new(Mutex::new(bus)), EpsConfig::default())
    }

    pub fn from_shared(bus: Arc<Mutex<B>>, config: EpsConfig) -> Self {
        Self {
            engine: Engine {
                bus,
                target: eps_target(&config),
            },
            unit: config.unit,
        }
    }

    pub fn clone_shared(&self) -> Arc<Mutex<B>> {
        self.engine.bus.clone()
    }

    pub fn unit(&self) -> EpsUnit {
        self.unit
    }

    pub async fn board_status(&self) -> Result<u8> {
        self.engine.execute(eps::board_status()).await
    }

    pub async fn last_error(&self) -> Result<FirmwareError> {
        self.engine.execute(eps::last_error()).await
    }

    pub async fn version(&self) -> Result<u16> {
        self.engine.execute(eps::version()).await
    }

    pub async fn checksum(&self) -> Result<u16> {
        self.engine.execute(eps::checksum()).await
    }

    pub async fn telemetry(&self, channel: EpsChannel) -> Result<f32> {
        let raw = self.engine.execute(eps::telemetry(channel)).await?;
        Ok(self.unit.calibration(channel).convert(raw))
    }

    pub async fn telemetry_register(&self, register: u16) -> Result<f32> {
        let channel = self.engine.target.reject(EpsChannel::try_from(register))?;
        self.telemetry(channel).await
    }

    /// See [`crate::sync_client::Eps::telemetry_into`].
    pub async fn telemetry_into(&self, register: u16, out: &mut f32) -> Result<()> {
        let reading = self.telemetry_register(register).await;
        if register == EpsChannel::VidiodeOut.register() {
            return reading.map(|value| *out = value);
        }
        reading.store(out)
    }

    pub async fn watchdog_period(&self) -> Result<u16> {
        self.engine.execute(eps::watchdog_period()).await
    }

    pub async fn set_watchdog_period(&self, minutes: u8) -> Result<()> {
        self.engine.run(eps::set_watchdog_period(minutes)).await
    }

    pub async fn reset_watchdog(&self) -> Result<()> {
        self.engine.execute(eps::reset_watchdog()).await
    }

    pub async fn brown_out_resets(&self) -> Result<u16> {
        self.engine.execute(eps::brown_out_resets()).await
    }

    pub async fn auto_software_resets(&self) -> Result<u16> {
        self.engine.execute(eps::auto_software_resets()).await
    }

    pub async fn manual_resets(&self) -> Result<u16> {
        self.engine.execute(eps::manual_resets()).await
    }

    pub async fn watchdog_resets(&self) -> Result<u16> {
        self.engine.execute(eps::watchdog_resets()).await
    }

    pub async fn switch_all_pdm_on(&self) -> Result<()> {
        self.engine.execute(eps::switch_all_pdm_on()).await
    }

    pub async fn switch_all_pdm_off(&self) -> Result<()> {
        self.engine.execute(eps::switch_all_pdm_off()).await
    }

    pub async fn all_pdm_actual_state(&self) -> Result<u32> {
        self.engine.execute(eps::all_pdm_actual_state()).await
    }

    pub async fn all_pdm_expected_state(&self) -> Result<u32> {
        self.engine.execute(eps::all_pdm_expected_state()).await
    }

    pub async fn all_pdm_initial_state(&self) -> Result<u32> {
        self.engine.execute(eps::all_pdm_initial_state()).await
    }

    pub async fn set_all_pdm_to_initial_state(&self) -> Result<()> {
        self.engine.execute(eps::set_all_pdm_to_initial_state()).await
    }

    pub async fn switch_pdm_on(&self, channel: u8) -> Result<()> {
        self.engine.run(eps::switch_pdm_on(channel)).await
    }

    pub async fn switch_pdm_off(&self, channel: u8) -> Result<()> {
        self.engine.run(eps::switch_pdm_off(channel)).await
    }

    pub async fn set_pdm_initial_state_on(&self, channel: u8) -> Result<()> {
        self.engine.run(eps::set_pdm_initial_state_on(channel)).await
    }

    pub async fn set_pdm_initial_state_off(&self, channel: u8) -> Result<()> {
        self.engine.run(eps::set_pdm_initial_state_off(channel)).await
    }

    pub async fn pdm_actual_status(&self, channel: u8) -> Result<u16> {
        self.engine.run(eps::pdm_actual_status(channel)).await
    }

    pub async fn set_pdm_timer_limit(&self, channel: u8, limit: u8) -> Result<()> {
        self.engine.run(eps::set_pdm_timer_limit(channel, limit)).await
    }

    pub async fn pdm_timer_limit(&self, channel: u8) -> Result<u16> {
        self.engine.run(eps::pdm_timer_limit(channel)).await
    }

    pub async fn pdm_timer_value(&self, channel: u8) -> Result<u16> {
        self.engine.run(eps::pdm_timer_value(channel)).await
    }

    pub async fn reset_pcm(&self, mask: u8) -> Result<()> {
        self.engine.run(eps::reset_pcm(mask)).await
    }

    pub async fn manual_reset(&self) -> Result<()> {
        self.engine.execute(eps::manual_reset()).await
    }
}

/// Asynchronous handle for one battery board.
#[derive(Debug)]
pub struct Bat<B> {
    engine: Engine<B>,
    unit: BatUnit,
}

impl<B> Clone for Bat<B> {
    fn clone(&self) -> Self {
        Self {
            engine: self.engine.clone(),
            unit: self.unit,
        }
    }
}

impl<B: Bus> Bat<B> {
    pub fn new(bus: B) -> Self {
        Self::from_shared(Arc::new(Mutex::new(bus)), BatConfig::default())
    }

    pub fn from_shared(bus: Arc<Mutex<B>>, config: BatConfig) -> Self {
        Self {
            engine: Engine {
                bus,
                target: bat_target(&config),
            },
            unit: config.unit,
        }
    }

    pub fn clone_shared(&self) -> Arc<Mutex<B>> {
        self.engine.bus.clone()
    }

    pub fn unit(&self) -> BatUnit {
        self.unit
    }

    pub async fn board_status(&self) -> Result<u16> {
        self.engine.execute(bat::board_status()).await
    }

    pub async fn last_error(&self) -> Result<FirmwareError> {
        self.engine.execute(bat::last_error()).await
    }

    pub async fn version(&self) -> Result<u16> {
        self.engine.execute(bat::version()).await
    }

    pub async fn checksum(&self) -> Result<u16> {
        self.engine.execute(bat::checksum()).await
    }

    pub async fn telemetry(&self, channel: BatChannel) -> Result<f32> {
        let raw = self.engine.execute(bat::telemetry(channel)).await?;
        Ok(self.unit.calibration(channel).convert(raw))
    }

    pub async fn telemetry_index(&self, index: u8) -> Result<f32> {
        let channel = self.engine.target.reject(BatChannel::try_from(index))?;
        self.telemetry(channel).await
    }

    pub async fn brown_out_resets(&self) -> Result<u16> {
        self.engine.execute(bat::brown_out_resets()).await
    }

    pub async fn auto_software_resets(&self) -> Result<u16> {
        self.engine.execute(bat::auto_software_resets()).await
    }

    pub async fn manual_resets(&self) -> Result<u16> {
        self.engine.execute(bat::manual_resets()).await
    }

    pub async fn heater_status(&self) -> Result<u16> {
        self.engine.execute(bat::heater_status()).await
    }

    pub async fn set_heater_status(&self, code: u8) -> Result<()> {
        self.engine.run(bat::set_heater_status(code)).await
    }

    pub async fn manual_reset(&self) -> Result<()> {
        self.engine.execute(bat::manual_reset()).await
    }
}
