//! EPS and battery board CLI
//!
//! A command-line interface (CLI) application for commanding the EPS
//! motherboard and its battery boards over a Linux I2C adapter.
//!
//! This tool allows users to:
//! - Read board status, firmware version, checksum and the last board error.
//! - Read calibrated telemetry, one channel at a time or all at once.
//! - Switch PDMs, configure their initial state and on-time limits.
//! - Power cycle PCM rails and configure the communications watchdog.
//! - Read and switch the battery heater controllers.
//! - Run in a continuous daemon mode that prints all telemetry to the console.
//!
//! The CLI leverages the `eps_bat_lib` crate for protocol definitions and client operations.

use anyhow::{Context, Result, bail};
use clap::Parser;
use dialoguer::Confirm;
use eps_bat_lib::{
    bus::ThreadSleep,
    config::Config,
    linux_i2c::I2cDev,
    protocol as proto,
    sync_client::{Bat, Eps},
    telemetry::{BatChannel, EpsChannel},
};
use flexi_logger::{Logger, LoggerHandle};
use log::*;
use std::sync::{Arc, Mutex};
use std::{panic, time::Duration};

mod commandline;

type SharedBus = Arc<Mutex<I2cDev>>;

fn logging_init(loglevel: LevelFilter) -> LoggerHandle {
    let log_handle = Logger::try_with_env_or_str(loglevel.as_str())
        .expect("Cannot init logging")
        .start()
        .expect("Cannot start logging");

    panic::set_hook(Box::new(|panic_info| {
        let (filename, line, column) = panic_info
            .location()
            .map(|loc| (loc.file(), loc.line(), loc.column()))
            .unwrap_or(("<unknown_file>", 0, 0));

        let cause_str = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
            *s
        } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
            s.as_str()
        } else {
            "<unknown_panic_cause>"
        };

        error!(
            target: "panic",
            "Thread '{}' panicked at '{}': {}:{} - Cause: {}",
            std::thread::current().name().unwrap_or("<unnamed>"),
            filename,
            line,
            column,
            cause_str
        );
    }));
    log_handle
}

macro_rules! print_value {
    ($label:expr, $read:expr) => {
        let value = $read.with_context(|| format!("Cannot read {}", $label))?;
        println!("{}: {}", $label, value);
    };
}

macro_rules! print_hex {
    ($label:expr, $read:expr) => {
        let value = $read.with_context(|| format!("Cannot read {}", $label))?;
        println!("{}: 0x{:04X}", $label, value);
    };
}

/// Loads the config file, if any, and applies the command line overrides.
fn load_config(args: &commandline::CliArgs) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("Cannot load config file {path:?}"))?,
        None => Config::default(),
    };
    apply_overrides(&mut config, args);
    Ok(config)
}

fn apply_overrides(config: &mut Config, args: &commandline::CliArgs) {
    if let Some(device) = &args.device {
        config.bus.device = device.clone();
    }
    if let Some(timeout) = args.timeout {
        config.eps.timeout = timeout;
        for battery in &mut config.batteries {
            battery.timeout = timeout;
        }
    }
    if let commandline::CliCommands::Eps {
        unit: Some(unit), ..
    } = &args.command
    {
        config.eps.unit = *unit;
    }
}

fn confirm_reset(board: &str) -> Result<bool> {
    println!("WARNING: This resets the {board}. It will not answer until it has rebooted.");
    Confirm::new()
        .with_prompt("Are you sure you want to proceed with the reset?")
        .default(false)
        .show_default(true)
        .interact()
        .context("Failed to get user confirmation.")
}

fn print_eps_telemetry(eps: &Eps<I2cDev>) {
    println!("EPS {} telemetry:", eps.unit());
    for channel in EpsChannel::ALL {
        match eps.telemetry(*channel) {
            Ok(value) => println!("  {:<12} {value:>10.4}", channel.name()),
            Err(error) => {
                println!("  {:<12} {:>10}", channel.name(), "error");
                debug!("Cannot read {}: {error}", channel.name());
            }
        }
    }
}

fn print_bat_telemetry(bat: &Bat<I2cDev>) {
    println!("Battery {} telemetry:", bat.unit());
    for channel in BatChannel::ALL {
        match bat.telemetry(*channel) {
            Ok(value) => println!("  {:<12} {value:>10.4}", channel.name()),
            Err(error) => {
                println!("  {:<12} {:>10}", channel.name(), "error");
                debug!("Cannot read {}: {error}", channel.name());
            }
        }
    }
}

fn format_pdm_states(states: u32) -> String {
    proto::PdmChannel::all()
        .map(|channel| {
            let state = if proto::pdm_state_is_on(states, channel) {
                "on"
            } else {
                "off"
            };
            format!("{channel}:{state}")
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn format_timer_limit(limit: u16) -> String {
    match u8::try_from(limit).map(proto::TimerLimit::try_from) {
        Ok(Ok(limit)) => limit.to_string(),
        _ => format!("0x{limit:04X}"),
    }
}

fn handle_eps(eps: &Eps<I2cDev>, command: &commandline::EpsCommands) -> Result<()> {
    use commandline::EpsCommands as C;
    match command {
        C::Status => {
            let status = eps.board_status().context("Cannot read board status")?;
            println!("Board status: 0x{status:02X}");
        }
        C::LastError => {
            print_value!("Last error", eps.last_error());
        }
        C::Version => {
            print_hex!("Version", eps.version());
        }
        C::Checksum => {
            print_hex!("Checksum", eps.checksum());
        }
        C::Telemetry { channel } => {
            let value = eps
                .telemetry(*channel)
                .with_context(|| format!("Cannot read telemetry channel {channel}"))?;
            println!("{channel}: {value:.4}");
        }
        C::TelemetryAll => print_eps_telemetry(eps),
        C::WatchdogPeriod => {
            print_value!("Watchdog period (minutes)", eps.watchdog_period());
        }
        C::SetWatchdogPeriod { minutes } => {
            info!("Executing: Set watchdog period to {minutes}");
            eps.set_watchdog_period(**minutes)
                .with_context(|| format!("Failed to set watchdog period to {minutes}"))?;
            println!("Watchdog period set to {minutes}.");
        }
        C::ResetWatchdog => {
            eps.reset_watchdog().context("Failed to reset watchdog")?;
            println!("Watchdog reset.");
        }
        C::ResetCounters => {
            print_value!("Brown-out resets", eps.brown_out_resets());
            print_value!("Automatic software resets", eps.auto_software_resets());
            print_value!("Manual resets", eps.manual_resets());
            print_value!("Watchdog resets", eps.watchdog_resets());
        }
        C::PdmAllOn => {
            eps.switch_all_pdm_on().context("Failed to switch all PDMs on")?;
            println!("All PDMs switched on.");
        }
        C::PdmAllOff => {
            eps.switch_all_pdm_off().context("Failed to switch all PDMs off")?;
            println!("All PDMs switched off.");
        }
        C::PdmStates => {
            let actual = eps.all_pdm_actual_state().context("Cannot read actual PDM states")?;
            println!("Actual:   {}", format_pdm_states(actual));
            let expected = eps.all_pdm_expected_state().context("Cannot read expected PDM states")?;
            println!("Expected: {}", format_pdm_states(expected));
            let initial = eps.all_pdm_initial_state().context("Cannot read initial PDM states")?;
            println!("Initial:  {}", format_pdm_states(initial));
        }
        C::PdmAllToInitial => {
            eps.set_all_pdm_to_initial_state()
                .context("Failed to set all PDMs to their initial state")?;
            println!("All PDMs set to their initial state.");
        }
        C::PdmOn { channel } => {
            eps.switch_pdm_on(**channel)
                .with_context(|| format!("Failed to switch PDM {channel} on"))?;
            println!("PDM {channel} switched on.");
        }
        C::PdmOff { channel } => {
            eps.switch_pdm_off(**channel)
                .with_context(|| format!("Failed to switch PDM {channel} off"))?;
            println!("PDM {channel} switched off.");
        }
        C::PdmInitialOn { channel } => {
            eps.set_pdm_initial_state_on(**channel)
                .with_context(|| format!("Failed to set initial state of PDM {channel}"))?;
            println!("PDM {channel} starts up switched on.");
        }
        C::PdmInitialOff { channel } => {
            eps.set_pdm_initial_state_off(**channel)
                .with_context(|| format!("Failed to set initial state of PDM {channel}"))?;
            println!("PDM {channel} starts up switched off.");
        }
        C::PdmStatus { channel } => {
            let status = eps
                .pdm_actual_status(**channel)
                .with_context(|| format!("Cannot read status of PDM {channel}"))?;
            println!("PDM {channel}: {}", if status & 1 == 1 { "on" } else { "off" });
        }
        C::SetPdmTimerLimit { channel, limit } => {
            eps.set_pdm_timer_limit(**channel, **limit)
                .with_context(|| format!("Failed to set timer limit of PDM {channel}"))?;
            println!("PDM {channel} timer limit set to {limit}.");
        }
        C::PdmTimerLimit { channel } => {
            let limit = eps
                .pdm_timer_limit(**channel)
                .with_context(|| format!("Cannot read timer limit of PDM {channel}"))?;
            println!("PDM {channel} timer limit: {}", format_timer_limit(limit));
        }
        C::PdmTimerValue { channel } => {
            let periods = eps
                .pdm_timer_value(**channel)
                .with_context(|| format!("Cannot read timer value of PDM {channel}"))?;
            let elapsed = proto::TimerLimit::PERIOD * u32::from(periods);
            println!(
                "PDM {channel} on for {}",
                humantime::format_duration(elapsed)
            );
        }
        C::PcmReset { mask } => {
            eps.reset_pcm(**mask)
                .with_context(|| format!("Failed to reset PCM rails {mask}"))?;
            println!("PCM rails {mask} reset.");
        }
        C::ManualReset => {
            if !confirm_reset("EPS motherboard")? {
                info!("Manual reset aborted by user.");
                return Ok(());
            }
            eps.manual_reset().context("Failed to reset the EPS")?;
            println!("EPS reset command sent.");
        }
    }
    Ok(())
}

fn handle_bat(bat: &Bat<I2cDev>, command: &commandline::BatCommands) -> Result<()> {
    use commandline::BatCommands as C;
    match command {
        C::Status => {
            let status = bat.board_status().context("Cannot read board status")?;
            println!("Board status: 0x{status:02X}");
        }
        C::LastError => {
            print_value!("Last error", bat.last_error());
        }
        C::Version => {
            print_hex!("Version", bat.version());
        }
        C::Checksum => {
            print_hex!("Checksum", bat.checksum());
        }
        C::Telemetry { channel } => {
            let value = bat
                .telemetry(*channel)
                .with_context(|| format!("Cannot read telemetry channel {channel}"))?;
            println!("{channel}: {value:.4}");
        }
        C::TelemetryAll => print_bat_telemetry(bat),
        C::ResetCounters => {
            print_value!("Brown-out resets", bat.brown_out_resets());
            print_value!("Automatic software resets", bat.auto_software_resets());
            print_value!("Manual resets", bat.manual_resets());
        }
        C::HeaterStatus => {
            let status = bat.heater_status().context("Cannot read heater status")?;
            println!(
                "Heater controller: {}",
                if status == 1 { "enabled" } else { "disabled" }
            );
        }
        C::SetHeater { code } => {
            bat.set_heater_status(*code as u8)
                .with_context(|| format!("Failed to switch heater controller {code}"))?;
            println!("Heater controller switched {code}.");
        }
        C::ManualReset => {
            if !confirm_reset(&format!("battery {}", bat.unit()))? {
                info!("Manual reset aborted by user.");
                return Ok(());
            }
            bat.manual_reset().context("Failed to reset the battery")?;
            println!("Battery reset command sent.");
        }
    }
    Ok(())
}

fn run_daemon(eps: &Eps<I2cDev>, batteries: &[Bat<I2cDev>], poll_interval: Duration) -> ! {
    loop {
        debug!("Daemon: Reading telemetry for stdout...");
        print_eps_telemetry(eps);
        for bat in batteries {
            print_bat_telemetry(bat);
        }
        std::thread::sleep(poll_interval);
    }
}

fn main() -> Result<()> {
    let args = commandline::CliArgs::parse();

    let _log_handle = logging_init(args.verbose.log_level_filter());
    info!(
        "powerctl started. Log level: {}",
        args.verbose.log_level_filter()
    );

    let config = load_config(&args)?;
    debug!("Using {config:?}");

    let bus: SharedBus = Arc::new(Mutex::new(
        I2cDev::open(&config.bus.device)
            .with_context(|| format!("Cannot open I2C adapter {}", config.bus.device))?,
    ));

    match &args.command {
        commandline::CliCommands::Eps { command, .. } => {
            let eps = Eps::from_shared(bus, ThreadSleep, config.eps);
            handle_eps(&eps, command)?;
        }
        commandline::CliCommands::Bat { battery, command } => {
            let Some(bat_config) = config.batteries.get(*battery) else {
                bail!(
                    "Battery {battery} is not configured, {} batteries known",
                    config.batteries.len()
                );
            };
            let bat = Bat::from_shared(bus, ThreadSleep, bat_config.clone());
            handle_bat(&bat, command)?;
        }
        commandline::CliCommands::Daemon { poll_interval } => {
            info!("Starting daemon mode: interval={poll_interval:?}");
            let eps = Eps::from_shared(bus.clone(), ThreadSleep, config.eps);
            let batteries: Vec<_> = config
                .batteries
                .into_iter()
                .map(|bat_config| Bat::from_shared(bus.clone(), ThreadSleep, bat_config))
                .collect();
            run_daemon(&eps, &batteries, *poll_interval);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use eps_bat_lib::telemetry::EpsUnit;

    #[test]
    fn command_line_overrides_config() {
        let args = commandline::CliArgs::parse_from([
            "powerctl",
            "--device",
            "/dev/i2c-7",
            "--timeout",
            "1s",
            "eps",
            "--unit",
            "test",
            "version",
        ]);
        let mut config = Config::default();
        apply_overrides(&mut config, &args);
        assert_eq!(config.bus.device, "/dev/i2c-7");
        assert_eq!(config.eps.timeout, Duration::from_secs(1));
        assert_eq!(config.eps.unit, EpsUnit::Test);
        assert!(config
            .batteries
            .iter()
            .all(|battery| battery.timeout == Duration::from_secs(1)));
    }

    #[test]
    fn pdm_state_listing() {
        assert_eq!(
            format_pdm_states(0b0000_0000_0110),
            "1:on 2:on 3:off 4:off 5:off 6:off 7:off 8:off 9:off 10:off"
        );
    }

    #[test]
    fn timer_limit_listing() {
        assert_eq!(format_timer_limit(0x00FF), "enabled indefinitely");
        assert_eq!(format_timer_limit(0x0000), "disabled indefinitely");
        assert_eq!(format_timer_limit(0x000A), "300s");
        assert_eq!(format_timer_limit(0x01FF), "0x01FF");
        assert_eq!(format_timer_limit(0x0005), "0x0005");
    }
}
