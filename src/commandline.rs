use clap::{Parser, Subcommand};
use clap_verbosity_flag::{Verbosity, WarnLevel};
use eps_bat_lib::{
    protocol as proto,
    telemetry::{BatChannel, EpsChannel, EpsUnit},
};
use std::{path::PathBuf, time::Duration};

fn parse_pdm_channel(s: &str) -> Result<proto::PdmChannel, String> {
    let channel =
        clap_num::maybe_hex::<u8>(s).map_err(|e| format!("Invalid PDM channel format: {e}"))?;
    proto::PdmChannel::try_from(channel).map_err(|e| e.to_string())
}

fn parse_pcm_mask(s: &str) -> Result<proto::PcmMask, String> {
    let mask = clap_num::maybe_hex::<u8>(s).map_err(|e| format!("Invalid PCM mask format: {e}"))?;
    proto::PcmMask::try_from(mask).map_err(|e| e.to_string())
}

fn parse_watchdog_period(s: &str) -> Result<proto::WatchdogPeriod, String> {
    let minutes = s
        .parse::<u8>()
        .map_err(|e| format!("Invalid watchdog period format: {e}"))?;
    proto::WatchdogPeriod::try_from(minutes).map_err(|e| e.to_string())
}

fn parse_timer_limit(s: &str) -> Result<proto::TimerLimit, String> {
    let limit =
        clap_num::maybe_hex::<u8>(s).map_err(|e| format!("Invalid timer limit format: {e}"))?;
    proto::TimerLimit::try_from(limit).map_err(|e| e.to_string())
}

fn parse_heater_code(s: &str) -> Result<proto::HeaterCode, String> {
    match s.to_ascii_lowercase().as_str() {
        "on" => Ok(proto::HeaterCode::On),
        "off" => Ok(proto::HeaterCode::Off),
        other => {
            let code = other
                .parse::<u8>()
                .map_err(|e| format!("Invalid heater code format: {e}"))?;
            proto::HeaterCode::try_from(code).map_err(|e| e.to_string())
        }
    }
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum EpsCommands {
    /// Read the board status flags.
    Status,
    /// Read the cause of the most recent board error.
    LastError,
    /// Read the firmware version.
    Version,
    /// Read the firmware checksum.
    Checksum,
    /// Read one telemetry channel.
    Telemetry {
        /// Channel name (e.g. "VPCM5V") or register address (e.g. "0xE210").
        channel: EpsChannel,
    },
    /// Read and display every telemetry channel.
    TelemetryAll,
    /// Read the communications watchdog period in minutes.
    WatchdogPeriod,
    /// Set the communications watchdog period.
    SetWatchdogPeriod {
        /// Period in minutes (1 to 90).
        #[arg(value_parser = parse_watchdog_period)]
        minutes: proto::WatchdogPeriod,
    },
    /// Reset the communications watchdog.
    ResetWatchdog,
    /// Read the brown-out, software, manual and watchdog reset counters.
    ResetCounters,
    /// Switch every PDM on.
    PdmAllOn,
    /// Switch every PDM off.
    PdmAllOff,
    /// Read the actual, expected and initial state of every PDM.
    PdmStates,
    /// Put every PDM into its initial state.
    PdmAllToInitial,
    /// Switch one PDM on.
    PdmOn {
        /// PDM number (1 to 10).
        #[arg(value_parser = parse_pdm_channel)]
        channel: proto::PdmChannel,
    },
    /// Switch one PDM off.
    PdmOff {
        #[arg(value_parser = parse_pdm_channel)]
        channel: proto::PdmChannel,
    },
    /// Make one PDM start up switched on.
    PdmInitialOn {
        #[arg(value_parser = parse_pdm_channel)]
        channel: proto::PdmChannel,
    },
    /// Make one PDM start up switched off.
    PdmInitialOff {
        #[arg(value_parser = parse_pdm_channel)]
        channel: proto::PdmChannel,
    },
    /// Read whether one PDM is actually on.
    PdmStatus {
        #[arg(value_parser = parse_pdm_channel)]
        channel: proto::PdmChannel,
    },
    /// Set the on-time limit of one PDM.
    /// 0x00 keeps the PDM off, 0xFF keeps it on,
    /// 0x0A to 0xFE counts 30 second periods.
    #[clap(verbatim_doc_comment)]
    SetPdmTimerLimit {
        #[arg(value_parser = parse_pdm_channel)]
        channel: proto::PdmChannel,
        #[arg(value_parser = parse_timer_limit, verbatim_doc_comment)]
        limit: proto::TimerLimit,
    },
    /// Read the on-time limit of one PDM.
    PdmTimerLimit {
        #[arg(value_parser = parse_pdm_channel)]
        channel: proto::PdmChannel,
    },
    /// Read the elapsed on-time of one PDM in 30 second periods.
    PdmTimerValue {
        #[arg(value_parser = parse_pdm_channel)]
        channel: proto::PdmChannel,
    },
    /// Power cycle PCM rails.
    /// Mask bits: 0x01 battery, 0x02 5V, 0x04 3.3V, 0x08 12V.
    #[clap(verbatim_doc_comment)]
    PcmReset {
        #[arg(value_parser = parse_pcm_mask, verbatim_doc_comment)]
        mask: proto::PcmMask,
    },
    /// Reset the whole board.
    /// **Warning:** every PDM switches to its initial state.
    #[clap(verbatim_doc_comment)]
    ManualReset,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum BatCommands {
    /// Read the board status flags.
    Status,
    /// Read the cause of the most recent board error.
    LastError,
    /// Read the firmware version.
    Version,
    /// Read the firmware checksum.
    Checksum,
    /// Read one telemetry channel.
    Telemetry {
        /// Channel name (e.g. "VBAT", "TBAT1").
        channel: BatChannel,
    },
    /// Read and display every telemetry channel.
    TelemetryAll,
    /// Read the brown-out, software and manual reset counters.
    ResetCounters,
    /// Read whether the heater controller is enabled.
    HeaterStatus,
    /// Enable or disable the heater controller.
    SetHeater {
        /// "on"/"off" or 1/0.
        #[arg(value_parser = parse_heater_code)]
        code: proto::HeaterCode,
    },
    /// Reset the battery board.
    ManualReset,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum CliCommands {
    /// Talk to the EPS motherboard.
    Eps {
        /// Calibrated unit, overrides the config file.
        #[arg(long)]
        unit: Option<EpsUnit>,

        #[command(subcommand)]
        command: EpsCommands,
    },
    /// Talk to one battery board.
    Bat {
        /// Index of the battery in the configuration (0 for the first one).
        #[arg(short, long, default_value_t = 0)]
        battery: usize,

        #[command(subcommand)]
        command: BatCommands,
    },
    /// Run in daemon mode: continuously print EPS and battery telemetry.
    #[clap(verbatim_doc_comment)]
    Daemon {
        /// Interval for fetching telemetry (e.g., "10s", "1m")
        #[arg(value_parser = humantime::parse_duration, short, long, default_value = "5sec", verbatim_doc_comment)]
        poll_interval: Duration,
    },
}

const fn about_text() -> &'static str {
    "EPS and battery board CLI - Command the power subsystem over I2C."
}

#[derive(Parser, Debug)]
#[command(name="powerctl", author, version, about=about_text(), long_about = None, propagate_version = true)]
pub struct CliArgs {
    /// Configure verbosity of logging output.
    /// -v for info, -vv for debug, -vvv for trace. Default is warnings only.
    #[command(flatten)]
    pub verbose: Verbosity<WarnLevel>,

    #[command(subcommand)]
    pub command: CliCommands,

    /// YAML configuration file, defaults are used when omitted.
    #[arg(global = true, short, long)]
    pub config: Option<PathBuf>,

    /// I2C adapter device, overrides the config file.
    /// Example: "/dev/i2c-1".
    #[arg(global = true, short, long, verbatim_doc_comment)]
    pub device: Option<String>,

    /// Bus timeout for every read and write, overrides the config file.
    /// Examples: "100ms", "1s".
    #[arg(global = true, long, value_parser = humantime::parse_duration, verbatim_doc_comment)]
    pub timeout: Option<Duration>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_parsers() {
        assert_eq!(*parse_pdm_channel("0x0A").unwrap(), 10);
        assert!(parse_pdm_channel("11").is_err());
        assert_eq!(*parse_pcm_mask("0x05").unwrap(), 0x05);
        assert!(parse_pcm_mask("0").is_err());
        assert!(parse_watchdog_period("91").is_err());
        assert_eq!(*parse_timer_limit("0xFF").unwrap(), 0xFF);
        assert!(parse_timer_limit("5").is_err());
        assert_eq!(parse_heater_code("ON").unwrap(), proto::HeaterCode::On);
        assert_eq!(parse_heater_code("0").unwrap(), proto::HeaterCode::Off);
        assert!(parse_heater_code("2").is_err());
    }

    #[test]
    fn parse_commands() {
        let args = CliArgs::try_parse_from([
            "powerctl",
            "eps",
            "--unit",
            "test",
            "set-pdm-timer-limit",
            "5",
            "0x0A",
            "--timeout",
            "250ms",
        ])
        .unwrap();
        assert_eq!(args.timeout, Some(Duration::from_millis(250)));
        match args.command {
            CliCommands::Eps { unit, command } => {
                assert_eq!(unit, Some(EpsUnit::Test));
                assert_eq!(
                    command,
                    EpsCommands::SetPdmTimerLimit {
                        channel: proto::PdmChannel::try_from(5).unwrap(),
                        limit: proto::TimerLimit::try_from(0x0A).unwrap(),
                    }
                );
            }
            other => panic!("unexpected command {other:?}"),
        }

        let args =
            CliArgs::try_parse_from(["powerctl", "bat", "-b", "1", "telemetry", "tbat2"]).unwrap();
        assert_eq!(
            args.command,
            CliCommands::Bat {
                battery: 1,
                command: BatCommands::Telemetry {
                    channel: BatChannel::Tbat2
                }
            }
        );

        let args = CliArgs::try_parse_from(["powerctl", "eps", "telemetry", "0xE308"]).unwrap();
        assert_eq!(
            args.command,
            CliCommands::Eps {
                unit: None,
                command: EpsCommands::Telemetry {
                    channel: EpsChannel::Tbrd
                }
            }
        );
    }
}
