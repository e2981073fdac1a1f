//! Handle configuration, optionally loaded from a YAML file.
//!
//! ```yaml
//! bus:
//!   device: /dev/i2c-1
//! eps:
//!   address: 0x2B
//!   timeout: 100ms
//!   unit: flight
//! batteries:
//!   - unit: cs05602
//!   - unit: cs05876
//!     serialize: false
//! ```

use crate::{
    bat, eps,
    telemetry::{BatUnit, EpsUnit},
};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
pub struct EpsConfig {
    #[cfg_attr(feature = "serde", serde(default = "default_eps_address"))]
    pub address: u8,
    #[cfg_attr(
        feature = "serde",
        serde(default = "default_timeout", with = "humantime_serde")
    )]
    pub timeout: Duration,
    #[cfg_attr(feature = "serde", serde(default))]
    pub unit: EpsUnit,
}

fn default_eps_address() -> u8 {
    eps::DEFAULT_ADDRESS
}

fn default_timeout() -> Duration {
    eps::DEFAULT_TIMEOUT
}

impl Default for EpsConfig {
    fn default() -> Self {
        Self {
            address: default_eps_address(),
            timeout: default_timeout(),
            unit: EpsUnit::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
pub struct BatConfig {
    /// Falls back to the address the unit is strapped to.
    #[cfg_attr(feature = "serde", serde(default))]
    pub address: Option<u8>,
    #[cfg_attr(
        feature = "serde",
        serde(default = "default_bat_timeout", with = "humantime_serde")
    )]
    pub timeout: Duration,
    #[cfg_attr(feature = "serde", serde(default))]
    pub unit: BatUnit,
    /// Hold the bus lock from request to response.
    #[cfg_attr(feature = "serde", serde(default = "default_serialize"))]
    pub serialize: bool,
}

fn default_bat_timeout() -> Duration {
    bat::DEFAULT_TIMEOUT
}

fn default_serialize() -> bool {
    true
}

impl BatConfig {
    pub fn for_unit(unit: BatUnit) -> Self {
        Self {
            address: None,
            timeout: default_bat_timeout(),
            unit,
            serialize: default_serialize(),
        }
    }

    pub fn address(&self) -> u8 {
        self.address.unwrap_or(self.unit.default_address())
    }
}

impl Default for BatConfig {
    fn default() -> Self {
        Self::for_unit(BatUnit::default())
    }
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
pub struct BusConfig {
    #[cfg_attr(feature = "serde", serde(default = "default_device"))]
    pub device: String,
}

fn default_device() -> String {
    String::from("/dev/i2c-1")
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            device: default_device(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
pub struct Config {
    #[cfg_attr(feature = "serde", serde(default))]
    pub bus: BusConfig,
    #[cfg_attr(feature = "serde", serde(default))]
    pub eps: EpsConfig,
    #[cfg_attr(feature = "serde", serde(default = "default_batteries"))]
    pub batteries: Vec<BatConfig>,
}

fn default_batteries() -> Vec<BatConfig> {
    BatUnit::ALL.into_iter().map(BatConfig::for_unit).collect()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bus: BusConfig::default(),
            eps: EpsConfig::default(),
            batteries: default_batteries(),
        }
    }
}

#[cfg(feature = "serde")]
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

#[cfg(feature = "serde")]
impl Config {
    pub fn from_reader(reader: impl std::io::Read) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_reader(reader)?)
    }

    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        log::debug!("Loading config file from {path:?}");
        Self::from_reader(std::fs::File::open(path)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_eq!(config.bus.device, "/dev/i2c-1");
        assert_eq!(config.eps.address, 0x2B);
        assert_eq!(config.eps.timeout, Duration::from_millis(100));
        assert_eq!(config.eps.unit, EpsUnit::Flight);
        assert_eq!(config.batteries.len(), 2);
        assert_eq!(config.batteries[0].address(), 0x2D);
        assert_eq!(config.batteries[1].address(), 0x2A);
        assert!(config.batteries.iter().all(|bat| bat.serialize));
    }

    #[test]
    fn explicit_battery_address() {
        let config = BatConfig {
            address: Some(0x30),
            ..BatConfig::for_unit(BatUnit::Cs05876)
        };
        assert_eq!(config.address(), 0x30);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn from_yaml() {
        let yaml = "
bus:
  device: /dev/i2c-2
eps:
  timeout: 250ms
  unit: test
batteries:
  - unit: cs05876
    serialize: false
";
        let config = Config::from_reader(yaml.as_bytes()).unwrap();
        assert_eq!(config.bus.device, "/dev/i2c-2");
        assert_eq!(config.eps.address, 0x2B);
        assert_eq!(config.eps.timeout, Duration::from_millis(250));
        assert_eq!(config.eps.unit, EpsUnit::Test);
        assert_eq!(config.batteries.len(), 1);
        assert_eq!(config.batteries[0].address(), 0x2A);
        assert!(!config.batteries[0].serialize);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn empty_yaml_is_default() {
        let config = Config::from_reader("{}".as_bytes()).unwrap();
        assert_eq!(config, Config::default());
    }
}
