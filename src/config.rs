use crate::prelude::*;

use serde::Deserialize;

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub inverter: Inverter,

    /// Seconds between telemetry polls.
    #[serde(default = "Config::default_poll_interval")]
    pub poll_interval: u64,

    /// Battery cycling; absent means monitor only.
    pub control: Option<Control>,

    #[serde(default = "Config::default_loglevel")]
    pub loglevel: String,
}

// Inverter {{{
#[derive(Clone, Debug, Default, Deserialize)]
pub struct Inverter {
    /// First three octets of the /24 to scan. Derived from the local
    /// address when absent.
    pub subnet: Option<String>,

    pub port: Option<u16>,

    /// Plain-text file remembering the last confirmed address; skips the
    /// scan on the next start.
    pub cache_file: Option<String>,
}

impl Inverter {
    pub fn subnet(&self) -> Option<&str> {
        self.subnet.as_deref()
    }

    pub fn port(&self) -> u16 {
        self.port.unwrap_or(map::MODBUS_PORT)
    }

    pub fn cache_file(&self) -> Option<&str> {
        self.cache_file.as_deref()
    }
} // }}}

// Control {{{
#[derive(Clone, Debug, Deserialize)]
pub struct Control {
    #[serde(default)]
    pub enabled: bool,

    /// Watts requested on each cycle; the sign is supplied by the
    /// scheduler's charge/discharge alternation.
    pub power: f64,

    #[serde(default = "Config::default_flip_interval")]
    pub flip_interval: u64,
}

impl Control {
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn power(&self) -> f64 {
        self.power
    }

    pub fn flip_interval(&self) -> u64 {
        self.flip_interval
    }
} // }}}

impl Config {
    pub fn new(file: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(file)
            .map_err(|err| anyhow!("error reading config file {}: {}", file, err))?;

        Self::from_yaml(&contents)
    }

    pub fn from_yaml(contents: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(contents)
            .map_err(|err| anyhow!("error parsing config: {}", err))?;

        if let Some(subnet) = config.inverter.subnet() {
            if format!("{}.1", subnet).parse::<std::net::Ipv4Addr>().is_err() {
                bail!(
                    "inverter.subnet must be the first three octets of an IPv4 network, got {:?}",
                    subnet
                );
            }
        }

        if config.poll_interval == 0 {
            bail!("poll_interval must be at least 1 second");
        }

        Ok(config)
    }

    pub fn inverter(&self) -> &Inverter {
        &self.inverter
    }

    pub fn poll_interval(&self) -> u64 {
        self.poll_interval
    }

    pub fn control(&self) -> Option<&Control> {
        self.control.as_ref()
    }

    pub fn loglevel(&self) -> &str {
        &self.loglevel
    }

    fn default_poll_interval() -> u64 {
        5
    }

    fn default_flip_interval() -> u64 {
        300
    }

    fn default_loglevel() -> String {
        "info".to_string()
    }
}
