pub use std::time::Duration;

pub use anyhow::{anyhow, bail, Result};
pub use log::{debug, error, info, trace, warn};
pub use tokio::sync::broadcast;

pub use crate::channels::Channels;
pub use crate::config::{self, Config};
pub use crate::coordinator::Coordinator;
pub use crate::inverter::{
    BatteryMode, DeviceIdentity, InverterSession, NetworkDevice, TelemetrySnapshot,
};
pub use crate::options::Options;
pub use crate::register::{codec, map, Window};
pub use crate::scheduler::Scheduler;
pub use crate::transport::{self, RegisterTransport};
