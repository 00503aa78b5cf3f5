use crate::prelude::*;

use chrono::NaiveDateTime;
use num_enum::{FromPrimitive, IntoPrimitive};

/// A confirmed protocol endpoint on the local network. Produced by the
/// scanner or the address cache, consumed by `InverterSession::connect`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkDevice {
    pub host: String,
    pub port: u16,
}

impl std::fmt::Display for NetworkDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Battery operating mode cell. Only two values have been observed on
/// real firmware: 0 (standby) and 3 (forced charge/discharge power);
/// anything else passes through raw until the vendor mode table is
/// confirmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, FromPrimitive)]
#[repr(u16)]
pub enum BatteryMode {
    Standby = 0,
    ForcedPower = 3,
    #[num_enum(catch_all)]
    Other(u16),
}

impl std::fmt::Display for BatteryMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BatteryMode::Standby => write!(f, "standby"),
            BatteryMode::ForcedPower => write!(f, "forced power"),
            BatteryMode::Other(raw) => write!(f, "mode {}", raw),
        }
    }
}

/// Static identity of the device, read once per session.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceIdentity {
    pub protocol_version: u16,
    pub rated_power: f64,
    pub serial_number: String,
    pub device_type: String,
}

impl DeviceIdentity {
    /// Decode from a full DEVICE_INFO window.
    pub fn decode(info: &[u16]) -> Self {
        Self {
            protocol_version: info[map::INFO_PROTOCOL_VERSION],
            rated_power: codec::unsigned(info, map::INFO_RATED_POWER, 1.0),
            serial_number: codec::text(&info[map::INFO_SERIAL]),
            device_type: codec::text(&info[map::INFO_DEVICE_TYPE]).trim().to_string(),
        }
    }
}

/// Point-in-time view of the whole system. Import/export and
/// charge/discharge pairs are split from one signed reading each, so one
/// side of each pair is always zero.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetrySnapshot {
    pub pv_power: f64,
    pub grid_import_power: f64,
    pub grid_export_power: f64,
    pub charge_power: f64,
    pub discharge_power: f64,
    pub battery_voltage: f64,
    pub max_charge_power: f64,
    pub max_discharge_power: f64,
    pub rated_power: f64,
    pub state_of_charge: f64,
    pub state_of_health: f64,
    /// None when the device clock cells do not form a calendar date.
    pub device_time: Option<NaiveDateTime>,
    pub battery_mode: BatteryMode,
    pub serial_number: String,
    pub device_type: String,
}

impl TelemetrySnapshot {
    /// Assemble a snapshot from the three raw windows. Pure; every
    /// offset and scale comes from `register::map`.
    pub fn assemble(info: &[u16], running: &[u16], battery: &[u16]) -> Self {
        let pv_power: f64 = map::RUN_PV_POWER
            .iter()
            .map(|&offset| codec::wide(running, offset, 1.0))
            .sum();

        let grid_power = codec::signed(running, map::RUN_GRID_POWER, 1.0);
        let battery_power = codec::signed(running, map::RUN_BATTERY_POWER, 1.0);

        let battery_voltage =
            codec::unsigned(running, map::RUN_BATTERY_VOLTAGE, map::BATTERY_VOLTAGE_SCALE);
        let max_charge_current = codec::unsigned(battery, map::BAT_MAX_CHARGE_CURRENT, 1.0);
        let max_discharge_current = codec::unsigned(battery, map::BAT_MAX_DISCHARGE_CURRENT, 1.0);

        Self {
            pv_power,
            grid_import_power: if grid_power < 0.0 { -grid_power } else { 0.0 },
            grid_export_power: if grid_power > 0.0 { grid_power } else { 0.0 },
            charge_power: if battery_power < 0.0 { -battery_power } else { 0.0 },
            discharge_power: if battery_power > 0.0 { battery_power } else { 0.0 },
            battery_voltage,
            max_charge_power: max_charge_current * battery_voltage,
            max_discharge_power: max_discharge_current * battery_voltage,
            rated_power: codec::unsigned(info, map::INFO_RATED_POWER, 1.0),
            state_of_charge: codec::unsigned(battery, map::BAT_STATE_OF_CHARGE, 1.0),
            state_of_health: codec::unsigned(battery, map::BAT_STATE_OF_HEALTH, 1.0),
            device_time: codec::clock(&running[map::RUN_CLOCK]),
            battery_mode: BatteryMode::from(running[map::RUN_BATTERY_MODE]),
            serial_number: codec::text(&info[map::INFO_SERIAL]),
            device_type: codec::text(&info[map::INFO_DEVICE_TYPE]).trim().to_string(),
        }
    }
}

/// One live register session with a discovered inverter. Operations are
/// request/response and must never overlap on the transport; whoever
/// owns the session is responsible for serializing access (here, the
/// coordinator owns it exclusively).
pub struct InverterSession {
    device: NetworkDevice,
    transport: Option<Box<dyn RegisterTransport>>,
}

impl InverterSession {
    /// Open a transport to the device. Fatal on failure; a session that
    /// failed to connect must not be used.
    pub async fn connect(device: &NetworkDevice) -> Result<Self> {
        let transport = transport::Modbus::connect(&device.host, device.port).await?;
        info!("connected to inverter at {}", device);

        Ok(Self::with_transport(device.clone(), Box::new(transport)))
    }

    /// Bind a session to an already-open transport. The production path
    /// goes through `connect`; tests inject fakes here.
    pub fn with_transport(device: NetworkDevice, transport: Box<dyn RegisterTransport>) -> Self {
        Self {
            device,
            transport: Some(transport),
        }
    }

    pub fn device(&self) -> &NetworkDevice {
        &self.device
    }

    fn transport(&mut self) -> Result<&mut Box<dyn RegisterTransport>> {
        self.transport
            .as_mut()
            .ok_or_else(|| anyhow!("session to {} is closed", self.device))
    }

    /// Fetch one mapped window at its full length, so decoders can index
    /// any mapped offset without a bounds check of their own.
    async fn read_window(&mut self, window: Window) -> Result<Vec<u16>> {
        let cells = self
            .transport()?
            .read_registers(window.base, window.len)
            .await?;

        if cells.len() < window.len as usize {
            bail!(
                "short read at {}: expected {} registers, got {}",
                window.base,
                window.len,
                cells.len()
            );
        }

        Ok(cells)
    }

    pub async fn read_identity(&mut self) -> Result<DeviceIdentity> {
        let info = self.read_window(map::DEVICE_INFO).await?;

        Ok(DeviceIdentity::decode(&info))
    }

    /// Read the full telemetry set: three separate window reads. The
    /// reads are not atomic as a group, so values that straddle windows
    /// can be one device update apart; the register protocol offers no
    /// way around that.
    pub async fn read_telemetry(&mut self) -> Result<TelemetrySnapshot> {
        let info = self.read_window(map::DEVICE_INFO).await?;
        let running = self.read_window(map::RUNNING_DATA).await?;
        let battery = self.read_window(map::BATTERY_DATA).await?;

        Ok(TelemetrySnapshot::assemble(&info, &running, &battery))
    }

    /// Write the raw mode cell. Success means the write was acked, not
    /// that the device adopted the mode; there is no read-back here.
    pub async fn set_operating_mode(&mut self, mode: BatteryMode) -> Result<()> {
        let raw = u16::from(mode);
        debug!("writing battery mode {} to register {}", raw, map::BATTERY_MODE_REGISTER);

        self.transport()?
            .write_register(map::BATTERY_MODE_REGISTER, raw)
            .await
    }

    /// Request battery power: positive watts charge, negative discharge.
    pub async fn set_battery_power(&mut self, watts: f64) -> Result<()> {
        let raw = codec::encode_power(watts);
        debug!(
            "writing battery power {:.1} W as {} to register {}",
            watts,
            raw,
            map::BATTERY_POWER_REGISTER
        );

        self.transport()?
            .write_register(map::BATTERY_POWER_REGISTER, raw)
            .await
    }

    /// Drop the transport. Safe to call more than once; operations after
    /// close fail until a new session is connected.
    pub fn close(&mut self) {
        if self.transport.take().is_some() {
            debug!("closed connection to inverter at {}", self.device);
        }
    }
}
