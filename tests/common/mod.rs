#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use goodwe_bridge::prelude::*;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

pub fn common_setup() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Scripted register transport: serves windows from a map of start
/// address to cells, records every read and write, and can be switched
/// to fail every operation.
pub struct FakeTransport {
    windows: HashMap<u16, Vec<u16>>,
    failing: bool,
    reads: Arc<Mutex<Vec<(u16, u16)>>>,
    writes: Arc<Mutex<Vec<(u16, u16)>>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self {
            windows: HashMap::new(),
            failing: false,
            reads: Arc::new(Mutex::new(Vec::new())),
            writes: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn failing() -> Self {
        let mut fake = Self::new();
        fake.failing = true;
        fake
    }

    pub fn with_window(mut self, base: u16, cells: Vec<u16>) -> Self {
        self.windows.insert(base, cells);
        self
    }

    /// Shared handle to the read log (start address, count), usable
    /// after the transport has been boxed into a session.
    pub fn reads(&self) -> Arc<Mutex<Vec<(u16, u16)>>> {
        self.reads.clone()
    }

    /// Shared handle to the write log (address, value).
    pub fn writes(&self) -> Arc<Mutex<Vec<(u16, u16)>>> {
        self.writes.clone()
    }
}

#[async_trait]
impl RegisterTransport for FakeTransport {
    async fn read_registers(&mut self, address: u16, count: u16) -> Result<Vec<u16>> {
        self.reads.lock().unwrap().push((address, count));

        if self.failing {
            bail!("scripted transport failure reading {}", address);
        }

        let cells = self
            .windows
            .get(&address)
            .ok_or_else(|| anyhow!("no window scripted at {}", address))?;

        Ok(cells.iter().take(count as usize).cloned().collect())
    }

    async fn write_register(&mut self, address: u16, value: u16) -> Result<()> {
        if self.failing {
            bail!("scripted transport failure writing {}", address);
        }

        self.writes.lock().unwrap().push((address, value));

        Ok(())
    }
}

pub fn test_device() -> NetworkDevice {
    NetworkDevice {
        host: "192.0.2.10".to_string(),
        port: map::MODBUS_PORT,
    }
}

pub fn session_with(fake: FakeTransport) -> InverterSession {
    InverterSession::with_transport(test_device(), Box::new(fake))
}

/// Pack text into cells, two bytes per cell, high byte first; unused
/// cells stay zero and overflow is dropped.
pub fn pack_text(cells: &mut [u16], text: &str) {
    for (i, chunk) in text.as_bytes().chunks(2).enumerate() {
        if i >= cells.len() {
            break;
        }
        let high = chunk[0] as u16;
        let low = *chunk.get(1).unwrap_or(&0) as u16;
        cells[i] = high << 8 | low;
    }
}

pub fn device_info_window(rated_power: u16, serial: &str, device_type: &str) -> Vec<u16> {
    let mut cells = vec![0u16; map::DEVICE_INFO.len as usize];
    cells[map::INFO_PROTOCOL_VERSION] = 2;
    cells[map::INFO_RATED_POWER] = rated_power;
    pack_text(&mut cells[map::INFO_SERIAL], serial);
    pack_text(&mut cells[map::INFO_DEVICE_TYPE], device_type);
    cells
}

/// Field-level builder for the running-data window.
pub struct RunningData {
    pub clock: [u16; 3],
    pub pv_power: [u32; 4],
    pub grid_power: i16,
    pub battery_voltage_tenths: u16,
    pub battery_power: i16,
    pub battery_mode: u16,
}

impl Default for RunningData {
    fn default() -> Self {
        Self {
            // 2025-03-15 10:30:00
            clock: [(25 << 8) | 3, (15 << 8) | 10, (30 << 8) | 0],
            pv_power: [0; 4],
            grid_power: 0,
            battery_voltage_tenths: 500,
            battery_power: 0,
            battery_mode: 0,
        }
    }
}

impl RunningData {
    pub fn window(&self) -> Vec<u16> {
        let mut cells = vec![0u16; map::RUNNING_DATA.len as usize];

        cells[0..3].copy_from_slice(&self.clock);

        for (i, &watts) in self.pv_power.iter().enumerate() {
            let offset = map::RUN_PV_POWER[i];
            cells[offset] = (watts >> 16) as u16;
            cells[offset + 1] = (watts & 0xffff) as u16;
        }

        cells[map::RUN_GRID_POWER] = self.grid_power as u16;
        cells[map::RUN_BATTERY_VOLTAGE] = self.battery_voltage_tenths;
        cells[map::RUN_BATTERY_POWER] = self.battery_power as u16;
        cells[map::RUN_BATTERY_MODE] = self.battery_mode;

        cells
    }
}

pub fn battery_data_window(
    max_charge_current: u16,
    max_discharge_current: u16,
    soc: u16,
    soh: u16,
) -> Vec<u16> {
    let mut cells = vec![0u16; map::BATTERY_DATA.len as usize];
    cells[map::BAT_MAX_CHARGE_CURRENT] = max_charge_current;
    cells[map::BAT_MAX_DISCHARGE_CURRENT] = max_discharge_current;
    cells[map::BAT_STATE_OF_CHARGE] = soc;
    cells[map::BAT_STATE_OF_HEALTH] = soh;
    cells
}

/// Minimal Modbus TCP responder on a loopback address: answers every
/// register read with zero-filled cells and records whether a request
/// ever arrived, so tests can tell a bare reachability connect from a
/// real protocol probe.
pub struct FakeInverter {
    pub addr: std::net::SocketAddr,
    probed: Arc<AtomicBool>,
}

impl FakeInverter {
    pub async fn spawn(host: &str, port: u16) -> Result<Self> {
        let listener = TcpListener::bind((host, port)).await?;
        let addr = listener.local_addr()?;
        let probed = Arc::new(AtomicBool::new(false));
        let flag = probed.clone();

        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    break;
                };
                let flag = flag.clone();

                tokio::spawn(async move {
                    // MBAP header plus a read request PDU is 12 bytes; a
                    // reachability check connects and closes without
                    // sending any, which fails the read here.
                    let mut request = [0u8; 12];
                    if socket.read_exact(&mut request).await.is_err() {
                        return;
                    }
                    flag.store(true, Ordering::SeqCst);

                    let quantity = u16::from_be_bytes([request[10], request[11]]);
                    let mut response = Vec::with_capacity(9 + 2 * quantity as usize);
                    response.extend_from_slice(&request[0..2]); // transaction id
                    response.extend_from_slice(&[0, 0]); // protocol id
                    response.extend_from_slice(&(3 + 2 * quantity).to_be_bytes());
                    response.push(request[6]); // unit id
                    response.push(request[7]); // function code
                    response.push((2 * quantity) as u8);
                    response.extend(std::iter::repeat(0u8).take(2 * quantity as usize));

                    let _ = socket.write_all(&response).await;
                });
            }
        });

        Ok(Self { addr, probed })
    }

    pub fn was_probed(&self) -> bool {
        self.probed.load(Ordering::SeqCst)
    }
}

/// A transport scripted with all three telemetry windows.
pub fn telemetry_transport(running: RunningData, battery: Vec<u16>) -> FakeTransport {
    FakeTransport::new()
        .with_window(
            map::DEVICE_INFO.base,
            device_info_window(5000, "SN12345X", "GW5000-EH  "),
        )
        .with_window(map::RUNNING_DATA.base, running.window())
        .with_window(map::BATTERY_DATA.base, battery)
}
