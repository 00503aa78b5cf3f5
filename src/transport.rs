use crate::prelude::*;

use async_trait::async_trait;
use std::net::SocketAddr;
use tokio::time::timeout;
use tokio_modbus::client::{tcp, Context};
use tokio_modbus::prelude::*;

const CONNECT_TIMEOUT_SECS: u64 = 5;

/// The one register-level capability the rest of the crate consumes:
/// atomic request/response reads and writes against an open session.
/// The production implementation speaks Modbus TCP; tests substitute
/// scripted fakes behind the same trait.
#[async_trait]
pub trait RegisterTransport: Send {
    /// Read `count` consecutive registers starting at `address`.
    async fn read_registers(&mut self, address: u16, count: u16) -> Result<Vec<u16>>;

    /// Write a single register. The device acks or the call fails; there
    /// is no read-back.
    async fn write_register(&mut self, address: u16, value: u16) -> Result<()>;
}

/// Modbus TCP session with the device unit id fixed at open time.
pub struct Modbus {
    peer: SocketAddr,
    ctx: Context,
}

impl Modbus {
    pub async fn connect(host: &str, port: u16) -> Result<Self> {
        let peer: SocketAddr = format!("{}:{}", host, port)
            .parse()
            .map_err(|err| anyhow!("invalid inverter address {}:{}: {}", host, port, err))?;

        debug!("connecting to {}", peer);

        let ctx = timeout(
            Duration::from_secs(CONNECT_TIMEOUT_SECS),
            tcp::connect_slave(peer, Slave(map::UNIT_ID)),
        )
        .await
        .map_err(|_| anyhow!("connection to {} timed out", peer))?
        .map_err(|err| anyhow!("failed to connect to {}: {}", peer, err))?;

        Ok(Self { peer, ctx })
    }
}

#[async_trait]
impl RegisterTransport for Modbus {
    async fn read_registers(&mut self, address: u16, count: u16) -> Result<Vec<u16>> {
        self.ctx
            .read_holding_registers(address, count)
            .await
            .map_err(|err| {
                anyhow!(
                    "read of {} registers at {} from {} failed: {}",
                    count,
                    address,
                    self.peer,
                    err
                )
            })
    }

    async fn write_register(&mut self, address: u16, value: u16) -> Result<()> {
        self.ctx
            .write_single_register(address, value)
            .await
            .map_err(|err| anyhow!("write of register {} on {} failed: {}", address, self.peer, err))
    }
}
