use crate::prelude::*;

/// Commands executed against the session, strictly in arrival order.
/// Draining them through one receiver is what keeps register operations
/// from ever overlapping on the single transport.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelData {
    Poll,
    SetBatteryMode(BatteryMode),
    SetBatteryPower(f64),
    Shutdown,
}

/// Exclusive owner of the inverter session for its whole life.
pub struct Coordinator {
    session: InverterSession,
    receiver: broadcast::Receiver<ChannelData>,
}

impl Coordinator {
    pub fn new(session: InverterSession, channels: &Channels) -> Self {
        // Subscribe at construction so commands sent before start() runs
        // are not lost.
        let receiver = channels.to_coordinator.subscribe();

        Self { session, receiver }
    }

    pub async fn start(&mut self) -> Result<()> {
        loop {
            match self.receiver.recv().await {
                Ok(ChannelData::Shutdown) => break,
                Ok(data) => self.process(data).await,
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!("coordinator lagging, {} commands dropped", missed);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }

        self.session.close();

        Ok(())
    }

    /// Failures are reported per command and do not stop the loop; a
    /// failed poll must show up in the log, not silently stall the next.
    async fn process(&mut self, data: ChannelData) {
        let result = match data {
            ChannelData::Poll => self.poll().await,
            ChannelData::SetBatteryMode(mode) => self.set_battery_mode(mode).await,
            ChannelData::SetBatteryPower(watts) => self.set_battery_power(watts).await,
            ChannelData::Shutdown => return,
        };

        if let Err(err) = result {
            error!("command failed on {}: {:#}", self.session.device(), err);
        }
    }

    async fn poll(&mut self) -> Result<()> {
        let status = self.session.read_telemetry().await?;

        info!(
            "pv {:.0} W | grid import {:.0} W export {:.0} W | battery charge {:.0} W discharge {:.0} W ({:.1} V, soc {:.0}%, soh {:.0}%) | {}",
            status.pv_power,
            status.grid_import_power,
            status.grid_export_power,
            status.charge_power,
            status.discharge_power,
            status.battery_voltage,
            status.state_of_charge,
            status.state_of_health,
            status.battery_mode,
        );

        if let Some(device_time) = status.device_time {
            debug!("device clock reads {}", device_time);
        }

        Ok(())
    }

    async fn set_battery_mode(&mut self, mode: BatteryMode) -> Result<()> {
        info!("setting battery mode to {}", mode);

        self.session.set_operating_mode(mode).await
    }

    async fn set_battery_power(&mut self, watts: f64) -> Result<()> {
        if watts < 0.0 {
            info!("requesting battery discharge at {:.0} W", -watts);
        } else {
            info!("requesting battery charge at {:.0} W", watts);
        }

        self.session.set_battery_power(watts).await
    }
}
