use crate::prelude::*;
use crate::coordinator::ChannelData;

/// Direction the cycling task will request next. Explicit task-local
/// state; nothing outside the task can observe or mutate it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Charge,
    Discharge,
}

impl Direction {
    fn flipped(self) -> Self {
        match self {
            Direction::Charge => Direction::Discharge,
            Direction::Discharge => Direction::Charge,
        }
    }
}

pub struct Scheduler {
    config: Config,
    channels: Channels,
}

impl Scheduler {
    pub fn new(config: Config, channels: Channels) -> Self {
        Self { config, channels }
    }

    pub async fn start(&self) -> Result<()> {
        match self.config.control() {
            Some(control) if control.enabled() => {
                futures::try_join!(self.poll_ticker(), self.battery_cycler(control))?;
            }
            _ => self.poll_ticker().await?,
        }

        Ok(())
    }

    async fn poll_ticker(&self) -> Result<()> {
        let mut interval =
            tokio::time::interval(Duration::from_secs(self.config.poll_interval()));

        loop {
            interval.tick().await;

            if self.channels.to_coordinator.send(ChannelData::Poll).is_err() {
                bail!("send(to_coordinator) failed - channel closed?");
            }
        }
    }

    /// Alternate between charging and discharging at the configured
    /// power on every flip interval.
    async fn battery_cycler(&self, control: &config::Control) -> Result<()> {
        let mut interval = tokio::time::interval(Duration::from_secs(control.flip_interval()));
        let mut next = Direction::Charge;

        loop {
            interval.tick().await;

            let watts = match next {
                Direction::Charge => control.power(),
                Direction::Discharge => -control.power(),
            };

            if self
                .channels
                .to_coordinator
                .send(ChannelData::SetBatteryPower(watts))
                .is_err()
            {
                bail!("send(to_coordinator) failed - channel closed?");
            }

            next = next.flipped();
        }
    }
}
