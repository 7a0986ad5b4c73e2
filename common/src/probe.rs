use log::{info, warn};

use crate::{config::ProbeConfig, error::ProbeError};

/// Cabin temperature sensor.
pub trait TemperatureProbe {
    fn read_celsius(&mut self) -> Result<f32, ProbeError>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProbeEvent {
    Updated(f32),
    Recovered(f32),
    /// Emitted once on the transition into the fault.
    FaultRaised(ProbeError),
    StillFaulted,
}

/// Filters probe readings and keeps the last good value while the probe is
/// faulted.
pub struct ProbeMonitor {
    pub config: ProbeConfig,
    last_good: Option<f32>,
    last_good_ms: Option<u64>,
    last_error: Option<ProbeError>,
}

impl ProbeMonitor {
    pub fn new(config: ProbeConfig) -> Self {
        Self {
            config,
            last_good: None,
            last_good_ms: None,
            last_error: None,
        }
    }

    pub fn poll<P: TemperatureProbe>(&mut self, probe: &mut P, now_ms: u64) -> ProbeEvent {
        match probe.read_celsius().and_then(|celsius| self.validate(celsius)) {
            Ok(celsius) => {
                self.last_good = Some(celsius);
                self.last_good_ms = Some(now_ms);
                if self.last_error.take().is_some() {
                    info!("temperature probe recovered at {celsius:.1}°C");
                    ProbeEvent::Recovered(celsius)
                } else {
                    ProbeEvent::Updated(celsius)
                }
            }
            Err(err) => {
                if self.last_error.is_some() {
                    return ProbeEvent::StillFaulted;
                }
                match self.last_good {
                    Some(held) => warn!("temperature probe fault: {err}; holding {held:.1}°C"),
                    None => warn!("temperature probe fault: {err}"),
                }
                self.last_error = Some(err.clone());
                ProbeEvent::FaultRaised(err)
            }
        }
    }

    fn validate(&self, celsius: f32) -> Result<f32, ProbeError> {
        if celsius.is_nan() || celsius == self.config.disconnect_sentinel_c {
            return Err(ProbeError::Disconnected);
        }
        if celsius <= self.config.min_valid_c || celsius >= self.config.max_valid_c {
            return Err(ProbeError::OutOfRange(celsius));
        }
        Ok(celsius)
    }

    /// Last accepted reading.
    pub fn temperature(&self) -> Option<f32> {
        self.last_good
    }

    pub fn is_faulted(&self) -> bool {
        self.last_error.is_some()
    }

    pub fn last_error(&self) -> Option<&ProbeError> {
        self.last_error.as_ref()
    }

    /// True when no reading has been accepted within the stale timeout, or
    /// none has been accepted at all.
    pub fn is_stale(&self, now_ms: u64) -> bool {
        self.last_good_ms
            .map(|at| now_ms.saturating_sub(at) >= self.config.stale_timeout_ms)
            .unwrap_or(true)
    }
}
