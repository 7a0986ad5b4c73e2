use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClockError {
    #[error("real-time clock not detected")]
    NotDetected,
    #[error("real-time clock bus transfer failed: {0}")]
    Bus(String),
    #[error("real-time clock returned an unrepresentable timestamp")]
    InvalidReading,
    #[error("alarm {0} does not exist")]
    InvalidAlarm(u8),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ActuatorError {
    #[error("digital potentiometer not detected")]
    NotDetected,
    #[error("actuator bus transfer failed: {0}")]
    Bus(String),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProbeError {
    #[error("temperature probe disconnected")]
    Disconnected,
    #[error("temperature reading {0:.1}°C outside sane range")]
    OutOfRange(f32),
    #[error("temperature probe bus transfer failed: {0}")]
    Bus(String),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ScheduleError {
    #[error("all {0} wake-up timer slots are in use")]
    CapacityExhausted(usize),
    #[error("invalid wake-up time {hour:02}:{minute:02}")]
    InvalidTime { hour: u8, minute: u8 },
    #[error("wake-up temperature {0:.1}°C outside allowed range")]
    InvalidTemperature(f32),
    #[error("timer index {0} out of range")]
    InvalidIndex(usize),
    #[error("timer slot {0} is not in use")]
    SlotDisabled(usize),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimeError {
    #[error("timestamp outside the accepted calendar range")]
    OutOfRange,
    #[error("real-time clock unavailable")]
    ClockUnavailable,
    #[error(transparent)]
    Clock(#[from] ClockError),
}
