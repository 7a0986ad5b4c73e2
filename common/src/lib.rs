pub mod config;
pub mod error;
pub mod intent;
pub mod isr;
pub mod power;
pub mod probe;
pub mod system;
pub mod thermostat;
pub mod timekeeper;
pub mod types;
pub mod wakeup;

pub use config::{RuntimeConfig, ThermostatConfig, MAX_WAKEUP_TIMERS};
pub use error::{ActuatorError, ClockError, ProbeError, ScheduleError, TimeError};
pub use intent::{Intent, IntentOutcome};
pub use isr::{WakeSignals, WAKE_SIGNALS};
pub use power::{PowerStateMachine, SleepCycle, SleepPlatform, WakeSource};
pub use probe::{ProbeMonitor, TemperatureProbe};
pub use system::{CabinHeaterSystem, Peripherals, TickReport};
pub use thermostat::{Actuator, HeaterAction, ThermostatController};
pub use timekeeper::{Alarm, RtcClock, TimeKeeper, TimeSample};
pub use types::{HeaterTier, PowerState, SystemState, SystemStatus, WakeupReason, WakeupState};
pub use wakeup::{DayMask, DayOfWeek, WakeupScheduler};
