use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Discrete heater power level. The ordering is only used for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HeaterTier {
    Off,
    Low,
    Med,
    High,
}

impl HeaterTier {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Off => "OFF",
            Self::Low => "LOW",
            Self::Med => "MED",
            Self::High => "HIGH",
        }
    }

    pub fn is_on(self) -> bool {
        self != Self::Off
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WakeupState {
    Disabled,
    Armed,
    Preheating,
    Ready,
    Expired,
}

impl WakeupState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disabled => "DISABLED",
            Self::Armed => "ARMED",
            Self::Preheating => "PREHEATING",
            Self::Ready => "READY",
            Self::Expired => "EXPIRED",
        }
    }

    pub fn is_in_progress(self) -> bool {
        matches!(self, Self::Preheating | Self::Ready)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PowerState {
    Active,
    DisplayOff,
    LightSleep,
    DeepSleep,
}

impl PowerState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::DisplayOff => "DISPLAY_OFF",
            Self::LightSleep => "LIGHT_SLEEP",
            Self::DeepSleep => "DEEP_SLEEP",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WakeupReason {
    Button,
    Rotary,
    Timer,
    HeaterCycle,
    Watchdog,
    Unknown,
}

impl WakeupReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Button => "BUTTON",
            Self::Rotary => "ROTARY",
            Self::Timer => "TIMER",
            Self::HeaterCycle => "HEATER_CYCLE",
            Self::Watchdog => "WATCHDOG",
            Self::Unknown => "UNKNOWN",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SystemState {
    Startup,
    Normal,
    Error,
}

impl SystemState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Startup => "STARTUP",
            Self::Normal => "NORMAL",
            Self::Error => "ERROR",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HeaterStatus {
    pub tier: &'static str,
    #[serde(rename = "wiperValue")]
    pub wiper_value: u8,
    #[serde(rename = "masterEnabled")]
    pub master_enabled: bool,
    #[serde(rename = "canTurnOn")]
    pub can_turn_on: bool,
    #[serde(rename = "canTurnOff")]
    pub can_turn_off: bool,
    #[serde(rename = "onDelayRemainingMs")]
    pub on_delay_remaining_ms: u64,
    #[serde(rename = "offDelayRemainingMs")]
    pub off_delay_remaining_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClockStatus {
    pub initialized: bool,
    pub working: bool,
    #[serde(rename = "lastGood")]
    pub last_good: NaiveDateTime,
}

#[derive(Debug, Clone, Serialize)]
pub struct TimerView {
    pub index: usize,
    pub name: String,
    pub hour: u8,
    pub minute: u8,
    #[serde(rename = "targetTemp")]
    pub target_temp_c: f32,
    #[serde(rename = "dayMask")]
    pub day_mask: u8,
    pub state: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    #[serde(rename = "timerCount")]
    pub timer_count: usize,
    #[serde(rename = "activeTimer")]
    pub active_timer: Option<usize>,
    #[serde(rename = "shouldHeat")]
    pub should_heat: bool,
    #[serde(rename = "activeTargetTemp")]
    pub active_target_temp_c: f32,
    pub timers: Vec<TimerView>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PowerStatus {
    pub state: &'static str,
    #[serde(rename = "sleepEnabled")]
    pub sleep_enabled: bool,
    #[serde(rename = "heaterRunning")]
    pub heater_running: bool,
    #[serde(rename = "displayOff")]
    pub display_off: bool,
    #[serde(rename = "idleMs")]
    pub idle_ms: u64,
    #[serde(rename = "lastWakeupReason")]
    pub last_wakeup_reason: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct FaultFlags {
    #[serde(rename = "sensorFault")]
    pub sensor_fault: bool,
    #[serde(rename = "sensorStale")]
    pub sensor_stale: bool,
    #[serde(rename = "clockFault")]
    pub clock_fault: bool,
    #[serde(rename = "actuatorFault")]
    pub actuator_fault: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SystemStatus {
    pub state: &'static str,
    #[serde(rename = "cabinTemp")]
    pub cabin_temp_c: f32,
    #[serde(rename = "userTarget")]
    pub user_target_c: f32,
    #[serde(rename = "effectiveTarget")]
    pub effective_target_c: f32,
    pub now: NaiveDateTime,
    pub heater: HeaterStatus,
    pub clock: ClockStatus,
    pub scheduler: SchedulerStatus,
    pub power: PowerStatus,
    pub faults: FaultFlags,
}
