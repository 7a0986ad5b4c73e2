use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Requests from the presentation layer, applied by the orchestrator between
/// main-loop phases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Intent {
    SetTargetTemp {
        #[serde(rename = "targetTemp")]
        target_temp_c: f32,
    },
    SetHeaterEnabled {
        enabled: bool,
    },
    AddTimer {
        hour: u8,
        minute: u8,
        #[serde(rename = "targetTemp")]
        target_temp_c: f32,
        #[serde(rename = "dayMask")]
        day_mask: u8,
        #[serde(default)]
        name: Option<String>,
    },
    RemoveTimer {
        index: usize,
    },
    EnableTimer {
        index: usize,
        enabled: bool,
    },
    SetTime {
        datetime: NaiveDateTime,
    },
    RecordActivity,
    ForceDisplayOff,
    ForceLightSleep,
    ForceDeepSleep,
    WakeUp,
    SetSleepEnabled {
        enabled: bool,
    },
    SetSleepTimeouts {
        #[serde(rename = "displayOffMs")]
        display_off_ms: u64,
        #[serde(rename = "lightSleepMs")]
        light_sleep_ms: u64,
        #[serde(rename = "deepSleepMs")]
        deep_sleep_ms: u64,
    },
    Restart,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IntentOutcome {
    Applied,
    TimerAdded { index: usize },
    Rejected { reason: String },
}

impl IntentOutcome {
    pub fn rejected(reason: impl std::fmt::Display) -> Self {
        Self::Rejected {
            reason: reason.to_string(),
        }
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, Self::Rejected { .. })
    }
}
