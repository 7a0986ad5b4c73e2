use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// Hard limit on concurrently configured wake-up timers.
pub const MAX_WAKEUP_TIMERS: usize = 3;

/// Safe sub-range of the DS3502 wiper register and the per-tier targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WiperLimits {
    pub min_safe: u8,
    pub low: u8,
    pub med: u8,
    pub high: u8,
    pub max_safe: u8,
}

impl Default for WiperLimits {
    fn default() -> Self {
        Self {
            min_safe: 20,
            low: 22,
            med: 25,
            high: 28,
            max_safe: 30,
        }
    }
}

impl WiperLimits {
    pub fn clamp(&self, value: u8) -> u8 {
        value.clamp(self.min_safe, self.max_safe)
    }

    pub fn sanitize(&mut self) {
        // DS3502 wiper register is 7 bits wide.
        self.max_safe = self.max_safe.min(127);
        if self.min_safe > self.max_safe {
            self.min_safe = self.max_safe;
        }
        self.low = self.clamp(self.low);
        self.med = self.clamp(self.med);
        self.high = self.clamp(self.high);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThermostatConfig {
    pub min_on_ms: u64,
    pub min_off_ms: u64,
    pub hys_on_c: f32,
    pub hys_off_c: f32,
    pub diff_med_c: f32,
    pub diff_high_c: f32,
    pub wiper_step_interval_ms: u64,
    pub wiper: WiperLimits,
    pub startup_backdate_ms: u64,
}

impl Default for ThermostatConfig {
    fn default() -> Self {
        Self {
            min_on_ms: 600_000,
            min_off_ms: 300_000,
            hys_on_c: 1.5,
            hys_off_c: 0.5,
            diff_med_c: 1.0,
            diff_high_c: 3.0,
            wiper_step_interval_ms: 120,
            wiper: WiperLimits::default(),
            startup_backdate_ms: 1_000,
        }
    }
}

impl ThermostatConfig {
    pub fn sanitize(&mut self) {
        self.hys_on_c = self.hys_on_c.clamp(0.1, 10.0);
        self.hys_off_c = self.hys_off_c.clamp(0.0, 10.0);
        self.diff_med_c = self.diff_med_c.clamp(0.0, 20.0);
        self.diff_high_c = self.diff_high_c.clamp(self.diff_med_c, 20.0);
        self.wiper_step_interval_ms = self.wiper_step_interval_ms.max(1);
        self.wiper.sanitize();
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeKeeperConfig {
    pub valid_year_min: i32,
    pub valid_year_max: i32,
    pub jump_threshold_secs: i64,
    pub fallback: NaiveDateTime,
}

impl Default for TimeKeeperConfig {
    fn default() -> Self {
        Self {
            valid_year_min: 2020,
            valid_year_max: 2099,
            jump_threshold_secs: 300,
            fallback: default_fallback_time(),
        }
    }
}

impl TimeKeeperConfig {
    pub fn sanitize(&mut self) {
        if self.valid_year_min > self.valid_year_max {
            std::mem::swap(&mut self.valid_year_min, &mut self.valid_year_max);
        }
        self.jump_threshold_secs = self.jump_threshold_secs.clamp(10, 86_400);
    }
}

fn default_fallback_time() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 1, 1)
        .and_then(|date| date.and_hms_opt(12, 0, 0))
        .unwrap_or_default()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub preheat_minutes: u32,
    pub stop_after_minutes: u32,
    pub ready_margin_c: f32,
    pub min_timer_temp_c: f32,
    pub max_timer_temp_c: f32,
    pub default_target_temp_c: f32,
    pub update_interval_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            preheat_minutes: 30,
            stop_after_minutes: 60,
            ready_margin_c: 1.0,
            min_timer_temp_c: 15.0,
            max_timer_temp_c: 30.0,
            default_target_temp_c: 20.0,
            update_interval_ms: 5_000,
        }
    }
}

impl SchedulerConfig {
    pub fn sanitize(&mut self) {
        self.preheat_minutes = self.preheat_minutes.clamp(1, 180);
        self.stop_after_minutes = self.stop_after_minutes.clamp(1, 240);
        self.ready_margin_c = self.ready_margin_c.clamp(0.0, 5.0);
        if self.min_timer_temp_c > self.max_timer_temp_c {
            std::mem::swap(&mut self.min_timer_temp_c, &mut self.max_timer_temp_c);
        }
        self.default_target_temp_c = self
            .default_target_temp_c
            .clamp(self.min_timer_temp_c, self.max_timer_temp_c);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PowerConfig {
    pub sleep_enabled: bool,
    pub display_off_timeout_ms: u64,
    pub light_sleep_timeout_ms: u64,
    pub deep_sleep_timeout_ms: u64,
    pub watchdog_period_ms: u64,
}

impl Default for PowerConfig {
    fn default() -> Self {
        Self {
            sleep_enabled: true,
            display_off_timeout_ms: 30_000,
            light_sleep_timeout_ms: 60_000,
            deep_sleep_timeout_ms: 300_000,
            watchdog_period_ms: 8_000,
        }
    }
}

impl PowerConfig {
    pub fn sanitize(&mut self) {
        self.watchdog_period_ms = self.watchdog_period_ms.clamp(1_000, 60_000);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeConfig {
    pub min_valid_c: f32,
    pub max_valid_c: f32,
    pub disconnect_sentinel_c: f32,
    pub stale_timeout_ms: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            min_valid_c: -50.0,
            max_valid_c: 100.0,
            disconnect_sentinel_c: -127.0,
            stale_timeout_ms: 600_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CadenceConfig {
    pub temperature_poll_ms: u64,
    pub heater_update_ms: u64,
    pub display_refresh_ms: u64,
    pub health_check_ms: u64,
}

impl Default for CadenceConfig {
    fn default() -> Self {
        Self {
            temperature_poll_ms: 2_000,
            heater_update_ms: 1_000,
            display_refresh_ms: 200,
            health_check_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetLimits {
    pub min_c: f32,
    pub max_c: f32,
    pub default_c: f32,
}

impl Default for TargetLimits {
    fn default() -> Self {
        Self {
            min_c: 5.0,
            max_c: 40.0,
            default_c: 20.0,
        }
    }
}

impl TargetLimits {
    pub fn clamp(&self, temp_c: f32) -> f32 {
        if temp_c.is_finite() {
            temp_c.clamp(self.min_c, self.max_c)
        } else {
            self.default_c
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub thermostat: ThermostatConfig,
    #[serde(default)]
    pub timekeeper: TimeKeeperConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub power: PowerConfig,
    #[serde(default)]
    pub probe: ProbeConfig,
    #[serde(default)]
    pub cadence: CadenceConfig,
    #[serde(default)]
    pub target: TargetLimits,
}

impl RuntimeConfig {
    pub fn sanitize(&mut self) {
        self.thermostat.sanitize();
        self.timekeeper.sanitize();
        self.scheduler.sanitize();
        self.power.sanitize();
        if self.target.min_c > self.target.max_c {
            std::mem::swap(&mut self.target.min_c, &mut self.target.max_c);
        }
        self.target.default_c = self.target.clamp(self.target.default_c);
    }
}
