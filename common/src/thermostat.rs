use log::info;

use crate::{
    config::ThermostatConfig,
    error::ActuatorError,
    types::{HeaterStatus, HeaterTier},
};

/// Hardware writes requested by the controller, executed by the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaterAction {
    SetEnable(bool),
    SetWiper(u8),
}

/// Digital potentiometer plus enable line.
pub trait Actuator {
    fn probe(&mut self) -> Result<(), ActuatorError>;
    fn set_wiper(&mut self, value: u8) -> Result<(), ActuatorError>;
    fn set_enable(&mut self, on: bool) -> Result<(), ActuatorError>;

    fn apply(&mut self, actions: &[HeaterAction]) -> Result<(), ActuatorError> {
        for action in actions {
            match *action {
                HeaterAction::SetEnable(on) => self.set_enable(on)?,
                HeaterAction::SetWiper(value) => self.set_wiper(value)?,
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ThermostatController {
    pub config: ThermostatConfig,

    tier: HeaterTier,
    wiper_value: u8,
    master_enabled: bool,

    // `None` means the transition never happened, which satisfies the guard.
    last_on_ms: Option<u64>,
    last_off_ms: Option<u64>,
    last_wiper_step_ms: Option<u64>,
}

impl ThermostatController {
    pub fn new(mut config: ThermostatConfig) -> Self {
        config.sanitize();
        let wiper_value = config.wiper.clamp(config.wiper.low);
        Self {
            config,
            tier: HeaterTier::Off,
            wiper_value,
            master_enabled: true,
            last_on_ms: None,
            last_off_ms: None,
            last_wiper_step_ms: None,
        }
    }

    /// Detects the potentiometer and parks it at the low safe position with
    /// the enable line released.
    pub fn begin<A: Actuator>(&mut self, actuator: &mut A) -> Result<(), ActuatorError> {
        actuator.probe()?;
        actuator.set_enable(false)?;
        self.wiper_value = self.config.wiper.clamp(self.config.wiper.low);
        actuator.set_wiper(self.wiper_value)?;
        self.tier = HeaterTier::Off;
        info!("heater controller initialized, wiper parked at {}", self.wiper_value);
        Ok(())
    }

    /// Backdates the last off transition so the heater may start at once.
    pub fn initialize_timing(&mut self, now_ms: u64) {
        let backdate = self
            .config
            .min_off_ms
            .saturating_add(self.config.startup_backdate_ms);
        self.last_off_ms = now_ms.checked_sub(backdate);
    }

    pub fn tier(&self) -> HeaterTier {
        self.tier
    }

    pub fn wiper_value(&self) -> u8 {
        self.wiper_value
    }

    pub fn is_master_enabled(&self) -> bool {
        self.master_enabled
    }

    pub fn set_master_enabled(&mut self, enabled: bool, now_ms: u64) -> Vec<HeaterAction> {
        let mut actions = Vec::new();
        if self.master_enabled == enabled {
            return actions;
        }

        self.master_enabled = enabled;
        if enabled {
            info!("heater enabled");
        } else {
            // User/system disable wins over the minimum-on guard.
            self.set_tier(HeaterTier::Off, now_ms, &mut actions);
            info!("heater disabled");
        }
        actions
    }

    pub fn can_turn_on(&self, now_ms: u64) -> bool {
        self.time_until_can_turn_on(now_ms) == 0
    }

    pub fn can_turn_off(&self, now_ms: u64) -> bool {
        self.time_until_can_turn_off(now_ms) == 0
    }

    pub fn time_until_can_turn_on(&self, now_ms: u64) -> u64 {
        Self::remaining(self.last_off_ms, self.config.min_off_ms, now_ms)
    }

    pub fn time_until_can_turn_off(&self, now_ms: u64) -> u64 {
        Self::remaining(self.last_on_ms, self.config.min_on_ms, now_ms)
    }

    pub fn update(&mut self, cabin_temp_c: f32, target_temp_c: f32, now_ms: u64) -> Vec<HeaterAction> {
        let mut actions = Vec::new();

        if !self.master_enabled {
            self.set_tier(HeaterTier::Off, now_ms, &mut actions);
            self.step_wiper(now_ms, &mut actions);
            return actions;
        }

        // Positive means the cabin is too cold.
        let diff = target_temp_c - cabin_temp_c;

        let desired = if self.tier == HeaterTier::Off {
            if diff >= self.config.hys_on_c && self.can_turn_on(now_ms) {
                self.tier_for_diff(diff)
            } else {
                HeaterTier::Off
            }
        } else if cabin_temp_c >= target_temp_c + self.config.hys_off_c
            && self.can_turn_off(now_ms)
        {
            HeaterTier::Off
        } else {
            self.tier_for_diff(diff)
        };

        self.set_tier(desired, now_ms, &mut actions);
        self.step_wiper(now_ms, &mut actions);
        actions
    }

    /// Advances the wiper ramp without re-evaluating the tier.
    pub fn ramp(&mut self, now_ms: u64) -> Vec<HeaterAction> {
        let mut actions = Vec::new();
        self.step_wiper(now_ms, &mut actions);
        actions
    }

    pub fn status(&self, now_ms: u64) -> HeaterStatus {
        HeaterStatus {
            tier: self.tier.as_str(),
            wiper_value: self.wiper_value,
            master_enabled: self.master_enabled,
            can_turn_on: self.can_turn_on(now_ms),
            can_turn_off: self.can_turn_off(now_ms),
            on_delay_remaining_ms: self.time_until_can_turn_on(now_ms),
            off_delay_remaining_ms: self.time_until_can_turn_off(now_ms),
        }
    }

    fn remaining(last_ms: Option<u64>, guard_ms: u64, now_ms: u64) -> u64 {
        match last_ms {
            Some(last) => guard_ms.saturating_sub(now_ms.saturating_sub(last)),
            None => 0,
        }
    }

    fn tier_for_diff(&self, diff: f32) -> HeaterTier {
        if diff >= self.config.diff_high_c {
            HeaterTier::High
        } else if diff >= self.config.diff_med_c {
            HeaterTier::Med
        } else {
            HeaterTier::Low
        }
    }

    fn wiper_target(&self) -> u8 {
        let wiper = &self.config.wiper;
        let target = match self.tier {
            HeaterTier::Off | HeaterTier::Low => wiper.low,
            HeaterTier::Med => wiper.med,
            HeaterTier::High => wiper.high,
        };
        wiper.clamp(target)
    }

    fn set_tier(&mut self, tier: HeaterTier, now_ms: u64, actions: &mut Vec<HeaterAction>) {
        if self.tier == tier {
            return;
        }

        let was_on = self.tier.is_on();
        self.tier = tier;

        if tier.is_on() {
            // Every tier change restarts the minimum-on dwell; only Off->On
            // touches the enable line.
            self.last_on_ms = Some(now_ms);
            if !was_on {
                actions.push(HeaterAction::SetEnable(true));
            }
        } else {
            self.last_off_ms = Some(now_ms);
            actions.push(HeaterAction::SetEnable(false));
        }
        info!("heater tier -> {}", tier.as_str());
    }

    fn step_wiper(&mut self, now_ms: u64, actions: &mut Vec<HeaterAction>) {
        if let Some(last) = self.last_wiper_step_ms {
            if now_ms.saturating_sub(last) < self.config.wiper_step_interval_ms {
                return;
            }
        }

        let target = self.wiper_target();
        let next = match self.wiper_value.cmp(&target) {
            std::cmp::Ordering::Less => self.wiper_value + 1,
            std::cmp::Ordering::Greater => self.wiper_value - 1,
            std::cmp::Ordering::Equal => return,
        };

        self.wiper_value = self.config.wiper.clamp(next);
        self.last_wiper_step_ms = Some(now_ms);
        actions.push(HeaterAction::SetWiper(self.wiper_value));
    }
}
