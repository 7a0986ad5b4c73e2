use log::{debug, info};

use crate::{
    config::PowerConfig,
    isr::{WakeFlags, WakeSignals},
    types::{PowerState, PowerStatus, WakeupReason},
};

/// Interrupt sources that can be armed to end a sleep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeSource {
    Button,
    Rotary,
}

const LIGHT_SLEEP_SOURCES: &[WakeSource] = &[WakeSource::Button, WakeSource::Rotary];
const DEEP_SLEEP_SOURCES: &[WakeSource] = &[WakeSource::Button];

/// Processor and peripheral power control.
pub trait SleepPlatform {
    fn arm_wake_sources(&mut self, sources: &[WakeSource]);
    fn disarm_wake_sources(&mut self);
    fn arm_watchdog(&mut self, period_ms: u64);
    fn disarm_watchdog(&mut self);
    fn set_peripheral_power(&mut self, enabled: bool);

    /// Suspends all execution until an armed source or the watchdog fires.
    /// Returns the monotonic time at wake.
    fn halt(&mut self) -> u64;
}

/// Outcome of one trip through light or deep sleep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SleepCycle {
    pub slept_in: PowerState,
    pub woke_at_ms: u64,
    pub reason: WakeupReason,
}

pub struct PowerStateMachine {
    pub config: PowerConfig,
    state: PowerState,
    heater_running: bool,
    display_forced_off: bool,
    last_activity_ms: u64,
    last_wake_ms: u64,
    last_wake_reason: WakeupReason,
}

impl PowerStateMachine {
    pub fn new(mut config: PowerConfig, now_ms: u64) -> Self {
        config.sanitize();
        Self {
            config,
            state: PowerState::Active,
            heater_running: false,
            display_forced_off: false,
            last_activity_ms: now_ms,
            last_wake_ms: now_ms,
            last_wake_reason: WakeupReason::Unknown,
        }
    }

    pub fn state(&self) -> PowerState {
        self.state
    }

    pub fn is_heater_running(&self) -> bool {
        self.heater_running
    }

    pub fn last_wakeup_reason(&self) -> WakeupReason {
        self.last_wake_reason
    }

    pub fn time_since_activity(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.last_activity_ms)
    }

    pub fn time_since_wake(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.last_wake_ms)
    }

    /// Drains interrupt flags, then moves to whichever tier the idle time
    /// calls for. Entering a sleep tier blocks inside the platform halt and
    /// comes back Active; the returned cycle carries the wake time.
    pub fn update<P: SleepPlatform>(
        &mut self,
        now_ms: u64,
        signals: &WakeSignals,
        platform: &mut P,
    ) -> Option<SleepCycle> {
        self.absorb_flags(signals.drain_flags(), now_ms);

        if !self.config.sleep_enabled {
            if self.state != PowerState::Active {
                self.transition(PowerState::Active);
            }
            return None;
        }

        let target = self.target_state(now_ms);
        if target == self.state {
            return None;
        }

        match target {
            PowerState::LightSleep | PowerState::DeepSleep => {
                Some(self.sleep(target, signals, platform))
            }
            PowerState::Active | PowerState::DisplayOff => {
                self.transition(target);
                None
            }
        }
    }

    fn target_state(&self, now_ms: u64) -> PowerState {
        if self.should_enter_deep_sleep(now_ms) {
            PowerState::DeepSleep
        } else if self.should_enter_light_sleep(now_ms) {
            PowerState::LightSleep
        } else if self.should_display_be_off(now_ms) || self.display_forced_off {
            PowerState::DisplayOff
        } else {
            PowerState::Active
        }
    }

    pub fn should_display_be_off(&self, now_ms: u64) -> bool {
        self.config.sleep_enabled
            && self.time_since_activity(now_ms) >= self.config.display_off_timeout_ms
    }

    pub fn should_enter_light_sleep(&self, now_ms: u64) -> bool {
        self.config.sleep_enabled
            && self.time_since_activity(now_ms) >= self.config.light_sleep_timeout_ms
    }

    pub fn should_enter_deep_sleep(&self, now_ms: u64) -> bool {
        self.config.sleep_enabled
            && !self.heater_running
            && self.time_since_activity(now_ms) >= self.config.deep_sleep_timeout_ms
    }

    pub fn is_display_off(&self) -> bool {
        self.state != PowerState::Active
    }

    pub fn record_activity(&mut self, now_ms: u64) {
        self.last_activity_ms = now_ms;
        self.display_forced_off = false;
        if self.state != PowerState::Active {
            self.transition(PowerState::Active);
        }
    }

    pub fn record_button_activity(&mut self, now_ms: u64) {
        self.last_wake_reason = WakeupReason::Button;
        self.record_activity(now_ms);
    }

    pub fn record_rotary_activity(&mut self, now_ms: u64) {
        self.last_wake_reason = WakeupReason::Rotary;
        self.record_activity(now_ms);
    }

    /// A running heater rules out deep sleep on every later update.
    pub fn set_heater_running(&mut self, running: bool) {
        if running != self.heater_running {
            debug!("power: heater running = {running}");
        }
        self.heater_running = running;
    }

    pub fn set_sleep_enabled(&mut self, enabled: bool, now_ms: u64) {
        self.config.sleep_enabled = enabled;
        if !enabled {
            self.force_wake_up(now_ms);
        }
        info!("sleep {}", if enabled { "enabled" } else { "disabled" });
    }

    pub fn set_display_off_timeout(&mut self, timeout_ms: u64) {
        self.config.display_off_timeout_ms = timeout_ms;
    }

    pub fn set_light_sleep_timeout(&mut self, timeout_ms: u64) {
        self.config.light_sleep_timeout_ms = timeout_ms;
    }

    pub fn set_deep_sleep_timeout(&mut self, timeout_ms: u64) {
        self.config.deep_sleep_timeout_ms = timeout_ms;
    }

    /// Blanks the display until the next user activity.
    pub fn force_display_off(&mut self) {
        self.display_forced_off = true;
        if self.state == PowerState::Active {
            self.transition(PowerState::DisplayOff);
        }
    }

    pub fn force_light_sleep<P: SleepPlatform>(
        &mut self,
        signals: &WakeSignals,
        platform: &mut P,
    ) -> SleepCycle {
        self.sleep(PowerState::LightSleep, signals, platform)
    }

    /// Falls back to light sleep while the heater runs.
    pub fn force_deep_sleep<P: SleepPlatform>(
        &mut self,
        signals: &WakeSignals,
        platform: &mut P,
    ) -> SleepCycle {
        if self.heater_running {
            info!("deep sleep refused while heater runs, using light sleep");
            return self.force_light_sleep(signals, platform);
        }
        self.sleep(PowerState::DeepSleep, signals, platform)
    }

    pub fn force_wake_up(&mut self, now_ms: u64) {
        self.last_wake_ms = now_ms;
        self.record_activity(now_ms);
    }

    pub fn status(&self, now_ms: u64) -> PowerStatus {
        PowerStatus {
            state: self.state.as_str(),
            sleep_enabled: self.config.sleep_enabled,
            heater_running: self.heater_running,
            display_off: self.is_display_off(),
            idle_ms: self.time_since_activity(now_ms),
            last_wakeup_reason: self.last_wake_reason.as_str(),
        }
    }

    fn sleep<P: SleepPlatform>(
        &mut self,
        target: PowerState,
        signals: &WakeSignals,
        platform: &mut P,
    ) -> SleepCycle {
        let deep = target == PowerState::DeepSleep;
        self.transition(target);

        if deep {
            platform.set_peripheral_power(false);
        }
        platform.arm_wake_sources(if deep {
            DEEP_SLEEP_SOURCES
        } else {
            LIGHT_SLEEP_SOURCES
        });
        platform.arm_watchdog(self.config.watchdog_period_ms);

        let woke_at_ms = platform.halt();

        platform.disarm_watchdog();
        platform.disarm_wake_sources();
        if deep {
            platform.set_peripheral_power(true);
        }

        let woke_at_ms = woke_at_ms.max(self.last_wake_ms);
        let flags = signals.drain_flags();
        if !flags.any() {
            // A timer-based wake does not go through an interrupt handler.
            self.last_wake_reason = self.periodic_wake_reason();
        }
        self.absorb_flags(flags, woke_at_ms);

        self.last_wake_ms = woke_at_ms;
        if self.state != PowerState::Active {
            self.transition(PowerState::Active);
        }

        SleepCycle {
            slept_in: target,
            woke_at_ms,
            reason: self.last_wake_reason,
        }
    }

    /// Button, rotary and timer flags count as activity; a watchdog flag only
    /// records why the processor woke. Flags drained together are attributed
    /// in button, rotary, timer, watchdog order.
    fn absorb_flags(&mut self, flags: WakeFlags, now_ms: u64) {
        let reason = if flags.button {
            WakeupReason::Button
        } else if flags.rotary {
            WakeupReason::Rotary
        } else if flags.timer {
            WakeupReason::Timer
        } else if flags.watchdog {
            self.periodic_wake_reason()
        } else {
            return;
        };

        self.last_wake_reason = reason;
        if flags.button || flags.rotary || flags.timer {
            self.record_activity(now_ms);
        }
    }

    /// Periodic wakes while the heater runs are there to keep it serviced.
    fn periodic_wake_reason(&self) -> WakeupReason {
        if self.heater_running {
            WakeupReason::HeaterCycle
        } else {
            WakeupReason::Watchdog
        }
    }

    fn transition(&mut self, next: PowerState) {
        info!("power: {} -> {}", self.state.as_str(), next.as_str());
        self.state = next;
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    struct FakePlatform<'a> {
        signals: &'a WakeSignals,
        raise_button_on_halt: bool,
        sleep_for_ms: u64,
        clock_ms: u64,
        armed: Vec<Vec<WakeSource>>,
        peripheral_power: Vec<bool>,
        watchdog_armed: bool,
        halts: usize,
    }

    impl<'a> FakePlatform<'a> {
        fn new(signals: &'a WakeSignals) -> Self {
            Self {
                signals,
                raise_button_on_halt: false,
                sleep_for_ms: 8_000,
                clock_ms: 0,
                armed: Vec::new(),
                peripheral_power: Vec::new(),
                watchdog_armed: false,
                halts: 0,
            }
        }
    }

    impl SleepPlatform for FakePlatform<'_> {
        fn arm_wake_sources(&mut self, sources: &[WakeSource]) {
            self.armed.push(sources.to_vec());
        }

        fn disarm_wake_sources(&mut self) {}

        fn arm_watchdog(&mut self, _period_ms: u64) {
            self.watchdog_armed = true;
        }

        fn disarm_watchdog(&mut self) {
            self.watchdog_armed = false;
        }

        fn set_peripheral_power(&mut self, enabled: bool) {
            self.peripheral_power.push(enabled);
        }

        fn halt(&mut self) -> u64 {
            assert!(self.watchdog_armed);
            self.halts += 1;
            if self.raise_button_on_halt {
                self.signals.raise_button();
            }
            self.clock_ms + self.sleep_for_ms
        }
    }

    #[test]
    fn idle_past_light_timeout_enters_light_sleep() {
        let signals = WakeSignals::new();
        let mut platform = FakePlatform::new(&signals);
        let mut power = PowerStateMachine::new(PowerConfig::default(), 0);

        platform.clock_ms = 60_000;
        let cycle = power.update(60_000, &signals, &mut platform).unwrap();

        assert_eq!(
            cycle,
            SleepCycle {
                slept_in: PowerState::LightSleep,
                woke_at_ms: 68_000,
                reason: WakeupReason::Watchdog,
            }
        );
        assert_eq!(platform.armed, vec![vec![WakeSource::Button, WakeSource::Rotary]]);
        assert!(platform.peripheral_power.is_empty());
        assert_eq!(power.state(), PowerState::Active);
    }

    #[test]
    fn display_turns_off_before_sleep() {
        let signals = WakeSignals::new();
        let mut platform = FakePlatform::new(&signals);
        let mut power = PowerStateMachine::new(PowerConfig::default(), 0);

        assert_eq!(power.update(29_999, &signals, &mut platform), None);
        assert_eq!(power.state(), PowerState::Active);

        assert_eq!(power.update(30_000, &signals, &mut platform), None);
        assert_eq!(power.state(), PowerState::DisplayOff);
        assert!(power.is_display_off());
        assert_eq!(platform.halts, 0);
    }

    #[test]
    fn deep_sleep_powers_down_peripherals_and_arms_button_only() {
        let signals = WakeSignals::new();
        let mut platform = FakePlatform::new(&signals);
        let mut power = PowerStateMachine::new(PowerConfig::default(), 0);

        platform.clock_ms = 300_000;
        let cycle = power.update(300_000, &signals, &mut platform).unwrap();

        assert_eq!(cycle.slept_in, PowerState::DeepSleep);
        assert_eq!(platform.armed, vec![vec![WakeSource::Button]]);
        assert_eq!(platform.peripheral_power, vec![false, true]);
    }

    #[test]
    fn running_heater_excludes_deep_sleep() {
        let signals = WakeSignals::new();
        let mut platform = FakePlatform::new(&signals);
        let mut power = PowerStateMachine::new(PowerConfig::default(), 0);
        power.set_heater_running(true);

        assert!(!power.should_enter_deep_sleep(400_000));
        let cycle = power.update(400_000, &signals, &mut platform).unwrap();
        assert_eq!(cycle.slept_in, PowerState::LightSleep);
    }

    #[test]
    fn forced_deep_sleep_downgrades_while_heating() {
        let signals = WakeSignals::new();
        let mut platform = FakePlatform::new(&signals);
        let mut power = PowerStateMachine::new(PowerConfig::default(), 0);
        power.set_heater_running(true);

        let cycle = power.force_deep_sleep(&signals, &mut platform);
        assert_eq!(cycle.slept_in, PowerState::LightSleep);
        assert!(platform.peripheral_power.is_empty());
    }

    #[test]
    fn button_wake_counts_as_activity() {
        let signals = WakeSignals::new();
        let mut platform = FakePlatform::new(&signals);
        platform.raise_button_on_halt = true;
        let mut power = PowerStateMachine::new(PowerConfig::default(), 0);

        platform.clock_ms = 60_000;
        let cycle = power.update(60_000, &signals, &mut platform).unwrap();
        assert_eq!(cycle.reason, WakeupReason::Button);
        assert_eq!(power.time_since_activity(68_000), 0);

        assert_eq!(power.update(69_000, &signals, &mut platform), None);
        assert_eq!(power.state(), PowerState::Active);
        assert_eq!(platform.halts, 1);
    }

    #[test]
    fn watchdog_wake_is_a_repoll_not_activity() {
        let signals = WakeSignals::new();
        let mut platform = FakePlatform::new(&signals);
        let mut power = PowerStateMachine::new(PowerConfig::default(), 0);

        platform.clock_ms = 60_000;
        power.update(60_000, &signals, &mut platform).unwrap();
        assert_eq!(power.time_since_activity(68_000), 68_000);
        assert_eq!(power.time_since_wake(69_000), 1_000);

        platform.clock_ms = 69_000;
        let again = power.update(69_000, &signals, &mut platform).unwrap();
        assert_eq!(again.slept_in, PowerState::LightSleep);
        assert_eq!(platform.halts, 2);
    }

    #[test]
    fn periodic_wake_while_heating_is_a_heater_cycle() {
        let signals = WakeSignals::new();
        let mut platform = FakePlatform::new(&signals);
        let mut power = PowerStateMachine::new(PowerConfig::default(), 0);
        power.set_heater_running(true);

        platform.clock_ms = 60_000;
        let cycle = power.update(60_000, &signals, &mut platform).unwrap();

        assert_eq!(cycle.reason, WakeupReason::HeaterCycle);
        assert_eq!(power.time_since_activity(68_000), 68_000);
    }

    #[test]
    fn simultaneous_flags_follow_attribution_order() {
        let signals = WakeSignals::new();
        let mut platform = FakePlatform::new(&signals);
        let mut power = PowerStateMachine::new(PowerConfig::default(), 0);

        signals.raise_timer();
        signals.raise_button();
        power.update(10_000, &signals, &mut platform);
        assert_eq!(power.last_wakeup_reason(), WakeupReason::Button);
        assert_eq!(power.time_since_activity(10_000), 0);

        signals.raise_watchdog();
        signals.raise_timer();
        power.update(20_000, &signals, &mut platform);
        assert_eq!(power.last_wakeup_reason(), WakeupReason::Timer);
        assert_eq!(power.time_since_activity(20_000), 0);

        signals.raise_watchdog();
        power.update(25_000, &signals, &mut platform);
        assert_eq!(power.last_wakeup_reason(), WakeupReason::Watchdog);
        assert_eq!(power.time_since_activity(25_000), 5_000);
    }

    #[test]
    fn direct_input_records_reason_and_wakes_display() {
        let signals = WakeSignals::new();
        let mut platform = FakePlatform::new(&signals);
        let mut power = PowerStateMachine::new(PowerConfig::default(), 0);
        power.update(30_000, &signals, &mut platform);
        assert_eq!(power.state(), PowerState::DisplayOff);

        power.record_rotary_activity(31_000);
        assert_eq!(power.state(), PowerState::Active);
        assert_eq!(power.last_wakeup_reason(), WakeupReason::Rotary);

        power.record_button_activity(32_000);
        assert_eq!(power.last_wakeup_reason(), WakeupReason::Button);
        assert_eq!(power.time_since_activity(32_000), 0);
    }

    #[test]
    fn pending_flags_are_drained_before_tiering() {
        let signals = WakeSignals::new();
        let mut platform = FakePlatform::new(&signals);
        let mut power = PowerStateMachine::new(PowerConfig::default(), 0);

        signals.raise_rotary(crate::isr::RotaryDirection::Clockwise);
        assert_eq!(power.update(90_000, &signals, &mut platform), None);
        assert_eq!(power.last_wakeup_reason(), WakeupReason::Rotary);
        assert_eq!(power.state(), PowerState::Active);
    }

    #[test]
    fn disabled_sleep_pins_active() {
        let signals = WakeSignals::new();
        let mut platform = FakePlatform::new(&signals);
        let mut power = PowerStateMachine::new(PowerConfig::default(), 0);

        power.update(30_000, &signals, &mut platform);
        assert_eq!(power.state(), PowerState::DisplayOff);

        power.set_sleep_enabled(false, 31_000);
        assert_eq!(power.state(), PowerState::Active);
        assert_eq!(power.update(1_000_000, &signals, &mut platform), None);
        assert_eq!(power.state(), PowerState::Active);
        assert!(!power.should_enter_light_sleep(1_000_000));
    }

    #[test]
    fn forced_display_off_holds_until_activity() {
        let signals = WakeSignals::new();
        let mut platform = FakePlatform::new(&signals);
        let mut power = PowerStateMachine::new(PowerConfig::default(), 0);

        power.force_display_off();
        power.update(1_000, &signals, &mut platform);
        assert_eq!(power.state(), PowerState::DisplayOff);

        power.record_activity(2_000);
        assert_eq!(power.state(), PowerState::Active);
        power.update(3_000, &signals, &mut platform);
        assert_eq!(power.state(), PowerState::Active);
    }

    #[test]
    fn timeouts_are_adjustable() {
        let mut power = PowerStateMachine::new(PowerConfig::default(), 0);
        power.set_display_off_timeout(5_000);
        power.set_light_sleep_timeout(10_000);
        power.set_deep_sleep_timeout(20_000);

        assert!(power.should_display_be_off(5_000));
        assert!(power.should_enter_light_sleep(10_000));
        assert!(!power.should_enter_deep_sleep(19_999));
        assert!(power.should_enter_deep_sleep(20_000));
    }
}
