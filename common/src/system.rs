use chrono::NaiveDateTime;
use log::{debug, error, info, warn};

use crate::{
    config::{CadenceConfig, RuntimeConfig, TargetLimits},
    intent::{Intent, IntentOutcome},
    isr::WakeSignals,
    power::{PowerStateMachine, SleepCycle, SleepPlatform},
    probe::{ProbeEvent, ProbeMonitor, TemperatureProbe},
    thermostat::{Actuator, HeaterAction, ThermostatController},
    timekeeper::{RtcClock, TimeKeeper},
    types::{FaultFlags, SystemState, SystemStatus},
    wakeup::{DayMask, WakeupScheduler},
};

/// Hardware handed to the orchestrator at construction.
pub struct Peripherals<A, C, P, S> {
    pub actuator: A,
    pub clock: C,
    pub probe: P,
    pub platform: S,
}

/// What one main-loop iteration did, for the caller's display and pacing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Monotonic time after the iteration; later than the input after a sleep.
    pub now_ms: u64,
    pub sleep: Option<SleepCycle>,
    pub display_due: bool,
}

pub struct CabinHeaterSystem<A, C, P, S> {
    cadence: CadenceConfig,
    target_limits: TargetLimits,
    state: SystemState,

    thermostat: ThermostatController,
    timekeeper: TimeKeeper<C>,
    scheduler: WakeupScheduler,
    power: PowerStateMachine,
    probe_monitor: ProbeMonitor,

    actuator: A,
    probe: P,
    platform: S,
    signals: &'static WakeSignals,

    user_target_c: f32,
    heater_enabled: bool,
    sensor_stale: bool,
    actuator_fault: bool,
    now: NaiveDateTime,

    last_temperature_poll_ms: Option<u64>,
    last_heater_update_ms: Option<u64>,
    last_health_check_ms: Option<u64>,
    last_display_refresh_ms: Option<u64>,
}

impl<A, C, P, S> CabinHeaterSystem<A, C, P, S>
where
    A: Actuator,
    C: RtcClock,
    P: TemperatureProbe,
    S: SleepPlatform,
{
    pub fn new(
        mut config: RuntimeConfig,
        peripherals: Peripherals<A, C, P, S>,
        build_timestamp: NaiveDateTime,
        signals: &'static WakeSignals,
        now_ms: u64,
    ) -> Self {
        config.sanitize();
        let timekeeper = TimeKeeper::new(peripherals.clock, config.timekeeper, build_timestamp);
        let now = timekeeper.last_good().datetime;

        Self {
            cadence: config.cadence,
            user_target_c: config.target.default_c,
            target_limits: config.target,
            state: SystemState::Startup,
            thermostat: ThermostatController::new(config.thermostat),
            timekeeper,
            scheduler: WakeupScheduler::new(config.scheduler),
            power: PowerStateMachine::new(config.power, now_ms),
            probe_monitor: ProbeMonitor::new(config.probe),
            actuator: peripherals.actuator,
            probe: peripherals.probe,
            platform: peripherals.platform,
            signals,
            heater_enabled: true,
            sensor_stale: false,
            actuator_fault: false,
            now,
            last_temperature_poll_ms: None,
            last_heater_update_ms: None,
            last_health_check_ms: None,
            last_display_refresh_ms: None,
        }
    }

    /// Brings up clock, actuator and probe. A missing actuator leaves the
    /// system in `Error` until a restart intent succeeds.
    pub fn start(&mut self, now_ms: u64) -> SystemState {
        self.state = SystemState::Startup;
        info!("cabin heater starting");

        if !self.timekeeper.is_initialized() {
            if let Err(err) = self.timekeeper.begin(now_ms) {
                warn!("continuing without real-time clock: {err}");
            }
        }
        self.now = self.timekeeper.last_good().datetime;

        if let Err(err) = self.thermostat.begin(&mut self.actuator) {
            error!("heater actuator init failed: {err}");
            self.actuator_fault = true;
            self.state = SystemState::Error;
            return self.state;
        }
        self.actuator_fault = false;
        self.thermostat.initialize_timing(now_ms);

        self.poll_temperature(now_ms);
        self.state = SystemState::Normal;
        info!("cabin heater ready, target {:.1}°C", self.user_target_c);
        self.state
    }

    /// One main-loop iteration: drain interrupt flags and update power, then
    /// the scheduler, temperature, heater and health phases, each on its own
    /// cadence.
    pub fn tick(&mut self, now_ms: u64) -> TickReport {
        let mut report = TickReport {
            now_ms,
            ..TickReport::default()
        };

        self.power.set_heater_running(self.thermostat.tier().is_on());
        if let Some(cycle) = self.power.update(now_ms, self.signals, &mut self.platform) {
            report.now_ms = cycle.woke_at_ms;
            report.sleep = Some(cycle);
        }
        let now_ms = report.now_ms;

        let sample = self.timekeeper.get_stable_time(now_ms);
        self.now = sample.datetime;
        let trusted_now = self.timekeeper.is_working().then_some(sample.datetime);
        let cabin_c = self.probe_monitor.temperature().unwrap_or(f32::NAN);
        self.scheduler.update(cabin_c, trusted_now, now_ms);

        if is_due(self.last_temperature_poll_ms, self.cadence.temperature_poll_ms, now_ms) {
            self.poll_temperature(now_ms);
        }

        if self.state == SystemState::Normal {
            if is_due(self.last_heater_update_ms, self.cadence.heater_update_ms, now_ms) {
                self.last_heater_update_ms = Some(now_ms);
                self.update_heater(now_ms);
            } else {
                let actions = self.thermostat.ramp(now_ms);
                self.execute(&actions);
            }
            self.power.set_heater_running(self.thermostat.tier().is_on());
        }

        if is_due(self.last_health_check_ms, self.cadence.health_check_ms, now_ms) {
            self.last_health_check_ms = Some(now_ms);
            self.health_check(now_ms);
        }

        if is_due(self.last_display_refresh_ms, self.cadence.display_refresh_ms, now_ms) {
            self.last_display_refresh_ms = Some(now_ms);
            report.display_due = !self.power.is_display_off();
        }

        report
    }

    pub fn apply_intent(&mut self, intent: Intent, now_ms: u64) -> IntentOutcome {
        if !matches!(
            intent,
            Intent::ForceDisplayOff | Intent::ForceLightSleep | Intent::ForceDeepSleep
        ) {
            self.power.record_activity(now_ms);
        }

        match intent {
            Intent::SetTargetTemp { target_temp_c } => {
                self.user_target_c = self.target_limits.clamp(target_temp_c);
                info!("user target set to {:.1}°C", self.user_target_c);
                IntentOutcome::Applied
            }
            Intent::SetHeaterEnabled { enabled } => {
                self.heater_enabled = enabled;
                if self.state == SystemState::Normal {
                    let actions = self
                        .thermostat
                        .set_master_enabled(enabled && !self.sensor_stale, now_ms);
                    self.execute(&actions);
                }
                IntentOutcome::Applied
            }
            Intent::AddTimer {
                hour,
                minute,
                target_temp_c,
                day_mask,
                name,
            } => match self.scheduler.add_timer(
                hour,
                minute,
                target_temp_c,
                DayMask::from_bits(day_mask),
                name.as_deref(),
            ) {
                Ok(index) => IntentOutcome::TimerAdded { index },
                Err(err) => IntentOutcome::rejected(err),
            },
            Intent::RemoveTimer { index } => outcome(self.scheduler.remove_timer(index)),
            Intent::EnableTimer { index, enabled } => {
                outcome(self.scheduler.enable_timer(index, enabled))
            }
            Intent::SetTime { datetime } => {
                let result = self.timekeeper.set_time(datetime, now_ms);
                if result.is_ok() {
                    self.now = datetime;
                }
                outcome(result)
            }
            Intent::RecordActivity => IntentOutcome::Applied,
            Intent::ForceDisplayOff => {
                self.power.force_display_off();
                IntentOutcome::Applied
            }
            Intent::ForceLightSleep => {
                self.power.force_light_sleep(self.signals, &mut self.platform);
                IntentOutcome::Applied
            }
            Intent::ForceDeepSleep => {
                self.power.force_deep_sleep(self.signals, &mut self.platform);
                IntentOutcome::Applied
            }
            Intent::WakeUp => {
                self.power.force_wake_up(now_ms);
                IntentOutcome::Applied
            }
            Intent::SetSleepEnabled { enabled } => {
                self.power.set_sleep_enabled(enabled, now_ms);
                IntentOutcome::Applied
            }
            Intent::SetSleepTimeouts {
                display_off_ms,
                light_sleep_ms,
                deep_sleep_ms,
            } => {
                if display_off_ms > light_sleep_ms || light_sleep_ms > deep_sleep_ms {
                    return IntentOutcome::rejected(
                        "timeouts must satisfy display-off <= light sleep <= deep sleep",
                    );
                }
                self.power.set_display_off_timeout(display_off_ms);
                self.power.set_light_sleep_timeout(light_sleep_ms);
                self.power.set_deep_sleep_timeout(deep_sleep_ms);
                IntentOutcome::Applied
            }
            Intent::Restart => self.request_restart(now_ms),
        }
    }

    /// Re-runs startup. Only offered from `Error`; a running heater keeps its
    /// anti-chatter history.
    pub fn request_restart(&mut self, now_ms: u64) -> IntentOutcome {
        if self.state != SystemState::Error {
            return IntentOutcome::rejected("restart is only available from the error state");
        }
        info!("restart requested");
        match self.start(now_ms) {
            SystemState::Normal => IntentOutcome::Applied,
            _ => IntentOutcome::rejected("heater actuator still not detected"),
        }
    }

    pub fn state(&self) -> SystemState {
        self.state
    }

    pub fn user_target_c(&self) -> f32 {
        self.user_target_c
    }

    /// The scheduler's target while a wake-up timer is in progress, otherwise
    /// the user's.
    pub fn effective_target_c(&self) -> f32 {
        if self.scheduler.should_heat() {
            self.scheduler.active_target_temp()
        } else {
            self.user_target_c
        }
    }

    pub fn now(&self) -> NaiveDateTime {
        self.now
    }

    pub fn thermostat(&self) -> &ThermostatController {
        &self.thermostat
    }

    pub fn scheduler(&self) -> &WakeupScheduler {
        &self.scheduler
    }

    pub fn power(&self) -> &PowerStateMachine {
        &self.power
    }

    pub fn timekeeper(&self) -> &TimeKeeper<C> {
        &self.timekeeper
    }

    pub fn probe_monitor(&self) -> &ProbeMonitor {
        &self.probe_monitor
    }

    pub fn actuator(&self) -> &A {
        &self.actuator
    }

    /// Net rotary encoder detents for the menu layer.
    pub fn take_rotary_delta(&self) -> i32 {
        self.signals.take_rotary_delta()
    }

    pub fn faults(&self, now_ms: u64) -> FaultFlags {
        FaultFlags {
            sensor_fault: self.probe_monitor.is_faulted(),
            sensor_stale: self.probe_monitor.is_stale(now_ms),
            clock_fault: !self.timekeeper.is_working(),
            actuator_fault: self.actuator_fault,
        }
    }

    pub fn status(&self, now_ms: u64) -> SystemStatus {
        SystemStatus {
            state: self.state.as_str(),
            cabin_temp_c: self.probe_monitor.temperature().unwrap_or(f32::NAN),
            user_target_c: self.user_target_c,
            effective_target_c: self.effective_target_c(),
            now: self.now,
            heater: self.thermostat.status(now_ms),
            clock: self.timekeeper.status(),
            scheduler: self.scheduler.status(),
            power: self.power.status(now_ms),
            faults: self.faults(now_ms),
        }
    }

    fn poll_temperature(&mut self, now_ms: u64) {
        self.last_temperature_poll_ms = Some(now_ms);
        if let ProbeEvent::Updated(celsius) | ProbeEvent::Recovered(celsius) =
            self.probe_monitor.poll(&mut self.probe, now_ms)
        {
            debug!("cabin temperature {celsius:.2}°C");
        }
    }

    fn update_heater(&mut self, now_ms: u64) {
        let stale = self.probe_monitor.is_stale(now_ms);
        if stale != self.sensor_stale {
            if stale {
                warn!("no valid cabin temperature, holding heater off");
            } else {
                info!("cabin temperature fresh again");
            }
            self.sensor_stale = stale;
        }

        let mut actions = self
            .thermostat
            .set_master_enabled(self.heater_enabled && !stale, now_ms);

        match self.probe_monitor.temperature() {
            Some(cabin_c) => {
                let target_c = self.effective_target_c();
                actions.extend(self.thermostat.update(cabin_c, target_c, now_ms));
            }
            None => actions.extend(self.thermostat.ramp(now_ms)),
        }

        self.execute(&actions);
    }

    fn health_check(&mut self, now_ms: u64) {
        if !self.timekeeper.is_initialized() && self.timekeeper.begin(now_ms).is_ok() {
            info!("real-time clock detected");
        }

        if self.probe_monitor.is_faulted() {
            self.poll_temperature(now_ms);
        }

        if self.actuator_fault && self.state == SystemState::Normal {
            match self.actuator.probe() {
                Ok(()) => {
                    info!("heater actuator responding again");
                    self.actuator_fault = false;
                }
                Err(err) => warn!("heater actuator still failing: {err}"),
            }
        }

        debug!(
            "health: state={} tier={} clock_ok={} probe_fault={}",
            self.state.as_str(),
            self.thermostat.tier().as_str(),
            self.timekeeper.is_working(),
            self.probe_monitor.is_faulted()
        );
    }

    fn execute(&mut self, actions: &[HeaterAction]) {
        if actions.is_empty() {
            return;
        }
        if let Err(err) = self.actuator.apply(actions) {
            if !self.actuator_fault {
                warn!("heater actuator write failed: {err}");
            }
            self.actuator_fault = true;
        }
    }
}

fn is_due(last_ms: Option<u64>, interval_ms: u64, now_ms: u64) -> bool {
    last_ms
        .map(|last| now_ms.saturating_sub(last) >= interval_ms)
        .unwrap_or(true)
}

fn outcome<E: std::fmt::Display>(result: Result<(), E>) -> IntentOutcome {
    match result {
        Ok(()) => IntentOutcome::Applied,
        Err(err) => IntentOutcome::rejected(err),
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::Cell, rc::Rc};

    use chrono::{Duration, NaiveDate};
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        error::{ActuatorError, ClockError, ProbeError},
        power::WakeSource,
        timekeeper::Alarm,
        types::HeaterTier,
    };

    #[derive(Clone, Default)]
    struct Bench {
        elapsed_ms: Rc<Cell<u64>>,
        cabin_c: Rc<Cell<Option<f32>>>,
        actuator_present: Rc<Cell<bool>>,
    }

    #[derive(Default)]
    struct FakeActuator {
        present: Rc<Cell<bool>>,
        wiper: Option<u8>,
        enable: Option<bool>,
    }

    impl Actuator for FakeActuator {
        fn probe(&mut self) -> Result<(), ActuatorError> {
            if self.present.get() {
                Ok(())
            } else {
                Err(ActuatorError::NotDetected)
            }
        }

        fn set_wiper(&mut self, value: u8) -> Result<(), ActuatorError> {
            self.wiper = Some(value);
            Ok(())
        }

        fn set_enable(&mut self, on: bool) -> Result<(), ActuatorError> {
            self.enable = Some(on);
            Ok(())
        }
    }

    struct FakeClock {
        base: NaiveDateTime,
        elapsed_ms: Rc<Cell<u64>>,
        offset: Duration,
    }

    impl RtcClock for FakeClock {
        fn begin(&mut self) -> Result<(), ClockError> {
            Ok(())
        }

        fn now(&mut self) -> Result<NaiveDateTime, ClockError> {
            let elapsed = Duration::milliseconds(self.elapsed_ms.get() as i64);
            Ok(self.base + self.offset + elapsed)
        }

        fn adjust(&mut self, datetime: NaiveDateTime) -> Result<(), ClockError> {
            let elapsed = Duration::milliseconds(self.elapsed_ms.get() as i64);
            self.offset = datetime - self.base - elapsed;
            Ok(())
        }

        fn lost_power(&mut self) -> Result<bool, ClockError> {
            Ok(false)
        }

        fn set_alarm(&mut self, _alarm: Alarm, _at: NaiveDateTime) -> Result<(), ClockError> {
            Ok(())
        }

        fn disable_alarm(&mut self, _alarm: Alarm) -> Result<(), ClockError> {
            Ok(())
        }

        fn clear_alarm(&mut self, _alarm: Alarm) -> Result<(), ClockError> {
            Ok(())
        }

        fn alarm_fired(&mut self, _alarm: Alarm) -> Result<bool, ClockError> {
            Ok(false)
        }

        fn set_alarm_interrupt(&mut self, _alarm: Alarm, _enabled: bool) -> Result<(), ClockError> {
            Ok(())
        }

        fn alarm_interrupt_enabled(&mut self, _alarm: Alarm) -> Result<bool, ClockError> {
            Ok(false)
        }
    }

    struct FakeProbe(Rc<Cell<Option<f32>>>);

    impl TemperatureProbe for FakeProbe {
        fn read_celsius(&mut self) -> Result<f32, ProbeError> {
            self.0.get().ok_or(ProbeError::Disconnected)
        }
    }

    struct FakePlatform {
        elapsed_ms: Rc<Cell<u64>>,
        halts: usize,
    }

    impl SleepPlatform for FakePlatform {
        fn arm_wake_sources(&mut self, _sources: &[WakeSource]) {}
        fn disarm_wake_sources(&mut self) {}
        fn arm_watchdog(&mut self, _period_ms: u64) {}
        fn disarm_watchdog(&mut self) {}
        fn set_peripheral_power(&mut self, _enabled: bool) {}

        fn halt(&mut self) -> u64 {
            self.halts += 1;
            self.elapsed_ms.set(self.elapsed_ms.get() + 8_000);
            self.elapsed_ms.get()
        }
    }

    type TestSystem = CabinHeaterSystem<FakeActuator, FakeClock, FakeProbe, FakePlatform>;

    // 2026-01-05 is a Monday.
    fn monday(hour: u32, minute: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 1, 5)
            .unwrap()
            .and_hms_opt(hour, minute, 0)
            .unwrap()
    }

    fn build(
        bench: &Bench,
        signals: &'static WakeSignals,
        start_at: NaiveDateTime,
        sleep_enabled: bool,
    ) -> TestSystem {
        let mut config = RuntimeConfig::default();
        config.power.sleep_enabled = sleep_enabled;

        let peripherals = Peripherals {
            actuator: FakeActuator {
                present: bench.actuator_present.clone(),
                ..FakeActuator::default()
            },
            clock: FakeClock {
                base: start_at,
                elapsed_ms: bench.elapsed_ms.clone(),
                offset: Duration::zero(),
            },
            probe: FakeProbe(bench.cabin_c.clone()),
            platform: FakePlatform {
                elapsed_ms: bench.elapsed_ms.clone(),
                halts: 0,
            },
        };
        CabinHeaterSystem::new(config, peripherals, monday(0, 0), signals, 0)
    }

    fn bench(cabin_c: f32) -> Bench {
        let bench = Bench::default();
        bench.cabin_c.set(Some(cabin_c));
        bench.actuator_present.set(true);
        bench
    }

    fn tick_at(system: &mut TestSystem, bench: &Bench, now_ms: u64) -> TickReport {
        bench.elapsed_ms.set(now_ms);
        system.tick(now_ms)
    }

    #[test]
    fn startup_parks_actuator_and_enters_normal() {
        static SIGNALS: WakeSignals = WakeSignals::new();
        let bench = bench(21.0);
        let mut system = build(&bench, &SIGNALS, monday(12, 0), false);

        assert_eq!(system.start(0), SystemState::Normal);
        assert_eq!(system.actuator().wiper, Some(22));
        assert_eq!(system.actuator().enable, Some(false));
        assert_eq!(system.probe_monitor().temperature(), Some(21.0));
        assert_eq!(system.now(), monday(12, 0));
    }

    #[test]
    fn heats_toward_user_target() {
        static SIGNALS: WakeSignals = WakeSignals::new();
        let bench = bench(18.0);
        let mut system = build(&bench, &SIGNALS, monday(12, 0), false);
        system.start(0);
        system.apply_intent(Intent::SetTargetTemp { target_temp_c: 22.0 }, 0);

        tick_at(&mut system, &bench, 0);

        assert_eq!(system.thermostat().tier(), HeaterTier::High);
        assert_eq!(system.actuator().enable, Some(true));
        assert!(system.power().is_heater_running());

        // Ramp keeps stepping between heater updates.
        tick_at(&mut system, &bench, 120);
        tick_at(&mut system, &bench, 240);
        assert_eq!(system.actuator().wiper, Some(25));
    }

    #[test]
    fn missing_actuator_needs_explicit_restart() {
        static SIGNALS: WakeSignals = WakeSignals::new();
        let bench = bench(18.0);
        bench.actuator_present.set(false);
        let mut system = build(&bench, &SIGNALS, monday(12, 0), false);

        assert_eq!(system.start(0), SystemState::Error);
        tick_at(&mut system, &bench, 1_000);
        assert_eq!(system.actuator().enable, None);
        assert!(system.faults(1_000).actuator_fault);

        // Health checks never retry on their own.
        bench.actuator_present.set(true);
        tick_at(&mut system, &bench, 20_000);
        assert_eq!(system.state(), SystemState::Error);

        let outcome = system.apply_intent(Intent::Restart, 21_000);
        assert_eq!(outcome, IntentOutcome::Applied);
        assert_eq!(system.state(), SystemState::Normal);
        assert!(!system.faults(21_000).actuator_fault);
    }

    #[test]
    fn restart_is_refused_while_running() {
        static SIGNALS: WakeSignals = WakeSignals::new();
        let bench = bench(18.0);
        let mut system = build(&bench, &SIGNALS, monday(12, 0), false);
        system.start(0);

        assert!(system.apply_intent(Intent::Restart, 1_000).is_rejected());
    }

    #[test]
    fn active_wakeup_timer_overrides_user_target() {
        static SIGNALS: WakeSignals = WakeSignals::new();
        let bench = bench(18.0);
        let mut system = build(&bench, &SIGNALS, monday(6, 40), false);
        system.start(0);
        system.apply_intent(Intent::SetTargetTemp { target_temp_c: 10.0 }, 0);

        let outcome = system.apply_intent(
            Intent::AddTimer {
                hour: 7,
                minute: 0,
                target_temp_c: 25.0,
                day_mask: DayMask::EVERY_DAY.bits(),
                name: None,
            },
            0,
        );
        assert_eq!(outcome, IntentOutcome::TimerAdded { index: 0 });

        tick_at(&mut system, &bench, 0);

        assert!(system.scheduler().should_heat());
        assert_eq!(system.effective_target_c(), 25.0);
        assert_eq!(system.thermostat().tier(), HeaterTier::High);
    }

    #[test]
    fn stale_sensor_forces_heater_off() {
        static SIGNALS: WakeSignals = WakeSignals::new();
        let bench = bench(18.0);
        let mut system = build(&bench, &SIGNALS, monday(12, 0), false);
        system.start(0);
        system.apply_intent(Intent::SetTargetTemp { target_temp_c: 22.0 }, 0);
        tick_at(&mut system, &bench, 0);
        assert_eq!(system.thermostat().tier(), HeaterTier::High);

        bench.cabin_c.set(None);
        tick_at(&mut system, &bench, 2_000);
        assert!(system.faults(2_000).sensor_fault);
        assert_eq!(system.thermostat().tier(), HeaterTier::High);

        tick_at(&mut system, &bench, 600_000);
        assert!(system.faults(600_000).sensor_stale);
        assert_eq!(system.thermostat().tier(), HeaterTier::Off);
        assert_eq!(system.actuator().enable, Some(false));
    }

    #[test]
    fn rejected_intents_report_reason() {
        static SIGNALS: WakeSignals = WakeSignals::new();
        let bench = bench(18.0);
        let mut system = build(&bench, &SIGNALS, monday(12, 0), false);
        system.start(0);

        let outcome = system.apply_intent(Intent::RemoveTimer { index: 0 }, 0);
        assert_eq!(
            outcome,
            IntentOutcome::Rejected {
                reason: "timer slot 0 is not in use".into()
            }
        );

        let outcome = system.apply_intent(
            Intent::SetSleepTimeouts {
                display_off_ms: 60_000,
                light_sleep_ms: 30_000,
                deep_sleep_ms: 300_000,
            },
            0,
        );
        assert!(outcome.is_rejected());

        system.apply_intent(Intent::SetTargetTemp { target_temp_c: 90.0 }, 0);
        assert_eq!(system.user_target_c(), 40.0);
    }

    #[test]
    fn set_time_intent_moves_clock() {
        static SIGNALS: WakeSignals = WakeSignals::new();
        let bench = bench(18.0);
        let mut system = build(&bench, &SIGNALS, monday(12, 0), false);
        system.start(0);

        let outcome = system.apply_intent(Intent::SetTime { datetime: monday(6, 15) }, 0);
        assert_eq!(outcome, IntentOutcome::Applied);

        tick_at(&mut system, &bench, 60_000);
        assert_eq!(system.now(), monday(6, 16));
        assert!(!system.faults(60_000).clock_fault);
    }

    #[test]
    fn idle_system_sleeps_and_reports_wake_time() {
        static SIGNALS: WakeSignals = WakeSignals::new();
        let bench = bench(22.0);
        let mut system = build(&bench, &SIGNALS, monday(12, 0), true);
        system.start(0);

        let report = tick_at(&mut system, &bench, 300_000);

        let cycle = report.sleep.unwrap();
        assert_eq!(cycle.slept_in, crate::types::PowerState::DeepSleep);
        assert_eq!(report.now_ms, 308_000);
        assert_eq!(system.now(), monday(12, 0) + Duration::milliseconds(308_000));
    }

    #[test]
    fn status_serializes_for_display() {
        static SIGNALS: WakeSignals = WakeSignals::new();
        let bench = bench(18.0);
        let mut system = build(&bench, &SIGNALS, monday(12, 0), false);
        system.start(0);
        tick_at(&mut system, &bench, 0);

        let body = serde_json::to_value(system.status(0)).unwrap();
        assert_eq!(body["state"], "NORMAL");
        assert_eq!(body["heater"]["tier"], "MED");
        assert_eq!(body["effectiveTarget"], 20.0);
        assert_eq!(body["faults"]["clockFault"], false);
    }
}
