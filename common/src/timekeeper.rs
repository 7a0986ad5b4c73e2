use chrono::{Datelike, Duration, NaiveDateTime, Timelike};
use log::{info, warn};

use crate::{
    config::TimeKeeperConfig,
    error::{ClockError, TimeError},
    types::ClockStatus,
};

/// The two independent alarm registers of the battery-backed clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Alarm {
    /// Matches hour, minute and second.
    One,
    /// Matches hour and minute.
    Two,
}

impl Alarm {
    pub fn from_number(number: u8) -> Result<Self, ClockError> {
        match number {
            1 => Ok(Self::One),
            2 => Ok(Self::Two),
            other => Err(ClockError::InvalidAlarm(other)),
        }
    }

    pub fn number(self) -> u8 {
        match self {
            Self::One => 1,
            Self::Two => 2,
        }
    }
}

/// Battery-backed real-time clock with second resolution.
pub trait RtcClock {
    fn begin(&mut self) -> Result<(), ClockError>;
    fn now(&mut self) -> Result<NaiveDateTime, ClockError>;
    fn adjust(&mut self, datetime: NaiveDateTime) -> Result<(), ClockError>;
    fn lost_power(&mut self) -> Result<bool, ClockError>;

    fn set_alarm(&mut self, alarm: Alarm, at: NaiveDateTime) -> Result<(), ClockError>;
    fn disable_alarm(&mut self, alarm: Alarm) -> Result<(), ClockError>;
    fn clear_alarm(&mut self, alarm: Alarm) -> Result<(), ClockError>;
    fn alarm_fired(&mut self, alarm: Alarm) -> Result<bool, ClockError>;
    fn set_alarm_interrupt(&mut self, alarm: Alarm, enabled: bool) -> Result<(), ClockError>;
    fn alarm_interrupt_enabled(&mut self, alarm: Alarm) -> Result<bool, ClockError>;
}

/// A wall-clock reading paired with the monotonic time it was taken at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeSample {
    pub datetime: NaiveDateTime,
    pub captured_ms: u64,
}

/// Validates clock readings and hands out a single trustworthy "now".
///
/// A reading is accepted when its fields fall inside the configured calendar
/// window and it agrees with the previous good sample advanced by the elapsed
/// monotonic time. Rejected readings leave the last good sample frozen; it is
/// not extrapolated forward.
pub struct TimeKeeper<C> {
    clock: C,
    pub config: TimeKeeperConfig,
    build_timestamp: NaiveDateTime,
    initialized: bool,
    working: bool,
    last_good: TimeSample,
    has_reference: bool,
}

impl<C: RtcClock> TimeKeeper<C> {
    pub fn new(clock: C, mut config: TimeKeeperConfig, build_timestamp: NaiveDateTime) -> Self {
        config.sanitize();
        let last_good = TimeSample {
            datetime: config.fallback,
            captured_ms: 0,
        };
        Self {
            clock,
            config,
            build_timestamp,
            initialized: false,
            working: false,
            last_good,
            has_reference: false,
        }
    }

    pub fn begin(&mut self, now_ms: u64) -> Result<(), ClockError> {
        if let Err(err) = self.clock.begin() {
            warn!("real-time clock unavailable: {err}");
            self.initialized = false;
            self.working = false;
            return Err(err);
        }
        self.initialized = true;

        match self.clock.lost_power() {
            Ok(true) => {
                warn!("real-time clock lost power, seeding from build timestamp");
                if let Err(err) = self.set_time_from_build_timestamp(now_ms) {
                    warn!("failed to seed clock from build timestamp: {err}");
                }
            }
            Ok(false) => {}
            Err(err) => warn!("failed to read clock power-loss flag: {err}"),
        }

        // Flags latched before a reset would keep the interrupt line asserted.
        if let Err(err) = self.clear_alarm_flags() {
            warn!("failed to clear alarm flags: {err}");
        }

        match self.current_time() {
            Ok(datetime) if self.is_valid_time(&datetime) => {
                self.store_good(datetime, now_ms);
                self.working = true;
                info!("real-time clock ok: {datetime}");
            }
            Ok(datetime) => {
                self.working = false;
                warn!("real-time clock reports implausible time {datetime}");
            }
            Err(err) => {
                self.working = false;
                warn!("real-time clock read failed: {err}");
            }
        }

        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn is_working(&self) -> bool {
        self.working
    }

    pub fn last_good(&self) -> TimeSample {
        self.last_good
    }

    pub fn clock_mut(&mut self) -> &mut C {
        &mut self.clock
    }

    pub fn get_stable_time(&mut self, now_ms: u64) -> TimeSample {
        if !self.initialized {
            self.working = false;
            return self.last_good;
        }

        let reading = match self.current_time() {
            Ok(datetime) => datetime,
            Err(err) => {
                self.mark_not_working(format_args!("read failed: {err}"));
                return self.last_good;
            }
        };

        if !self.is_valid_time(&reading) {
            self.mark_not_working(format_args!("out-of-range reading {reading}"));
            return self.last_good;
        }

        if let Some(jump_secs) = self.jump_secs(&reading, now_ms) {
            self.mark_not_working(format_args!("time jump of {jump_secs}s to {reading}"));
            return self.last_good;
        }

        if !self.working {
            info!("real-time clock readings plausible again");
        }
        self.store_good(reading, now_ms);
        self.working = true;
        self.last_good
    }

    /// Raw clock reading without validation.
    pub fn current_time(&mut self) -> Result<NaiveDateTime, ClockError> {
        if !self.initialized {
            return Ok(self.last_good.datetime);
        }
        self.clock.now()
    }

    /// Range-checks a fresh reading; stored state is left untouched.
    pub fn has_valid_time(&mut self) -> bool {
        if !self.initialized {
            return false;
        }
        match self.clock.now() {
            Ok(datetime) => self.is_valid_time(&datetime),
            Err(_) => false,
        }
    }

    pub fn set_time(&mut self, datetime: NaiveDateTime, now_ms: u64) -> Result<(), TimeError> {
        if !self.initialized {
            return Err(TimeError::ClockUnavailable);
        }
        if !self.is_valid_time(&datetime) {
            warn!("rejected clock set to {datetime}");
            return Err(TimeError::OutOfRange);
        }

        self.clock.adjust(datetime)?;
        self.store_good(datetime, now_ms);
        self.working = true;
        info!("real-time clock set to {datetime}");
        Ok(())
    }

    pub fn set_time_from_build_timestamp(&mut self, now_ms: u64) -> Result<(), TimeError> {
        self.set_time(self.build_timestamp, now_ms)
    }

    pub fn set_alarm(&mut self, number: u8, at: NaiveDateTime, enable_interrupt: bool) -> Result<(), ClockError> {
        let alarm = self.alarm(number)?;
        self.clock.set_alarm(alarm, at)?;
        if enable_interrupt {
            self.clock.set_alarm_interrupt(alarm, true)?;
        }
        info!("alarm {} set for {:02}:{:02}", alarm.number(), at.hour(), at.minute());
        Ok(())
    }

    pub fn clear_alarm(&mut self, number: u8) -> Result<(), ClockError> {
        let alarm = self.alarm(number)?;
        self.clock.disable_alarm(alarm)?;
        self.clock.clear_alarm(alarm)
    }

    pub fn is_alarm_triggered(&mut self, number: u8) -> bool {
        match self.alarm(number) {
            Ok(alarm) => self.clock.alarm_fired(alarm).unwrap_or(false),
            Err(_) => false,
        }
    }

    pub fn clear_alarm_flags(&mut self) -> Result<(), ClockError> {
        if !self.initialized {
            return Err(ClockError::NotDetected);
        }
        self.clock.clear_alarm(Alarm::One)?;
        self.clock.clear_alarm(Alarm::Two)
    }

    pub fn enable_alarm_interrupt(&mut self, number: u8, enable: bool) -> Result<(), ClockError> {
        let alarm = self.alarm(number)?;
        self.clock.set_alarm_interrupt(alarm, enable)
    }

    pub fn is_alarm_interrupt_enabled(&mut self, number: u8) -> bool {
        match self.alarm(number) {
            Ok(alarm) => self.clock.alarm_interrupt_enabled(alarm).unwrap_or(false),
            Err(_) => false,
        }
    }

    pub fn status(&self) -> ClockStatus {
        ClockStatus {
            initialized: self.initialized,
            working: self.working,
            last_good: self.last_good.datetime,
        }
    }

    fn alarm(&self, number: u8) -> Result<Alarm, ClockError> {
        if !self.initialized {
            return Err(ClockError::NotDetected);
        }
        Alarm::from_number(number)
    }

    fn is_valid_time(&self, datetime: &NaiveDateTime) -> bool {
        (self.config.valid_year_min..=self.config.valid_year_max).contains(&datetime.year())
            && (1..=12).contains(&datetime.month())
            && (1..=31).contains(&datetime.day())
            && datetime.hour() <= 23
            && datetime.minute() <= 59
    }

    /// Distance in seconds from the expected time, when over the threshold.
    fn jump_secs(&self, reading: &NaiveDateTime, now_ms: u64) -> Option<i64> {
        if !self.has_reference {
            return None;
        }

        let elapsed_ms = now_ms.saturating_sub(self.last_good.captured_ms);
        let elapsed = Duration::milliseconds(i64::try_from(elapsed_ms).unwrap_or(i64::MAX / 2));
        let expected = self.last_good.datetime.checked_add_signed(elapsed)?;
        let jump = (*reading - expected).num_seconds().abs();

        (jump >= self.config.jump_threshold_secs).then_some(jump)
    }

    fn store_good(&mut self, datetime: NaiveDateTime, now_ms: u64) {
        self.last_good = TimeSample {
            datetime,
            captured_ms: now_ms,
        };
        self.has_reference = true;
    }

    fn mark_not_working(&mut self, reason: std::fmt::Arguments<'_>) {
        if self.working {
            warn!("real-time clock fault ({reason}); holding {}", self.last_good.datetime);
        }
        self.working = false;
    }
}
