use chrono::{Datelike, Duration, NaiveDateTime, NaiveTime, Weekday};
use log::{info, warn};

use crate::{
    config::{SchedulerConfig, MAX_WAKEUP_TIMERS},
    error::ScheduleError,
    types::{SchedulerStatus, TimerView, WakeupState},
};

pub const MAX_TIMER_NAME_CHARS: usize = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DayOfWeek {
    Sunday,
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
}

impl DayOfWeek {
    pub fn from_chrono(weekday: Weekday) -> Self {
        match weekday {
            Weekday::Sun => Self::Sunday,
            Weekday::Mon => Self::Monday,
            Weekday::Tue => Self::Tuesday,
            Weekday::Wed => Self::Wednesday,
            Weekday::Thu => Self::Thursday,
            Weekday::Fri => Self::Friday,
            Weekday::Sat => Self::Saturday,
        }
    }

    /// Bit position in a [`DayMask`]; Sunday is bit 0.
    pub fn bit(self) -> u8 {
        1 << (self as u8)
    }
}

/// 7-bit weekday set, bit 0 = Sunday.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DayMask(u8);

impl DayMask {
    pub const NONE: Self = Self(0);
    pub const WEEKDAYS: Self = Self(0x3E);
    pub const EVERY_DAY: Self = Self(0x7F);

    pub fn from_bits(bits: u8) -> Self {
        Self(bits & Self::EVERY_DAY.0)
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn contains(self, day: DayOfWeek) -> bool {
        self.0 & day.bit() != 0
    }

    pub fn with_day(self, day: DayOfWeek, enabled: bool) -> Self {
        if enabled {
            Self(self.0 | day.bit())
        } else {
            Self(self.0 & !day.bit())
        }
    }

    fn contains_date(self, datetime: &NaiveDateTime) -> bool {
        self.contains(DayOfWeek::from_chrono(datetime.weekday()))
    }
}

/// One entry of the fixed timer arena. `enabled` doubles as the used marker.
#[derive(Debug, Clone, PartialEq)]
pub struct WakeupTimerSlot {
    pub enabled: bool,
    pub hour: u8,
    pub minute: u8,
    pub target_temp_c: f32,
    pub day_mask: DayMask,
    pub state: WakeupState,
    pub name: String,
    /// Wake time of the occurrence currently being served.
    occurrence: Option<NaiveDateTime>,
    /// Wake time of the last occurrence that ran to expiry.
    last_completed: Option<NaiveDateTime>,
}

impl WakeupTimerSlot {
    /// An unused slot still holds a valid timer (07:00 weekdays at the
    /// default target) so enabling it directly never yields an out-of-range
    /// entry.
    fn free(target_temp_c: f32) -> Self {
        Self {
            enabled: false,
            hour: 7,
            minute: 0,
            target_temp_c,
            day_mask: DayMask::WEEKDAYS,
            state: WakeupState::Disabled,
            name: "Timer".to_string(),
            occurrence: None,
            last_completed: None,
        }
    }

    pub fn occurrence(&self) -> Option<NaiveDateTime> {
        self.occurrence
    }

    fn wake_time(&self) -> Option<NaiveTime> {
        NaiveTime::from_hms_opt(u32::from(self.hour), u32::from(self.minute), 0)
    }

    fn reset_cycle(&mut self) {
        self.occurrence = None;
        self.last_completed = None;
        self.state = if self.enabled {
            WakeupState::Armed
        } else {
            WakeupState::Disabled
        };
    }

    fn view(&self, index: usize) -> TimerView {
        TimerView {
            index,
            name: self.name.clone(),
            hour: self.hour,
            minute: self.minute,
            target_temp_c: self.target_temp_c,
            day_mask: self.day_mask.bits(),
            state: self.state.as_str(),
        }
    }
}

/// Fixed-capacity set of daily wake-up timers that drive preheating.
pub struct WakeupScheduler {
    pub config: SchedulerConfig,
    slots: [WakeupTimerSlot; MAX_WAKEUP_TIMERS],
    active: Option<usize>,
    last_update_ms: Option<u64>,
}

impl WakeupScheduler {
    pub fn new(mut config: SchedulerConfig) -> Self {
        config.sanitize();
        let default_temp_c = config.default_target_temp_c;
        Self {
            config,
            slots: std::array::from_fn(|_| WakeupTimerSlot::free(default_temp_c)),
            active: None,
            last_update_ms: None,
        }
    }

    /// Runs the timer state machines. Returns false when throttled or when
    /// no trustworthy wall-clock time is available.
    pub fn update(&mut self, current_temp_c: f32, now: Option<NaiveDateTime>, now_ms: u64) -> bool {
        let due = self
            .last_update_ms
            .map(|last| now_ms.saturating_sub(last) >= self.config.update_interval_ms)
            .unwrap_or(true);
        if !due {
            return false;
        }
        self.last_update_ms = Some(now_ms);

        let Some(now) = now else {
            return false;
        };

        for index in 0..MAX_WAKEUP_TIMERS {
            self.advance_slot(index, current_temp_c, now);
        }
        self.elect_active();
        true
    }

    fn advance_slot(&mut self, index: usize, current_temp_c: f32, now: NaiveDateTime) {
        let preheat = Duration::minutes(i64::from(self.config.preheat_minutes));
        let stop_after = Duration::minutes(i64::from(self.config.stop_after_minutes));
        let ready_margin = self.config.ready_margin_c;

        let slot = &mut self.slots[index];
        if !slot.enabled {
            return;
        }

        let next = match slot.state {
            WakeupState::Disabled => None,
            WakeupState::Armed => {
                let Some(wake_time) = slot.wake_time() else {
                    return;
                };
                let today = now.date().and_time(wake_time);
                let candidates = [Some(today), today.checked_add_signed(Duration::days(1))];

                candidates.into_iter().flatten().find(|wake| {
                    slot.day_mask.contains_date(wake)
                        && now >= *wake - preheat
                        && now < *wake
                        && slot.last_completed.map(|done| *wake > done).unwrap_or(true)
                })
                .map(|wake| {
                    slot.occurrence = Some(wake);
                    WakeupState::Preheating
                })
            }
            WakeupState::Preheating | WakeupState::Ready => {
                let expired = slot
                    .occurrence
                    .map(|wake| now >= wake + stop_after)
                    .unwrap_or(true);

                if expired {
                    slot.last_completed = slot.occurrence;
                    Some(WakeupState::Expired)
                } else if slot.state == WakeupState::Preheating
                    && current_temp_c >= slot.target_temp_c - ready_margin
                {
                    Some(WakeupState::Ready)
                } else {
                    None
                }
            }
            WakeupState::Expired => {
                slot.occurrence = None;
                Some(WakeupState::Armed)
            }
        };

        if let Some(next) = next {
            info!(
                "wake-up timer {} '{}' {} -> {}",
                index,
                slot.name,
                slot.state.as_str(),
                next.as_str()
            );
            slot.state = next;
        }
    }

    /// Earliest in-progress occurrence wins; ties go to the lowest index.
    fn elect_active(&mut self) {
        let mut best: Option<(usize, NaiveDateTime)> = None;
        for (index, slot) in self.slots.iter().enumerate() {
            if !slot.enabled || !slot.state.is_in_progress() {
                continue;
            }
            let Some(wake) = slot.occurrence else {
                continue;
            };
            if best.map(|(_, current)| wake < current).unwrap_or(true) {
                best = Some((index, wake));
            }
        }

        let elected = best.map(|(index, _)| index);
        if elected != self.active {
            match elected {
                Some(index) => info!("wake-up timer {index} now drives the target"),
                None => info!("no wake-up timer active"),
            }
        }
        self.active = elected;
    }

    pub fn should_heat(&self) -> bool {
        self.active_state().is_in_progress()
    }

    pub fn active_target_temp(&self) -> f32 {
        self.active
            .map(|index| self.slots[index].target_temp_c)
            .unwrap_or(self.config.default_target_temp_c)
    }

    pub fn active_timer_index(&self) -> Option<usize> {
        self.active
    }

    pub fn active_state(&self) -> WakeupState {
        self.active
            .map(|index| self.slots[index].state)
            .unwrap_or(WakeupState::Disabled)
    }

    pub fn timer(&self, index: usize) -> Option<&WakeupTimerSlot> {
        self.slots.get(index)
    }

    pub fn timer_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.enabled).count()
    }

    pub fn add_timer(
        &mut self,
        hour: u8,
        minute: u8,
        target_temp_c: f32,
        day_mask: DayMask,
        name: Option<&str>,
    ) -> Result<usize, ScheduleError> {
        self.validate_time(hour, minute)?;
        self.validate_temp(target_temp_c)?;

        let Some(index) = self.slots.iter().position(|slot| !slot.enabled) else {
            warn!("wake-up timer rejected: all {MAX_WAKEUP_TIMERS} slots in use");
            return Err(ScheduleError::CapacityExhausted(MAX_WAKEUP_TIMERS));
        };

        let name = match name {
            Some(name) if !name.trim().is_empty() => truncate_name(name),
            _ => format!("Timer {}", index + 1),
        };

        self.slots[index] = WakeupTimerSlot {
            enabled: true,
            hour,
            minute,
            target_temp_c,
            day_mask,
            state: WakeupState::Armed,
            name,
            occurrence: None,
            last_completed: None,
        };
        info!(
            "wake-up timer {index} added for {hour:02}:{minute:02} at {target_temp_c:.1}°C"
        );
        Ok(index)
    }

    pub fn remove_timer(&mut self, index: usize) -> Result<(), ScheduleError> {
        let default_temp_c = self.config.default_target_temp_c;
        let slot = self.slot_mut(index)?;
        if !slot.enabled {
            return Err(ScheduleError::SlotDisabled(index));
        }
        *slot = WakeupTimerSlot::free(default_temp_c);
        self.release_active(index);
        info!("wake-up timer {index} removed");
        Ok(())
    }

    pub fn enable_timer(&mut self, index: usize, enabled: bool) -> Result<(), ScheduleError> {
        if enabled {
            let slot = self.slots.get(index).ok_or(ScheduleError::InvalidIndex(index))?;
            let (hour, minute, target_temp_c) = (slot.hour, slot.minute, slot.target_temp_c);
            self.validate_time(hour, minute)?;
            self.validate_temp(target_temp_c)?;
        }

        let slot = self.slot_mut(index)?;
        slot.enabled = enabled;
        slot.reset_cycle();
        if !enabled {
            self.release_active(index);
        }
        Ok(())
    }

    pub fn clear_all_timers(&mut self) {
        let default_temp_c = self.config.default_target_temp_c;
        self.slots = std::array::from_fn(|_| WakeupTimerSlot::free(default_temp_c));
        self.active = None;
    }

    pub fn set_timer_time(&mut self, index: usize, hour: u8, minute: u8) -> Result<(), ScheduleError> {
        self.validate_time(hour, minute)?;
        let slot = self.slot_mut(index)?;
        slot.hour = hour;
        slot.minute = minute;
        slot.reset_cycle();
        self.release_active(index);
        Ok(())
    }

    pub fn set_timer_temp(&mut self, index: usize, target_temp_c: f32) -> Result<(), ScheduleError> {
        self.validate_temp(target_temp_c)?;
        self.slot_mut(index)?.target_temp_c = target_temp_c;
        Ok(())
    }

    pub fn set_timer_days(&mut self, index: usize, day_mask: DayMask) -> Result<(), ScheduleError> {
        self.slot_mut(index)?.day_mask = day_mask;
        Ok(())
    }

    pub fn set_timer_name(&mut self, index: usize, name: &str) -> Result<(), ScheduleError> {
        self.slot_mut(index)?.name = truncate_name(name);
        Ok(())
    }

    /// Minutes until the next preheat window of any enabled timer opens.
    pub fn minutes_until_next_timer(&self, now: NaiveDateTime) -> u32 {
        let preheat = Duration::minutes(i64::from(self.config.preheat_minutes));

        self.slots
            .iter()
            .filter(|slot| slot.enabled && slot.day_mask != DayMask::NONE)
            .filter_map(|slot| {
                let wake_time = slot.wake_time()?;
                (0..=7)
                    .filter_map(|days| now.date().checked_add_signed(Duration::days(days)))
                    .map(|date| date.and_time(wake_time))
                    .filter(|wake| slot.day_mask.contains_date(wake))
                    .map(|wake| wake - preheat)
                    .find(|start| *start > now)
            })
            .map(|start| {
                let secs = (start - now).num_seconds().max(0);
                u32::try_from((secs + 59) / 60).unwrap_or(u32::MAX)
            })
            .min()
            .unwrap_or(0)
    }

    pub fn status(&self) -> SchedulerStatus {
        SchedulerStatus {
            timer_count: self.timer_count(),
            active_timer: self.active,
            should_heat: self.should_heat(),
            active_target_temp_c: self.active_target_temp(),
            timers: self
                .slots
                .iter()
                .enumerate()
                .filter(|(_, slot)| slot.enabled)
                .map(|(index, slot)| slot.view(index))
                .collect(),
        }
    }

    fn slot_mut(&mut self, index: usize) -> Result<&mut WakeupTimerSlot, ScheduleError> {
        self.slots
            .get_mut(index)
            .ok_or(ScheduleError::InvalidIndex(index))
    }

    fn release_active(&mut self, index: usize) {
        if self.active == Some(index) {
            self.active = None;
        }
    }

    fn validate_time(&self, hour: u8, minute: u8) -> Result<(), ScheduleError> {
        if hour > 23 || minute > 59 {
            warn!("wake-up timer rejected: invalid time {hour:02}:{minute:02}");
            return Err(ScheduleError::InvalidTime { hour, minute });
        }
        Ok(())
    }

    fn validate_temp(&self, target_temp_c: f32) -> Result<(), ScheduleError> {
        let range = self.config.min_timer_temp_c..=self.config.max_timer_temp_c;
        if !range.contains(&target_temp_c) {
            warn!("wake-up timer rejected: temperature {target_temp_c}°C");
            return Err(ScheduleError::InvalidTemperature(target_temp_c));
        }
        Ok(())
    }
}

fn truncate_name(name: &str) -> String {
    name.trim().chars().take(MAX_TIMER_NAME_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;

    use super::*;

    // 2026-01-05 is a Monday.
    fn at(day: u32, hour: u32, minute: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 1, day)
            .unwrap()
            .and_hms_opt(hour, minute, 0)
            .unwrap()
    }

    fn scheduler() -> WakeupScheduler {
        WakeupScheduler::new(SchedulerConfig::default())
    }

    #[test]
    fn lifecycle_preheat_ready_expired_rearmed() {
        let mut scheduler = scheduler();
        let index = scheduler
            .add_timer(7, 0, 21.0, DayMask::WEEKDAYS, None)
            .unwrap();

        assert!(scheduler.update(15.0, Some(at(5, 6, 29)), 0));
        assert_eq!(scheduler.timer(index).unwrap().state, WakeupState::Armed);

        scheduler.update(15.0, Some(at(5, 6, 30)), 5_000);
        assert_eq!(scheduler.timer(index).unwrap().state, WakeupState::Preheating);
        assert_eq!(scheduler.active_timer_index(), Some(index));
        assert!(scheduler.should_heat());
        assert_eq!(scheduler.active_target_temp(), 21.0);

        scheduler.update(20.0, Some(at(5, 6, 40)), 10_000);
        assert_eq!(scheduler.timer(index).unwrap().state, WakeupState::Ready);
        assert!(scheduler.should_heat());

        scheduler.update(21.0, Some(at(5, 8, 0)), 15_000);
        assert_eq!(scheduler.timer(index).unwrap().state, WakeupState::Expired);
        assert!(!scheduler.should_heat());
        assert_eq!(scheduler.active_timer_index(), None);
        assert_eq!(scheduler.active_target_temp(), 20.0);

        scheduler.update(21.0, Some(at(5, 8, 0)), 20_000);
        assert_eq!(scheduler.timer(index).unwrap().state, WakeupState::Armed);
    }

    #[test]
    fn update_is_throttled_and_needs_valid_time() {
        let mut scheduler = scheduler();
        scheduler.add_timer(7, 0, 21.0, DayMask::EVERY_DAY, None).unwrap();

        assert!(!scheduler.update(15.0, None, 0));
        assert!(!scheduler.update(15.0, Some(at(5, 6, 45)), 4_999));
        assert_eq!(scheduler.timer(0).unwrap().state, WakeupState::Armed);

        assert!(scheduler.update(15.0, Some(at(5, 6, 45)), 5_000));
        assert_eq!(scheduler.timer(0).unwrap().state, WakeupState::Preheating);
    }

    #[test]
    fn day_mask_excludes_unlisted_weekday() {
        let mut scheduler = scheduler();
        let sunday_only = DayMask::NONE.with_day(DayOfWeek::Sunday, true);
        scheduler.add_timer(7, 0, 21.0, sunday_only, None).unwrap();

        scheduler.update(15.0, Some(at(5, 6, 45)), 0);
        assert_eq!(scheduler.timer(0).unwrap().state, WakeupState::Armed);

        // 2026-01-04 is a Sunday.
        scheduler.update(15.0, Some(at(4, 6, 45)), 5_000);
        assert_eq!(scheduler.timer(0).unwrap().state, WakeupState::Preheating);
    }

    #[test]
    fn preheat_window_crosses_midnight_without_retrigger() {
        let mut scheduler = scheduler();
        scheduler.add_timer(0, 10, 21.0, DayMask::EVERY_DAY, None).unwrap();

        scheduler.update(15.0, Some(at(5, 23, 45)), 0);
        assert_eq!(scheduler.timer(0).unwrap().state, WakeupState::Preheating);
        assert_eq!(scheduler.timer(0).unwrap().occurrence(), Some(at(6, 0, 10)));

        scheduler.update(15.0, Some(at(6, 1, 10)), 5_000);
        assert_eq!(scheduler.timer(0).unwrap().state, WakeupState::Expired);
        scheduler.update(15.0, Some(at(6, 1, 10)), 10_000);
        assert_eq!(scheduler.timer(0).unwrap().state, WakeupState::Armed);

        // Clock stepped back into the window of the occurrence just served.
        scheduler.update(15.0, Some(at(6, 0, 0)), 15_000);
        assert_eq!(scheduler.timer(0).unwrap().state, WakeupState::Armed);

        scheduler.update(15.0, Some(at(6, 23, 50)), 20_000);
        assert_eq!(scheduler.timer(0).unwrap().state, WakeupState::Preheating);
        assert_eq!(scheduler.timer(0).unwrap().occurrence(), Some(at(7, 0, 10)));
    }

    #[test]
    fn earliest_occurrence_is_elected() {
        let mut scheduler = scheduler();
        scheduler.add_timer(7, 0, 22.0, DayMask::EVERY_DAY, Some("late")).unwrap();
        scheduler.add_timer(6, 50, 18.0, DayMask::EVERY_DAY, Some("early")).unwrap();

        scheduler.update(15.0, Some(at(5, 6, 40)), 0);
        assert_eq!(scheduler.active_timer_index(), Some(1));
        assert_eq!(scheduler.active_target_temp(), 18.0);
    }

    #[test]
    fn capacity_is_enforced() {
        let mut scheduler = scheduler();
        for hour in 5..8 {
            scheduler.add_timer(hour, 0, 20.0, DayMask::WEEKDAYS, None).unwrap();
        }

        assert_eq!(
            scheduler.add_timer(9, 0, 20.0, DayMask::WEEKDAYS, None),
            Err(ScheduleError::CapacityExhausted(3))
        );
        assert_eq!(scheduler.timer_count(), 3);
    }

    #[test]
    fn add_validates_fields_and_reuses_free_slot() {
        let mut scheduler = scheduler();
        assert_eq!(
            scheduler.add_timer(24, 0, 20.0, DayMask::WEEKDAYS, None),
            Err(ScheduleError::InvalidTime { hour: 24, minute: 0 })
        );
        assert_eq!(
            scheduler.add_timer(7, 0, 31.0, DayMask::WEEKDAYS, None),
            Err(ScheduleError::InvalidTemperature(31.0))
        );

        scheduler.add_timer(6, 0, 20.0, DayMask::WEEKDAYS, None).unwrap();
        scheduler.add_timer(7, 0, 20.0, DayMask::WEEKDAYS, None).unwrap();
        scheduler.remove_timer(0).unwrap();
        assert_eq!(scheduler.remove_timer(0), Err(ScheduleError::SlotDisabled(0)));
        assert_eq!(scheduler.remove_timer(7), Err(ScheduleError::InvalidIndex(7)));

        let index = scheduler.add_timer(8, 15, 19.5, DayMask::WEEKDAYS, None).unwrap();
        assert_eq!(index, 0);
        assert_eq!(scheduler.timer(0).unwrap().name, "Timer 1");
    }

    #[test]
    fn removing_active_timer_clears_election() {
        let mut scheduler = scheduler();
        scheduler.add_timer(7, 0, 21.0, DayMask::EVERY_DAY, None).unwrap();
        scheduler.update(15.0, Some(at(5, 6, 45)), 0);
        assert!(scheduler.should_heat());

        scheduler.remove_timer(0).unwrap();
        assert!(!scheduler.should_heat());
        assert_eq!(scheduler.active_timer_index(), None);
    }

    #[test]
    fn names_are_truncated() {
        let mut scheduler = scheduler();
        scheduler
            .add_timer(7, 0, 21.0, DayMask::WEEKDAYS, Some("Morning commute warmup"))
            .unwrap();
        assert_eq!(scheduler.timer(0).unwrap().name, "Morning commute");
    }

    #[test]
    fn enabling_unused_slot_yields_valid_timer() {
        let mut scheduler = scheduler();

        scheduler.enable_timer(1, true).unwrap();

        let timer = scheduler.timer(1).unwrap();
        assert!(timer.enabled);
        assert_eq!(timer.state, WakeupState::Armed);
        assert_eq!((timer.hour, timer.minute), (7, 0));
        assert_eq!(timer.target_temp_c, 20.0);
        assert_eq!(timer.day_mask, DayMask::WEEKDAYS);
        assert_eq!(timer.name, "Timer");
        assert_eq!(scheduler.timer_count(), 1);
        assert_eq!(scheduler.enable_timer(3, true), Err(ScheduleError::InvalidIndex(3)));
    }

    #[test]
    fn unused_slots_follow_configured_default_target() {
        let mut scheduler = WakeupScheduler::new(SchedulerConfig {
            default_target_temp_c: 23.0,
            ..SchedulerConfig::default()
        });

        scheduler.enable_timer(0, true).unwrap();
        assert_eq!(scheduler.timer(0).unwrap().target_temp_c, 23.0);
    }

    #[test]
    fn disabling_active_timer_releases_it() {
        let mut scheduler = scheduler();
        scheduler.add_timer(7, 0, 21.0, DayMask::EVERY_DAY, None).unwrap();
        scheduler.update(15.0, Some(at(5, 6, 45)), 0);
        assert_eq!(scheduler.active_timer_index(), Some(0));

        scheduler.enable_timer(0, false).unwrap();
        assert!(!scheduler.should_heat());
        assert_eq!(scheduler.active_timer_index(), None);
        assert_eq!(scheduler.timer(0).unwrap().state, WakeupState::Disabled);
        assert_eq!(scheduler.timer_count(), 0);

        scheduler.enable_timer(0, true).unwrap();
        assert_eq!(scheduler.timer(0).unwrap().state, WakeupState::Armed);
        scheduler.update(15.0, Some(at(5, 6, 46)), 5_000);
        assert_eq!(scheduler.timer(0).unwrap().state, WakeupState::Preheating);
    }

    #[test]
    fn moving_timer_resets_cycle_and_releases_it() {
        let mut scheduler = scheduler();
        scheduler.add_timer(7, 0, 21.0, DayMask::EVERY_DAY, None).unwrap();
        scheduler.update(15.0, Some(at(5, 6, 45)), 0);
        assert!(scheduler.should_heat());

        assert_eq!(
            scheduler.set_timer_time(0, 8, 60),
            Err(ScheduleError::InvalidTime { hour: 8, minute: 60 })
        );
        scheduler.set_timer_time(0, 8, 0).unwrap();

        let timer = scheduler.timer(0).unwrap();
        assert_eq!(timer.state, WakeupState::Armed);
        assert_eq!(timer.occurrence(), None);
        assert!(!scheduler.should_heat());
        assert_eq!(scheduler.active_timer_index(), None);

        scheduler.update(15.0, Some(at(5, 7, 35)), 5_000);
        assert_eq!(scheduler.timer(0).unwrap().occurrence(), Some(at(5, 8, 0)));
    }

    #[test]
    fn timer_temperature_edits_are_validated() {
        let mut scheduler = scheduler();
        scheduler.add_timer(7, 0, 21.0, DayMask::EVERY_DAY, None).unwrap();

        assert_eq!(
            scheduler.set_timer_temp(0, 14.0),
            Err(ScheduleError::InvalidTemperature(14.0))
        );
        assert_eq!(scheduler.timer(0).unwrap().target_temp_c, 21.0);

        scheduler.set_timer_temp(0, 23.5).unwrap();
        scheduler.update(15.0, Some(at(5, 6, 45)), 0);
        assert_eq!(scheduler.active_target_temp(), 23.5);
        assert_eq!(scheduler.set_timer_temp(4, 20.0), Err(ScheduleError::InvalidIndex(4)));
    }

    #[test]
    fn day_edits_apply_to_next_window() {
        let mut scheduler = scheduler();
        scheduler.add_timer(7, 0, 21.0, DayMask::EVERY_DAY, None).unwrap();

        let sunday_only = DayMask::NONE.with_day(DayOfWeek::Sunday, true);
        scheduler.set_timer_days(0, sunday_only).unwrap();
        assert_eq!(scheduler.timer(0).unwrap().day_mask, sunday_only);

        scheduler.update(15.0, Some(at(5, 6, 45)), 0);
        assert_eq!(scheduler.timer(0).unwrap().state, WakeupState::Armed);
    }

    #[test]
    fn renaming_truncates() {
        let mut scheduler = scheduler();
        scheduler.add_timer(7, 0, 21.0, DayMask::WEEKDAYS, Some("Work")).unwrap();

        scheduler.set_timer_name(0, "Saturday morning warmup").unwrap();
        assert_eq!(scheduler.timer(0).unwrap().name, "Saturday mornin");
        assert_eq!(scheduler.set_timer_name(3, "x"), Err(ScheduleError::InvalidIndex(3)));
    }

    #[test]
    fn clearing_all_timers_frees_every_slot() {
        let mut scheduler = scheduler();
        scheduler.add_timer(7, 0, 21.0, DayMask::EVERY_DAY, Some("a")).unwrap();
        scheduler.add_timer(9, 0, 22.0, DayMask::EVERY_DAY, Some("b")).unwrap();
        scheduler.update(15.0, Some(at(5, 6, 45)), 0);
        assert!(scheduler.should_heat());

        scheduler.clear_all_timers();

        assert_eq!(scheduler.timer_count(), 0);
        assert_eq!(scheduler.active_timer_index(), None);
        assert!(!scheduler.should_heat());
        assert_eq!(scheduler.timer(1).unwrap().name, "Timer");
        assert_eq!(scheduler.add_timer(6, 0, 20.0, DayMask::WEEKDAYS, None), Ok(0));
    }

    #[test]
    fn minutes_until_next_preheat_start() {
        let mut scheduler = scheduler();
        assert_eq!(scheduler.minutes_until_next_timer(at(5, 6, 0)), 0);

        scheduler.add_timer(7, 0, 21.0, DayMask::WEEKDAYS, None).unwrap();
        assert_eq!(scheduler.minutes_until_next_timer(at(5, 6, 0)), 30);

        // Friday 2026-01-09 after the window: next is Monday 06:30.
        let minutes = scheduler.minutes_until_next_timer(at(9, 7, 0));
        assert_eq!(minutes, (3 * 24 * 60) - 30);
    }

    #[test]
    fn day_mask_helpers() {
        let mask = DayMask::WEEKDAYS.with_day(DayOfWeek::Friday, false);
        assert!(mask.contains(DayOfWeek::Monday));
        assert!(!mask.contains(DayOfWeek::Friday));
        assert!(!mask.contains(DayOfWeek::Sunday));
        assert_eq!(DayMask::from_bits(0xFF), DayMask::EVERY_DAY);
        assert_eq!(DayOfWeek::from_chrono(Weekday::Sun).bit(), 1);
    }
}
