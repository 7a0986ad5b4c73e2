//! Interrupt-to-main-loop signalling.
//!
//! Interrupt handlers only ever flip a flag or bump the rotary counter. The
//! main loop drains everything with atomic swaps, so an edge that lands
//! between the read and the clear is never lost.

use portable_atomic::{AtomicBool, AtomicI32, Ordering};

/// Direction reported by the rotary encoder decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotaryDirection {
    Clockwise,
    CounterClockwise,
}

/// Everything the interrupt handlers raised since the previous drain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WakeFlags {
    pub button: bool,
    pub rotary: bool,
    pub timer: bool,
    pub watchdog: bool,
}

impl WakeFlags {
    pub fn any(&self) -> bool {
        self.button || self.rotary || self.timer || self.watchdog
    }
}

pub struct WakeSignals {
    button: AtomicBool,
    rotary: AtomicBool,
    timer: AtomicBool,
    watchdog: AtomicBool,
    rotary_delta: AtomicI32,
}

impl WakeSignals {
    pub const fn new() -> Self {
        Self {
            button: AtomicBool::new(false),
            rotary: AtomicBool::new(false),
            timer: AtomicBool::new(false),
            watchdog: AtomicBool::new(false),
            rotary_delta: AtomicI32::new(0),
        }
    }

    pub fn raise_button(&self) {
        self.button.store(true, Ordering::Release);
    }

    pub fn raise_rotary(&self, direction: RotaryDirection) {
        let step = match direction {
            RotaryDirection::Clockwise => 1,
            RotaryDirection::CounterClockwise => -1,
        };
        self.rotary_delta.fetch_add(step, Ordering::AcqRel);
        self.rotary.store(true, Ordering::Release);
    }

    /// Rotary activity without a detent, used when the encoder line ended a
    /// sleep before its edge handler ran.
    pub fn raise_rotary_wake(&self) {
        self.rotary.store(true, Ordering::Release);
    }

    pub fn raise_timer(&self) {
        self.timer.store(true, Ordering::Release);
    }

    pub fn raise_watchdog(&self) {
        self.watchdog.store(true, Ordering::Release);
    }

    pub fn drain_flags(&self) -> WakeFlags {
        WakeFlags {
            button: self.button.swap(false, Ordering::AcqRel),
            rotary: self.rotary.swap(false, Ordering::AcqRel),
            timer: self.timer.swap(false, Ordering::AcqRel),
            watchdog: self.watchdog.swap(false, Ordering::AcqRel),
        }
    }

    /// Net encoder detents since the last call.
    pub fn take_rotary_delta(&self) -> i32 {
        self.rotary_delta.swap(0, Ordering::AcqRel)
    }
}

impl Default for WakeSignals {
    fn default() -> Self {
        Self::new()
    }
}

/// Process-wide handle for the interrupt trampolines below.
///
/// Interrupt vectors carry no context pointer, so this is the one place the
/// handlers can reach. Regular code receives a `&WakeSignals` instead of
/// naming this static.
pub static WAKE_SIGNALS: WakeSignals = WakeSignals::new();

pub fn on_button_edge() {
    WAKE_SIGNALS.raise_button();
}

pub fn on_rotary_edge(direction: RotaryDirection) {
    WAKE_SIGNALS.raise_rotary(direction);
}

pub fn on_watchdog_expiry() {
    WAKE_SIGNALS.raise_watchdog();
}

/// RTC alarm interrupts wake the system the same way a timer does.
pub fn on_rtc_alarm() {
    WAKE_SIGNALS.raise_timer();
}
