use std::{
    net::SocketAddr,
    path::PathBuf,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex as StdMutex, MutexGuard, OnceLock,
    },
    time::{Duration, Instant},
};

use anyhow::Context;
use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{Local, NaiveDateTime, TimeDelta};
use serde::Serialize;
use tokio::{net::TcpListener, sync::Mutex};
use tracing::{debug, info, warn};

use heater_common::{
    isr::{self, WAKE_SIGNALS},
    Actuator, ActuatorError, Alarm, CabinHeaterSystem, ClockError, Intent, IntentOutcome,
    Peripherals, ProbeError, RtcClock, RuntimeConfig, SleepPlatform, TemperatureProbe, WakeSource,
};

const TICK_PERIOD_MS: u64 = 100;

type HostSystem = CabinHeaterSystem<SimActuator, SimClock, SimProbe, SimSleep>;

#[derive(Clone)]
struct AppState {
    system: Arc<Mutex<HostSystem>>,
    halted_until: Arc<AtomicU64>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut runtime = load_runtime_config().await.unwrap_or_else(|err| {
        warn!("failed to load runtime config: {err:#}");
        RuntimeConfig::default()
    });
    runtime.sanitize();

    let halted_until = Arc::new(AtomicU64::new(0));
    let cabin = Arc::new(StdMutex::new(Cabin::new(
        env_f32("HEATER_SIM_CABIN_C").unwrap_or(12.0),
        env_f32("HEATER_SIM_OUTSIDE_C").unwrap_or(2.0),
    )));

    let peripherals = Peripherals {
        actuator: SimActuator {
            cabin: cabin.clone(),
        },
        clock: SimClock::default(),
        probe: SimProbe { cabin },
        platform: SimSleep {
            watchdog_period_ms: 0,
            halted_until: halted_until.clone(),
        },
    };

    let mut system = CabinHeaterSystem::new(
        runtime,
        peripherals,
        crate::build_timestamp(),
        &WAKE_SIGNALS,
        monotonic_ms(),
    );
    let state = system.start(monotonic_ms());
    info!("cabin heater started in {} state", state.as_str());

    let app_state = AppState {
        system: Arc::new(Mutex::new(system)),
        halted_until,
    };

    spawn_control_loop(app_state.clone());

    let app = Router::new()
        .route("/api/status", get(handle_get_status))
        .route("/api/intent", post(handle_post_intent))
        .with_state(app_state);

    let port = std::env::var("HEATER_HTTP_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind heater server at {addr}"))?;

    info!("heater controller listening on http://{addr}");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn load_runtime_config() -> anyhow::Result<RuntimeConfig> {
    let Some(path) = std::env::var_os("HEATER_CONFIG").map(PathBuf::from) else {
        return Ok(RuntimeConfig::default());
    };

    let raw = tokio::fs::read_to_string(&path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("failed to parse {}", path.display()))
}

fn spawn_control_loop(app_state: AppState) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_millis(TICK_PERIOD_MS));

        loop {
            interval.tick().await;

            // A halted core runs no main loop until its watchdog or an input.
            if monotonic_ms() < app_state.halted_until.load(Ordering::Acquire) {
                continue;
            }

            let mut system = app_state.system.lock().await;
            let report = system.tick(monotonic_ms());

            if let Some(cycle) = report.sleep {
                debug!(
                    "woke from {} ({})",
                    cycle.slept_in.as_str(),
                    cycle.reason.as_str()
                );
            }

            let detents = system.take_rotary_delta();
            if detents != 0 {
                debug!("rotary moved {detents} detents");
            }

            if report.display_due {
                let status = system.status(report.now_ms);
                debug!(
                    "{} cabin {:.1}°C target {:.1}°C tier {}",
                    status.state, status.cabin_temp_c, status.effective_target_c, status.heater.tier
                );
            }
        }
    });
}

async fn handle_get_status(State(state): State<AppState>) -> impl IntoResponse {
    let now_ms = monotonic_ms();
    let status = {
        let system = state.system.lock().await;
        system.status(now_ms)
    };

    Json(status)
}

async fn handle_post_intent(
    State(state): State<AppState>,
    payload: Result<Json<Intent>, JsonRejection>,
) -> axum::response::Response {
    let Json(intent) = match payload {
        Ok(intent) => intent,
        Err(err) => return error_response(StatusCode::BAD_REQUEST, &err.body_text()),
    };

    let outcome = {
        let mut system = state.system.lock().await;
        state.halted_until.store(0, Ordering::Release);
        system.apply_intent(intent, monotonic_ms())
    };

    let status = if outcome.is_rejected() {
        StatusCode::UNPROCESSABLE_ENTITY
    } else {
        StatusCode::OK
    };
    (status, Json::<IntentOutcome>(outcome)).into_response()
}

fn error_response(status: StatusCode, message: &str) -> axum::response::Response {
    (
        status,
        Json(ErrorBody {
            error: message.to_string(),
        }),
    )
        .into_response()
}

fn env_f32(key: &str) -> Option<f32> {
    std::env::var(key).ok()?.parse().ok()
}

fn monotonic_ms() -> u64 {
    static START: OnceLock<Instant> = OnceLock::new();
    START
        .get_or_init(Instant::now)
        .elapsed()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}

/// First-order thermal model of the cabin: the heater adds power in
/// proportion to its wiper position, the shell leaks toward outside air.
struct Cabin {
    temp_c: f32,
    outside_c: f32,
    enabled: bool,
    wiper: u8,
    updated_ms: u64,
}

impl Cabin {
    const LOSS_PER_SEC: f32 = 0.002;
    const MAX_GAIN_C_PER_SEC: f32 = 0.05;
    const WIPER_FULL_SCALE: f32 = 127.0;

    fn new(temp_c: f32, outside_c: f32) -> Self {
        Self {
            temp_c,
            outside_c,
            enabled: false,
            wiper: 0,
            updated_ms: monotonic_ms(),
        }
    }

    fn advance(&mut self, now_ms: u64) {
        let dt = now_ms.saturating_sub(self.updated_ms) as f32 / 1000.0;
        self.updated_ms = now_ms;

        let gain = if self.enabled {
            Self::MAX_GAIN_C_PER_SEC * f32::from(self.wiper) / Self::WIPER_FULL_SCALE
        } else {
            0.0
        };
        let loss = Self::LOSS_PER_SEC * (self.temp_c - self.outside_c);
        self.temp_c += (gain - loss) * dt;
    }
}

fn lock_cabin(cabin: &StdMutex<Cabin>) -> MutexGuard<'_, Cabin> {
    cabin.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct SimActuator {
    cabin: Arc<StdMutex<Cabin>>,
}

impl Actuator for SimActuator {
    fn probe(&mut self) -> Result<(), ActuatorError> {
        Ok(())
    }

    fn set_wiper(&mut self, value: u8) -> Result<(), ActuatorError> {
        let mut cabin = lock_cabin(&self.cabin);
        cabin.advance(monotonic_ms());
        cabin.wiper = value;
        Ok(())
    }

    fn set_enable(&mut self, on: bool) -> Result<(), ActuatorError> {
        let mut cabin = lock_cabin(&self.cabin);
        cabin.advance(monotonic_ms());
        if cabin.enabled != on {
            info!("heater enable -> {}", if on { "on" } else { "off" });
        }
        cabin.enabled = on;
        Ok(())
    }
}

struct SimProbe {
    cabin: Arc<StdMutex<Cabin>>,
}

impl TemperatureProbe for SimProbe {
    fn read_celsius(&mut self) -> Result<f32, ProbeError> {
        let mut cabin = lock_cabin(&self.cabin);
        cabin.advance(monotonic_ms());
        Ok(cabin.temp_c)
    }
}

/// Host wall clock with a settable offset and daily alarms.
#[derive(Default)]
struct SimClock {
    offset: TimeDelta,
    alarms: [Option<NaiveDateTime>; 2],
    fired: [bool; 2],
    interrupts: [bool; 2],
}

impl SimClock {
    fn slot(alarm: Alarm) -> usize {
        match alarm {
            Alarm::One => 0,
            Alarm::Two => 1,
        }
    }
}

impl RtcClock for SimClock {
    fn begin(&mut self) -> Result<(), ClockError> {
        Ok(())
    }

    fn now(&mut self) -> Result<NaiveDateTime, ClockError> {
        let now = Local::now().naive_local() + self.offset;

        for slot in 0..self.alarms.len() {
            let Some(at) = self.alarms[slot] else {
                continue;
            };
            if now >= at {
                self.fired[slot] = true;
                self.alarms[slot] = Some(at + TimeDelta::days(1));
                if self.interrupts[slot] {
                    isr::on_rtc_alarm();
                }
            }
        }

        Ok(now)
    }

    fn adjust(&mut self, datetime: NaiveDateTime) -> Result<(), ClockError> {
        self.offset = datetime - Local::now().naive_local();
        Ok(())
    }

    fn lost_power(&mut self) -> Result<bool, ClockError> {
        Ok(false)
    }

    fn set_alarm(&mut self, alarm: Alarm, at: NaiveDateTime) -> Result<(), ClockError> {
        self.alarms[Self::slot(alarm)] = Some(at);
        Ok(())
    }

    fn disable_alarm(&mut self, alarm: Alarm) -> Result<(), ClockError> {
        self.alarms[Self::slot(alarm)] = None;
        self.interrupts[Self::slot(alarm)] = false;
        Ok(())
    }

    fn clear_alarm(&mut self, alarm: Alarm) -> Result<(), ClockError> {
        self.fired[Self::slot(alarm)] = false;
        Ok(())
    }

    fn alarm_fired(&mut self, alarm: Alarm) -> Result<bool, ClockError> {
        Ok(self.fired[Self::slot(alarm)])
    }

    fn set_alarm_interrupt(&mut self, alarm: Alarm, enabled: bool) -> Result<(), ClockError> {
        self.interrupts[Self::slot(alarm)] = enabled;
        Ok(())
    }

    fn alarm_interrupt_enabled(&mut self, alarm: Alarm) -> Result<bool, ClockError> {
        Ok(self.interrupts[Self::slot(alarm)])
    }
}

/// The host never actually stops. A halt returns at once and parks the
/// control loop for one watchdog period; an HTTP intent releases it early.
struct SimSleep {
    watchdog_period_ms: u64,
    halted_until: Arc<AtomicU64>,
}

impl SleepPlatform for SimSleep {
    fn arm_wake_sources(&mut self, sources: &[WakeSource]) {
        debug!("armed wake sources {sources:?}");
    }

    fn disarm_wake_sources(&mut self) {}

    fn arm_watchdog(&mut self, period_ms: u64) {
        debug!("sleep watchdog armed for {period_ms} ms");
        self.watchdog_period_ms = period_ms;
    }

    fn disarm_watchdog(&mut self) {
        self.watchdog_period_ms = 0;
    }

    fn set_peripheral_power(&mut self, enabled: bool) {
        debug!("peripheral power {}", if enabled { "on" } else { "off" });
    }

    fn halt(&mut self) -> u64 {
        let now_ms = monotonic_ms();
        self.halted_until
            .store(now_ms.saturating_add(self.watchdog_period_ms), Ordering::Release);
        now_ms
    }
}
