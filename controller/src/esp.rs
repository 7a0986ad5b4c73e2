use std::{
    io::BufRead,
    sync::{mpsc, Arc, Mutex, OnceLock},
    thread,
    time::{Duration, Instant},
};

use anyhow::{anyhow, Context};
use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};
use ds18b20::{Ds18b20, Resolution};
use esp_idf_hal::{
    delay::{Ets, BLOCK},
    gpio::{
        AnyIOPin, AnyOutputPin, IOPin, InputOutput, InterruptType, Output, OutputPin, PinDriver,
        Pull,
    },
    i2c::{I2cConfig, I2cDriver},
    prelude::Peripherals,
    units::Hertz,
};
use esp_idf_svc::{
    log::EspLogger,
    nvs::{EspDefaultNvsPartition, EspNvs},
};
use log::{info, warn};
use one_wire_bus::{Address, OneWire};

use heater_common::{
    isr::{self, RotaryDirection, WAKE_SIGNALS},
    timekeeper::Alarm,
    Actuator, ActuatorError, CabinHeaterSystem, ClockError, Intent, Peripherals as HeaterPeripherals,
    ProbeError, RtcClock, RuntimeConfig, SleepPlatform, TemperatureProbe, WakeSource,
};

const NVS_NAMESPACE: &str = "heater";
const NVS_RUNTIME_KEY: &str = "runtime_json";

const I2C_SDA_PIN: i32 = 21;
const I2C_SCL_PIN: i32 = 22;
const DS18B20_PIN: i32 = 4;
const HEATER_ENABLE_PIN: i32 = 25;
const PERIPHERAL_POWER_PIN: i32 = 26;
const BUTTON_PIN: i32 = 27;
const ROTARY_A_PIN: i32 = 32;
const ROTARY_B_PIN: i32 = 33;

const DS3231_ADDR: u8 = 0x68;
const DS3502_ADDR: u8 = 0x28;

const LOOP_PERIOD_MS: u64 = 20;
const WATCHDOG_TIMEOUT_SEC: u32 = 30;

type SharedI2c = Arc<Mutex<I2cDriver<'static>>>;

pub fn run() -> anyhow::Result<()> {
    esp_idf_svc::sys::link_patches();
    EspLogger::initialize_default();

    let nvs_partition = EspDefaultNvsPartition::take()?;
    let runtime = load_runtime_config(&nvs_partition).unwrap_or_else(|err| {
        warn!("failed to load runtime config from NVS: {err:#}");
        RuntimeConfig::default()
    });

    let peripherals = Peripherals::take()?;
    let pins = peripherals.pins;

    let i2c = I2cDriver::new(
        peripherals.i2c0,
        pins.gpio21,
        pins.gpio22,
        &I2cConfig::new().baudrate(Hertz(100_000)),
    )
    .with_context(|| format!("failed to start I2C on GPIO{I2C_SDA_PIN}/GPIO{I2C_SCL_PIN}"))?;
    let i2c: SharedI2c = Arc::new(Mutex::new(i2c));

    let enable = PinDriver::output(pins.gpio25.downgrade_output())
        .with_context(|| format!("failed to claim heater enable on GPIO{HEATER_ENABLE_PIN}"))?;
    let peripheral_power = PinDriver::output(pins.gpio26.downgrade_output()).ok();

    let mut button = PinDriver::input(pins.gpio27)?;
    button.set_pull(Pull::Up)?;
    button.set_interrupt_type(InterruptType::NegEdge)?;
    let mut rotary_a = PinDriver::input(pins.gpio32)?;
    rotary_a.set_pull(Pull::Up)?;
    rotary_a.set_interrupt_type(InterruptType::NegEdge)?;
    let mut rotary_b = PinDriver::input(pins.gpio33)?;
    rotary_b.set_pull(Pull::Up)?;

    // Handlers only touch the lock-free wake signals.
    unsafe {
        button.subscribe(isr::on_button_edge)?;
        rotary_a.subscribe(|| {
            let b_high = esp_idf_svc::sys::gpio_get_level(ROTARY_B_PIN) != 0;
            isr::on_rotary_edge(if b_high {
                RotaryDirection::Clockwise
            } else {
                RotaryDirection::CounterClockwise
            });
        })?;
    }
    button.enable_interrupt()?;
    rotary_a.enable_interrupt()?;

    let hardware = HeaterPeripherals {
        actuator: Ds3502Output {
            bus: i2c.clone(),
            enable,
        },
        clock: Ds3231 { bus: i2c },
        probe: CabinProbe::new(pins.gpio4.downgrade())?,
        platform: EspSleep { peripheral_power },
    };

    let mut system = CabinHeaterSystem::new(
        runtime,
        hardware,
        crate::build_timestamp(),
        &WAKE_SIGNALS,
        monotonic_ms(),
    );
    system.start(monotonic_ms());

    let intents = spawn_console_intents()?;

    init_watchdog(WATCHDOG_TIMEOUT_SEC)?;
    add_current_task_to_watchdog()?;

    loop {
        feed_watchdog();

        let report = system.tick(monotonic_ms());
        if report.sleep.is_some() {
            feed_watchdog();
        }

        while let Ok(intent) = intents.try_recv() {
            let outcome = system.apply_intent(intent, monotonic_ms());
            match serde_json::to_string(&outcome) {
                Ok(line) => println!("{line}"),
                Err(err) => warn!("intent outcome serialization failed: {err}"),
            }
        }

        if report.display_due {
            if let Ok(line) = serde_json::to_string(&system.status(report.now_ms)) {
                log::debug!("{line}");
            }
        }

        // The HAL disables a GPIO interrupt each time it fires.
        if let Err(err) = button.enable_interrupt() {
            warn!("failed to re-arm button interrupt: {err}");
        }
        if let Err(err) = rotary_a.enable_interrupt() {
            warn!("failed to re-arm rotary interrupt: {err}");
        }

        thread::sleep(Duration::from_millis(LOOP_PERIOD_MS));
    }
}

fn load_runtime_config(partition: &EspDefaultNvsPartition) -> anyhow::Result<RuntimeConfig> {
    let nvs = EspNvs::new(partition.clone(), NVS_NAMESPACE, true)?;
    let mut buffer = vec![0_u8; 4096];

    match nvs.get_str(NVS_RUNTIME_KEY, &mut buffer)? {
        Some(value) => Ok(serde_json::from_str::<RuntimeConfig>(value)?),
        None => Ok(RuntimeConfig::default()),
    }
}

/// JSON intents typed on the serial console, one per line.
fn spawn_console_intents() -> anyhow::Result<mpsc::Receiver<Intent>> {
    let (tx, rx) = mpsc::channel();
    thread::Builder::new()
        .name("console".into())
        .stack_size(8 * 1024)
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let line = match line {
                    Ok(line) => line,
                    Err(err) => {
                        warn!("console read failed: {err}");
                        thread::sleep(Duration::from_millis(500));
                        continue;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<Intent>(line.trim()) {
                    Ok(intent) => {
                        if tx.send(intent).is_err() {
                            break;
                        }
                    }
                    Err(err) => warn!("ignoring console input: {err}"),
                }
            }
        })
        .context("failed to spawn console thread")?;
    Ok(rx)
}

fn bus_error(err: impl std::fmt::Display) -> String {
    err.to_string()
}

fn bcd_to_bin(value: u8) -> u8 {
    (value >> 4) * 10 + (value & 0x0F)
}

fn bin_to_bcd(value: u8) -> u8 {
    ((value / 10) << 4) | (value % 10)
}

/// DS3231 battery-backed clock.
struct Ds3231 {
    bus: SharedI2c,
}

impl Ds3231 {
    const REG_TIME: u8 = 0x00;
    const REG_ALARM1: u8 = 0x07;
    const REG_ALARM2: u8 = 0x0B;
    const REG_CONTROL: u8 = 0x0E;
    const REG_STATUS: u8 = 0x0F;

    const CONTROL_INTCN: u8 = 0x04;
    const STATUS_OSF: u8 = 0x80;
    // Alarm "match once per day" mask bit in the day/date register.
    const ALARM_DAILY: u8 = 0x80;

    fn read(&self, reg: u8, buf: &mut [u8]) -> Result<(), ClockError> {
        let mut bus = self
            .bus
            .lock()
            .map_err(|_| ClockError::Bus("i2c bus lock poisoned".into()))?;
        bus.write_read(DS3231_ADDR, &[reg], buf, BLOCK)
            .map_err(|err| ClockError::Bus(bus_error(err)))
    }

    fn write(&self, reg: u8, data: &[u8]) -> Result<(), ClockError> {
        let mut frame = Vec::with_capacity(data.len() + 1);
        frame.push(reg);
        frame.extend_from_slice(data);
        let mut bus = self
            .bus
            .lock()
            .map_err(|_| ClockError::Bus("i2c bus lock poisoned".into()))?;
        bus.write(DS3231_ADDR, &frame, BLOCK)
            .map_err(|err| ClockError::Bus(bus_error(err)))
    }

    fn read_reg(&self, reg: u8) -> Result<u8, ClockError> {
        let mut value = [0_u8];
        self.read(reg, &mut value)?;
        Ok(value[0])
    }

    fn update_reg(&self, reg: u8, update: impl FnOnce(u8) -> u8) -> Result<(), ClockError> {
        let value = self.read_reg(reg)?;
        self.write(reg, &[update(value)])
    }

    fn alarm_bit(alarm: Alarm) -> u8 {
        match alarm {
            Alarm::One => 0x01,
            Alarm::Two => 0x02,
        }
    }
}

impl RtcClock for Ds3231 {
    fn begin(&mut self) -> Result<(), ClockError> {
        self.read_reg(Self::REG_STATUS)
            .map(|_| ())
            .map_err(|_| ClockError::NotDetected)
    }

    fn now(&mut self) -> Result<NaiveDateTime, ClockError> {
        let mut raw = [0_u8; 7];
        self.read(Self::REG_TIME, &mut raw)?;

        let second = bcd_to_bin(raw[0] & 0x7F);
        let minute = bcd_to_bin(raw[1] & 0x7F);
        let hour = bcd_to_bin(raw[2] & 0x3F);
        let day = bcd_to_bin(raw[4] & 0x3F);
        let month = bcd_to_bin(raw[5] & 0x1F);
        let year = 2000 + i32::from(bcd_to_bin(raw[6]));

        NaiveDate::from_ymd_opt(year, u32::from(month), u32::from(day))
            .and_then(|date| {
                date.and_hms_opt(u32::from(hour), u32::from(minute), u32::from(second))
            })
            .ok_or(ClockError::InvalidReading)
    }

    fn adjust(&mut self, datetime: NaiveDateTime) -> Result<(), ClockError> {
        let year = u8::try_from(datetime.year() - 2000).map_err(|_| ClockError::InvalidReading)?;
        let weekday = datetime.weekday().num_days_from_sunday() as u8 + 1;
        self.write(
            Self::REG_TIME,
            &[
                bin_to_bcd(datetime.second() as u8),
                bin_to_bcd(datetime.minute() as u8),
                bin_to_bcd(datetime.hour() as u8),
                weekday,
                bin_to_bcd(datetime.day() as u8),
                bin_to_bcd(datetime.month() as u8),
                bin_to_bcd(year),
            ],
        )?;
        self.update_reg(Self::REG_STATUS, |status| status & !Self::STATUS_OSF)
    }

    fn lost_power(&mut self) -> Result<bool, ClockError> {
        Ok(self.read_reg(Self::REG_STATUS)? & Self::STATUS_OSF != 0)
    }

    fn set_alarm(&mut self, alarm: Alarm, at: NaiveDateTime) -> Result<(), ClockError> {
        let minute = bin_to_bcd(at.minute() as u8);
        let hour = bin_to_bcd(at.hour() as u8);
        match alarm {
            Alarm::One => self.write(
                Self::REG_ALARM1,
                &[bin_to_bcd(at.second() as u8), minute, hour, Self::ALARM_DAILY],
            ),
            Alarm::Two => self.write(Self::REG_ALARM2, &[minute, hour, Self::ALARM_DAILY]),
        }
    }

    fn disable_alarm(&mut self, alarm: Alarm) -> Result<(), ClockError> {
        let bit = Self::alarm_bit(alarm);
        self.update_reg(Self::REG_CONTROL, |control| control & !bit)
    }

    fn clear_alarm(&mut self, alarm: Alarm) -> Result<(), ClockError> {
        let bit = Self::alarm_bit(alarm);
        self.update_reg(Self::REG_STATUS, |status| status & !bit)
    }

    fn alarm_fired(&mut self, alarm: Alarm) -> Result<bool, ClockError> {
        Ok(self.read_reg(Self::REG_STATUS)? & Self::alarm_bit(alarm) != 0)
    }

    fn set_alarm_interrupt(&mut self, alarm: Alarm, enabled: bool) -> Result<(), ClockError> {
        let bit = Self::alarm_bit(alarm);
        self.update_reg(Self::REG_CONTROL, |control| {
            if enabled {
                control | Self::CONTROL_INTCN | bit
            } else {
                control & !bit
            }
        })
    }

    fn alarm_interrupt_enabled(&mut self, alarm: Alarm) -> Result<bool, ClockError> {
        Ok(self.read_reg(Self::REG_CONTROL)? & Self::alarm_bit(alarm) != 0)
    }
}

/// DS3502 digital potentiometer driving the heater's setpoint input, plus
/// the heater enable line.
struct Ds3502Output {
    bus: SharedI2c,
    enable: PinDriver<'static, AnyOutputPin, Output>,
}

impl Ds3502Output {
    const REG_WIPER: u8 = 0x00;
    const REG_CONTROL: u8 = 0x02;
    // Mode 1: wiper writes go to the volatile register only.
    const CONTROL_MODE1: u8 = 0x80;

    fn write(&self, reg: u8, value: u8) -> Result<(), ActuatorError> {
        let mut bus = self
            .bus
            .lock()
            .map_err(|_| ActuatorError::Bus("i2c bus lock poisoned".into()))?;
        bus.write(DS3502_ADDR, &[reg, value], BLOCK)
            .map_err(|err| ActuatorError::Bus(bus_error(err)))
    }
}

impl Actuator for Ds3502Output {
    fn probe(&mut self) -> Result<(), ActuatorError> {
        self.write(Self::REG_CONTROL, Self::CONTROL_MODE1)
            .map_err(|_| ActuatorError::NotDetected)
    }

    fn set_wiper(&mut self, value: u8) -> Result<(), ActuatorError> {
        self.write(Self::REG_WIPER, value & 0x7F)
    }

    fn set_enable(&mut self, on: bool) -> Result<(), ActuatorError> {
        let result = if on {
            self.enable.set_high()
        } else {
            self.enable.set_low()
        };
        result.map_err(|err| ActuatorError::Bus(bus_error(err)))
    }
}

/// DS18B20 on the one-wire bus.
struct CabinProbe {
    one_wire: OneWire<PinDriver<'static, AnyIOPin, InputOutput>>,
    address: Option<Address>,
    delay: Ets,
}

impl CabinProbe {
    fn new(pin: AnyIOPin) -> anyhow::Result<Self> {
        let mut one_wire_pin = PinDriver::input_output_od(pin)?;
        one_wire_pin.set_pull(Pull::Up)?;
        one_wire_pin.set_high()?;

        let one_wire = OneWire::new(one_wire_pin)
            .map_err(|err| anyhow!("failed to initialize one-wire bus: {err:?}"))?;

        let mut probe = Self {
            one_wire,
            address: None,
            delay: Ets,
        };
        probe.refresh_address();
        Ok(probe)
    }

    fn refresh_address(&mut self) {
        let mut found = None;
        for address in self.one_wire.devices(false, &mut self.delay) {
            match address {
                Ok(address) if address.family_code() == ds18b20::FAMILY_CODE => {
                    found = Some(address);
                    break;
                }
                Ok(_) => {}
                Err(err) => {
                    warn!("one-wire device scan failed: {err:?}");
                    break;
                }
            }
        }

        self.address = found;
        match found {
            Some(address) => info!("DS18B20 ready on GPIO{DS18B20_PIN} ({address:?})"),
            None => warn!("no DS18B20 found on GPIO{DS18B20_PIN}"),
        }
    }
}

impl TemperatureProbe for CabinProbe {
    fn read_celsius(&mut self) -> Result<f32, ProbeError> {
        if self.address.is_none() {
            self.refresh_address();
        }
        let address = self.address.ok_or(ProbeError::Disconnected)?;

        let sensor = Ds18b20::new::<core::convert::Infallible>(address).map_err(|err| {
            self.address = None;
            ProbeError::Bus(format!("invalid DS18B20 address: {err:?}"))
        })?;

        ds18b20::start_simultaneous_temp_measurement(&mut self.one_wire, &mut self.delay)
            .map_err(|err| {
                self.address = None;
                ProbeError::Bus(format!("conversion start failed: {err:?}"))
            })?;

        Resolution::Bits12.delay_for_measurement_time(&mut self.delay);

        sensor
            .read_data(&mut self.one_wire, &mut self.delay)
            .map(|data| data.temperature)
            .map_err(|err| {
                self.address = None;
                ProbeError::Bus(format!("read failed: {err:?}"))
            })
    }
}

/// Light sleep with GPIO wake and a wake-up timer standing in for the
/// watchdog. Deep sleep on this chip would reset it, so the deeper tier is
/// light sleep with the peripheral rail switched off.
struct EspSleep {
    peripheral_power: Option<PinDriver<'static, AnyOutputPin, Output>>,
}

impl EspSleep {
    fn pin_for(source: WakeSource) -> i32 {
        match source {
            WakeSource::Button => BUTTON_PIN,
            WakeSource::Rotary => ROTARY_A_PIN,
        }
    }
}

impl SleepPlatform for EspSleep {
    fn arm_wake_sources(&mut self, sources: &[WakeSource]) {
        for source in sources {
            let pin = Self::pin_for(*source);
            let rc = unsafe {
                esp_idf_svc::sys::gpio_wakeup_enable(
                    pin,
                    esp_idf_svc::sys::gpio_int_type_t_GPIO_INTR_LOW_LEVEL,
                )
            };
            if rc != esp_idf_svc::sys::ESP_OK {
                warn!("failed to arm GPIO{pin} as wake source: esp_err_t={rc}");
            }
        }
        let rc = unsafe { esp_idf_svc::sys::esp_sleep_enable_gpio_wakeup() };
        if rc != esp_idf_svc::sys::ESP_OK {
            warn!("failed to enable GPIO wake: esp_err_t={rc}");
        }
    }

    fn disarm_wake_sources(&mut self) {
        for pin in [BUTTON_PIN, ROTARY_A_PIN] {
            let _ = unsafe { esp_idf_svc::sys::gpio_wakeup_disable(pin) };
        }
    }

    fn arm_watchdog(&mut self, period_ms: u64) {
        let rc = unsafe { esp_idf_svc::sys::esp_sleep_enable_timer_wakeup(period_ms * 1_000) };
        if rc != esp_idf_svc::sys::ESP_OK {
            warn!("failed to arm sleep timer: esp_err_t={rc}");
        }
    }

    fn disarm_watchdog(&mut self) {
        let _ = unsafe {
            esp_idf_svc::sys::esp_sleep_disable_wakeup_source(
                esp_idf_svc::sys::esp_sleep_source_t_ESP_SLEEP_WAKEUP_TIMER,
            )
        };
    }

    fn set_peripheral_power(&mut self, enabled: bool) {
        let Some(pin) = self.peripheral_power.as_mut() else {
            return;
        };
        let result = if enabled { pin.set_high() } else { pin.set_low() };
        if let Err(err) = result {
            warn!("failed to switch peripheral power on GPIO{PERIPHERAL_POWER_PIN}: {err}");
        }
    }

    fn halt(&mut self) -> u64 {
        // Task watchdog must not fire while the core is stopped.
        feed_watchdog();
        let rc = unsafe { esp_idf_svc::sys::esp_light_sleep_start() };
        if rc != esp_idf_svc::sys::ESP_OK {
            warn!("light sleep rejected: esp_err_t={rc}");
        }

        let cause = unsafe { esp_idf_svc::sys::esp_sleep_get_wakeup_cause() };
        if cause == esp_idf_svc::sys::esp_sleep_source_t_ESP_SLEEP_WAKEUP_GPIO {
            // Level wake fires before the edge handlers get a chance to run.
            if unsafe { esp_idf_svc::sys::gpio_get_level(BUTTON_PIN) } == 0 {
                WAKE_SIGNALS.raise_button();
            } else {
                WAKE_SIGNALS.raise_rotary_wake();
            }
        } else if cause == esp_idf_svc::sys::esp_sleep_source_t_ESP_SLEEP_WAKEUP_TIMER {
            isr::on_watchdog_expiry();
        }

        monotonic_ms()
    }
}

fn init_watchdog(timeout_sec: u32) -> anyhow::Result<()> {
    let config = esp_idf_svc::sys::esp_task_wdt_config_t {
        timeout_ms: timeout_sec.saturating_mul(1000),
        idle_core_mask: 0,
        trigger_panic: true,
    };
    let rc = unsafe { esp_idf_svc::sys::esp_task_wdt_init(&config) };
    if rc == esp_idf_svc::sys::ESP_OK || rc == esp_idf_svc::sys::ESP_ERR_INVALID_STATE {
        return Ok(());
    }
    Err(anyhow!("esp_task_wdt_init failed with code {}", rc))
}

fn add_current_task_to_watchdog() -> anyhow::Result<()> {
    let rc = unsafe { esp_idf_svc::sys::esp_task_wdt_add(core::ptr::null_mut()) };
    if rc == esp_idf_svc::sys::ESP_OK || rc == esp_idf_svc::sys::ESP_ERR_INVALID_STATE {
        return Ok(());
    }
    Err(anyhow!("esp_task_wdt_add failed with code {}", rc))
}

fn feed_watchdog() {
    let _ = unsafe { esp_idf_svc::sys::esp_task_wdt_reset() };
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
