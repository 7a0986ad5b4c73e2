#[cfg(feature = "esp32")]
mod esp;
#[cfg(not(feature = "esp32"))]
mod host;

use chrono::{DateTime, NaiveDateTime};

/// Compile time of this firmware, used to seed a clock that lost power.
pub(crate) fn build_timestamp() -> NaiveDateTime {
    option_env!("HEATER_BUILD_EPOCH")
        .and_then(|secs| secs.parse::<i64>().ok())
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .map(|datetime| datetime.naive_utc())
        .unwrap_or_default()
}

#[cfg(not(feature = "esp32"))]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    host::run().await
}

#[cfg(feature = "esp32")]
fn main() -> anyhow::Result<()> {
    esp::run()
}
