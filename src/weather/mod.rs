//! # Weather Report Producer
//!
//! Periodically polls an external state source (bearer-token HTTP API) for
//! configured sensor entities, assembles a compact single-line `WX:` report,
//! and submits it to the command queue as a channel text message with no
//! originating client — the producer is just another internal client of the
//! bridge. Misconfiguration disables the producer with an error log; the
//! bridge itself is unaffected.
//!
//! Readings whose state is `unavailable` or `unknown` are dropped for that
//! cycle; a cycle with no usable readings broadcasts nothing. Individual
//! fetch failures are logged and do not abort the cycle.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use chrono::Utc;
use log::{debug, error, info, warn};
use serde::Deserialize;
use tokio::time::{interval, timeout};

use crate::bridge::CommandSubmitter;
use crate::config::WeatherConfig;
use crate::logutil::escape_log;
use crate::protocol::{channel_text_payload, FrameCodec};

/// Per-request timeout for entity fetches.
const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Logical sensor slots the report knows how to format. The enum order is
/// not the report order; see [`format_report`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SensorKey {
    Temperature,
    Humidity,
    WindSpeed,
    WindGust,
    WindBearing,
    Pressure,
    Uv,
    RainRate,
    RainDaily,
    SolarRadiation,
    DewPoint,
}

impl SensorKey {
    pub const ALL: [SensorKey; 11] = [
        SensorKey::Temperature,
        SensorKey::Humidity,
        SensorKey::WindSpeed,
        SensorKey::WindGust,
        SensorKey::WindBearing,
        SensorKey::Pressure,
        SensorKey::Uv,
        SensorKey::RainRate,
        SensorKey::RainDaily,
        SensorKey::SolarRadiation,
        SensorKey::DewPoint,
    ];

    /// Suffix of the `WEATHER_ENTITY_*` environment variable for this slot.
    pub fn env_suffix(self) -> &'static str {
        match self {
            SensorKey::Temperature => "TEMPERATURE",
            SensorKey::Humidity => "HUMIDITY",
            SensorKey::WindSpeed => "WIND_SPEED",
            SensorKey::WindGust => "WIND_GUST",
            SensorKey::WindBearing => "WIND_BEARING",
            SensorKey::Pressure => "PRESSURE",
            SensorKey::Uv => "UV",
            SensorKey::RainRate => "RAIN_RATE",
            SensorKey::RainDaily => "RAIN_DAILY",
            SensorKey::SolarRadiation => "SOLAR_RADIATION",
            SensorKey::DewPoint => "DEW_POINT",
        }
    }
}

/// One usable sensor reading: the raw state string and its display unit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reading {
    pub state: String,
    pub unit: String,
}

/// Entity state as returned by the external API.
#[derive(Debug, Deserialize)]
struct EntityState {
    state: String,
    #[serde(default)]
    attributes: EntityAttributes,
}

#[derive(Debug, Default, Deserialize)]
struct EntityAttributes {
    #[serde(default)]
    unit_of_measurement: Option<String>,
}

/// 16-point compass rose, clockwise from north.
const COMPASS_POINTS: [&str; 16] = [
    "N", "NNE", "NE", "ENE", "E", "ESE", "SE", "SSE", "S", "SSW", "SW", "WSW", "W", "WNW", "NW",
    "NNW",
];

/// Convert a bearing in degrees to its compass point. Non-numeric bearings
/// pass through unchanged.
pub fn compass_point(bearing: &str) -> String {
    match bearing.trim().parse::<f64>() {
        Ok(deg) if deg.is_finite() => {
            let idx = ((deg / 22.5).round() as i64).rem_euclid(16) as usize;
            COMPASS_POINTS[idx].to_string()
        }
        _ => bearing.to_string(),
    }
}

/// Assemble the `WX:` report line from whatever readings are present, in
/// fixed field order. Returns `None` when no field could be produced.
pub fn format_report(readings: &HashMap<SensorKey, Reading>) -> Option<String> {
    let mut fields: Vec<String> = Vec::new();

    if let Some(r) = readings.get(&SensorKey::Temperature) {
        fields.push(format!("{}{}", r.state, r.unit));
    }
    if let Some(r) = readings.get(&SensorKey::Humidity) {
        fields.push(format!("{}{}", r.state, r.unit));
    }
    // Wind is a composite field keyed on speed; bearing and gust only
    // decorate it.
    if let Some(speed) = readings.get(&SensorKey::WindSpeed) {
        let mut wind = String::new();
        if let Some(bearing) = readings.get(&SensorKey::WindBearing) {
            wind.push_str(&compass_point(&bearing.state));
        }
        wind.push_str(&speed.state);
        if let Some(gust) = readings.get(&SensorKey::WindGust) {
            wind.push('G');
            wind.push_str(&gust.state);
        }
        wind.push_str(&speed.unit);
        fields.push(wind);
    }
    if let Some(r) = readings.get(&SensorKey::Pressure) {
        fields.push(format!("{}{}", r.state, r.unit));
    }
    if let Some(r) = readings.get(&SensorKey::Uv) {
        fields.push(format!("UV{}", r.state));
    }
    if let Some(r) = readings.get(&SensorKey::RainRate) {
        fields.push(format!("{}{}", r.state, r.unit));
    }
    if let Some(r) = readings.get(&SensorKey::RainDaily) {
        fields.push(format!("{}{}", r.state, r.unit));
    }
    if let Some(r) = readings.get(&SensorKey::SolarRadiation) {
        fields.push(format!("{}{}", r.state, r.unit));
    }
    if let Some(r) = readings.get(&SensorKey::DewPoint) {
        fields.push(format!("DP{}{}", r.state, r.unit));
    }

    if fields.is_empty() {
        None
    } else {
        Some(format!("WX: {}", fields.join(" ")))
    }
}

/// The producer task. Ticks immediately on start, then on the configured
/// interval; each tick is skipped unless the bridge reports itself ready
/// (startup handshake complete, serial open).
pub struct WeatherProducer {
    config: WeatherConfig,
    client: reqwest::Client,
    submit: CommandSubmitter,
    ready: Arc<AtomicBool>,
}

impl WeatherProducer {
    /// Validate the configuration and spawn the producer task.
    pub fn spawn(
        config: WeatherConfig,
        submit: CommandSubmitter,
        ready: Arc<AtomicBool>,
    ) -> Result<tokio::task::JoinHandle<()>> {
        validate(&config)?;
        let producer = WeatherProducer {
            client: reqwest::Client::new(),
            config,
            submit,
            ready,
        };
        Ok(tokio::spawn(async move { producer.run().await }))
    }

    async fn run(self) {
        info!(
            "Weather producer: {} sensor(s), every {} min on channel {}",
            self.config.entities.len(),
            self.config.poll_minutes,
            self.config.channel
        );
        let mut ticker = interval(Duration::from_secs(self.config.poll_minutes * 60));
        loop {
            ticker.tick().await;
            self.tick().await;
        }
    }

    async fn tick(&self) {
        if !self.ready.load(Ordering::Relaxed) {
            debug!("Weather tick skipped: bridge not ready");
            return;
        }
        let readings = self.collect_readings().await;
        let report = match format_report(&readings) {
            Some(r) => r,
            None => {
                debug!("Weather tick skipped: no usable readings");
                return;
            }
        };
        info!("Broadcasting weather report: {}", escape_log(&report));
        let payload = channel_text_payload(
            self.config.channel,
            Utc::now().timestamp() as u32,
            &report,
        );
        self.submit.submit(FrameCodec::encode_outgoing(&payload));
    }

    /// Fetch all configured entities concurrently; failed or unusable
    /// readings are dropped from the cycle.
    async fn collect_readings(&self) -> HashMap<SensorKey, Reading> {
        let fetches = self.config.entities.iter().map(|(key, entity)| {
            let key = *key;
            async move { (key, entity.as_str(), self.fetch_entity(entity).await) }
        });
        let mut readings = HashMap::new();
        for (key, entity, result) in futures_util::future::join_all(fetches).await {
            match result {
                Ok(Some(reading)) => {
                    readings.insert(key, reading);
                }
                Ok(None) => debug!("Entity {entity} has no usable state"),
                Err(e) => warn!("Fetching {entity} failed: {e}"),
            }
        }
        readings
    }

    /// Fetch one entity state. `Ok(None)` means the entity answered but its
    /// value is `unavailable`/`unknown`.
    async fn fetch_entity(&self, entity: &str) -> Result<Option<Reading>> {
        let url = format!(
            "{}/api/states/{}",
            self.config.base_url.trim_end_matches('/'),
            entity
        );
        let response = timeout(
            FETCH_TIMEOUT,
            self.client
                .get(&url)
                .bearer_auth(&self.config.token)
                .send(),
        )
        .await
        .map_err(|_| anyhow!("request timeout after {}s", FETCH_TIMEOUT.as_secs()))?
        .map_err(|e| anyhow!("request failed: {e}"))?;

        if !response.status().is_success() {
            bail!("state source returned {}", response.status());
        }
        let state: EntityState = response
            .json()
            .await
            .map_err(|e| anyhow!("invalid state payload: {e}"))?;
        if state.state == "unavailable" || state.state == "unknown" {
            return Ok(None);
        }
        Ok(Some(Reading {
            state: state.state,
            unit: state.attributes.unit_of_measurement.unwrap_or_default(),
        }))
    }
}

fn validate(config: &WeatherConfig) -> Result<()> {
    if config.base_url.is_empty() {
        bail!("WEATHER_BASE_URL is required");
    }
    if config.token.is_empty() {
        bail!("WEATHER_TOKEN is required");
    }
    if config.entities.is_empty() {
        bail!("at least one WEATHER_ENTITY_* must be configured");
    }
    if config.poll_minutes == 0 {
        bail!("WEATHER_POLL_MINUTES must be at least 1");
    }
    Ok(())
}

/// Log-and-drop wrapper used at startup so a bad weather configuration
/// never takes the bridge down.
pub fn spawn_if_enabled(
    config: &WeatherConfig,
    submit: CommandSubmitter,
    ready: Arc<AtomicBool>,
) -> Option<tokio::task::JoinHandle<()>> {
    if !config.enabled {
        return None;
    }
    match WeatherProducer::spawn(config.clone(), submit, ready) {
        Ok(handle) => Some(handle),
        Err(e) => {
            error!("Weather producer disabled: {e}");
            None
        }
    }
}
