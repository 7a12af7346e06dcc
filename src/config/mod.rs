//! # Configuration Management Module
//!
//! The bridge is configured entirely from the process environment so it can
//! drop into the same deployments (systemd units, containers) as the rest of
//! the station stack. Values are parsed once at startup into a typed
//! [`Config`]; unparseable numbers fall back to their defaults with a logged
//! warning rather than aborting the bridge.
//!
//! ## Variables
//!
//! | Variable | Default |
//! |---|---|
//! | `SERIAL_PORT` | `/dev/ttyACM0` |
//! | `SERIAL_BAUD` | `115200` |
//! | `HTTP_PORT` | `8080` (external reverse proxy, recorded only) |
//! | `WS_PORT` | `3000` |
//! | `TCP_PORT` | `5000` |
//! | `PUSH_BUFFER_SIZE` | `1000` |
//! | `PUSH_BUFFER_FILE` | `data/push_buffer.json` |
//! | `COMMAND_TIMEOUT_MS` | `30000` |
//! | `DEBUG` | unset |
//! | `WEATHER_ENABLED` | unset |
//! | `WEATHER_BASE_URL` | — |
//! | `WEATHER_TOKEN` | — |
//! | `WEATHER_POLL_MINUTES` | `15` |
//! | `WEATHER_CHANNEL` | `0` |
//! | `WEATHER_ENTITY_<SENSOR>` | — (one per sensor key) |
//!
//! Precedence is CLI args > environment > defaults; the only CLI override is
//! the serial port path.

use std::collections::HashMap;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use log::warn;

use crate::weather::SensorKey;

/// Main configuration structure.
#[derive(Debug, Clone)]
pub struct Config {
    pub serial: SerialConfig,
    pub server: ServerConfig,
    pub queue: QueueConfig,
    pub replay: ReplayConfig,
    pub weather: WeatherConfig,
}

/// Serial device settings.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    pub port: String,
    pub baud_rate: u32,
}

/// Listening ports for the client endpoints.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub ws_port: u16,
    pub tcp_port: u16,
    /// Port of the external HTTP reverse proxy. The bridge does not listen
    /// here; the value is logged at startup for deployment parity.
    pub http_port: u16,
}

/// Command queue tuning.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub command_timeout: Duration,
}

/// Push-replay buffer settings.
#[derive(Debug, Clone)]
pub struct ReplayConfig {
    pub capacity: usize,
    pub file: String,
}

/// Weather producer settings. `entities` maps each configured sensor key to
/// an entity identifier at the external state source.
#[derive(Debug, Clone, Default)]
pub struct WeatherConfig {
    pub enabled: bool,
    pub base_url: String,
    pub token: String,
    pub poll_minutes: u64,
    pub channel: u8,
    pub entities: HashMap<SensorKey, String>,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyACM0".to_string(),
            baud_rate: 115_200,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            ws_port: 3000,
            tcp_port: 5000,
            http_port: 8080,
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            command_timeout: Duration::from_millis(30_000),
        }
    }
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            capacity: 1000,
            file: "data/push_buffer.json".to_string(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            serial: SerialConfig::default(),
            server: ServerConfig::default(),
            queue: QueueConfig::default(),
            replay: ReplayConfig::default(),
            weather: WeatherConfig {
                poll_minutes: 15,
                ..WeatherConfig::default()
            },
        }
    }
}

impl Config {
    /// Build the configuration from the process environment.
    pub fn from_env() -> Self {
        let defaults = Config::default();

        let serial = SerialConfig {
            port: env_string("SERIAL_PORT", defaults.serial.port),
            baud_rate: env_parse("SERIAL_BAUD", defaults.serial.baud_rate),
        };
        let server = ServerConfig {
            ws_port: env_parse("WS_PORT", defaults.server.ws_port),
            tcp_port: env_parse("TCP_PORT", defaults.server.tcp_port),
            http_port: env_parse("HTTP_PORT", defaults.server.http_port),
        };
        let queue = QueueConfig {
            command_timeout: Duration::from_millis(env_parse(
                "COMMAND_TIMEOUT_MS",
                defaults.queue.command_timeout.as_millis() as u64,
            )),
        };
        let mut capacity = env_parse("PUSH_BUFFER_SIZE", defaults.replay.capacity);
        if capacity == 0 {
            warn!(
                "PUSH_BUFFER_SIZE must be at least 1, using default {}",
                defaults.replay.capacity
            );
            capacity = defaults.replay.capacity;
        }
        let replay = ReplayConfig {
            capacity,
            file: env_string("PUSH_BUFFER_FILE", defaults.replay.file),
        };

        let mut entities = HashMap::new();
        for key in SensorKey::ALL {
            let var = format!("WEATHER_ENTITY_{}", key.env_suffix());
            if let Ok(entity) = std::env::var(&var) {
                if !entity.trim().is_empty() {
                    entities.insert(key, entity.trim().to_string());
                }
            }
        }
        let weather = WeatherConfig {
            enabled: env_flag("WEATHER_ENABLED"),
            base_url: env_string("WEATHER_BASE_URL", String::new()),
            token: env_string("WEATHER_TOKEN", String::new()),
            poll_minutes: env_parse("WEATHER_POLL_MINUTES", defaults.weather.poll_minutes),
            channel: env_parse("WEATHER_CHANNEL", defaults.weather.channel),
            entities,
        };

        Config {
            serial,
            server,
            queue,
            replay,
            weather,
        }
    }

    /// Whether verbose logging was requested via the `DEBUG` variable.
    pub fn debug_env() -> bool {
        env_flag("DEBUG")
    }
}

fn env_string(name: &str, default: String) -> String {
    match std::env::var(name) {
        Ok(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => default,
    }
}

/// A flag variable is truthy when set to anything but `0` or `false`.
fn env_flag(name: &str) -> bool {
    match std::env::var(name) {
        Ok(v) => {
            let v = v.trim();
            !v.is_empty() && v != "0" && !v.eq_ignore_ascii_case("false")
        }
        Err(_) => false,
    }
}

fn env_parse<T>(name: &str, default: T) -> T
where
    T: FromStr + Display + Copy,
{
    match std::env::var(name) {
        Ok(raw) => match raw.trim().parse::<T>() {
            Ok(v) => v,
            Err(_) => {
                warn!("Invalid {name}='{raw}', using default {default}");
                default
            }
        },
        Err(_) => default,
    }
}
