//! Controller Configuration
//!
//! `domus.toml` describes the dispatcher, the field buses and the points
//! polled on them. Values can be overridden from `DOMUS_`-prefixed
//! environment variables, with `__` separating nested keys
//! (`DOMUS_DISPATCH__PUBLISHER=plant-room`).

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::Figment;
use figment::providers::{Env, Format, Toml};
use serde::{Deserialize, Serialize};

use domus_bus::{BusSettings, MAX_PRIORITIES, MAX_TRIES, MIN_CAPACITY, ModbusTransport};

/// Most registers one Modbus read may return
const MAX_REGISTERS: u16 = 125;

/// Most coils or discrete inputs one Modbus read may return
const MAX_BITS: u16 = 2000;

/// Error type for configuration loading
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    #[error("Failed to load config: {0}")]
    Load(#[from] Box<figment::Error>),

    #[error("Duplicate bus name: {0}")]
    DuplicateBus(String),

    #[error("Invalid bus {bus}: {reason}")]
    InvalidBus { bus: String, reason: String },

    #[error("Duplicate point id: {0}")]
    DuplicatePoint(i64),

    #[error("Point {point} references unknown bus {bus}")]
    UnknownBus { point: i64, bus: String },

    #[error("Invalid point {point}: {reason}")]
    InvalidPoint { point: i64, reason: String },

    #[error("Invalid event name {0:?}")]
    InvalidEvent(String),
}

// ─────────────────────────────────────────────────────────────────────────────
// Settings
// ─────────────────────────────────────────────────────────────────────────────

/// Root of `domus.toml`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub dispatch: DispatchConfig,
    /// Event names handlers may subscribe to, besides the built-in ones
    #[serde(default)]
    pub events: Vec<String>,
    #[serde(default, rename = "bus")]
    pub buses: Vec<BusConfig>,
    #[serde(default, rename = "point")]
    pub points: Vec<PointConfig>,
}

/// Message dispatch settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Publisher id stamped on messages this controller sends
    #[serde(default = "default_publisher")]
    pub publisher: String,
    /// Capacity hint for the subscription index
    #[serde(default = "default_subscriber_capacity")]
    pub subscriber_capacity: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            publisher: default_publisher(),
            subscriber_capacity: default_subscriber_capacity(),
        }
    }
}

fn default_publisher() -> String {
    "domus".to_string()
}

fn default_subscriber_capacity() -> usize {
    1024
}

/// One shared field bus
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    pub name: String,
    pub transport: ModbusTransport,
    /// Attempts to open the link per task
    #[serde(default = "default_bus_tries")]
    pub tries: u8,
    /// Per-request timeout
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_priorities")]
    pub priorities: usize,
}

fn default_bus_tries() -> u8 {
    3
}

fn default_timeout_ms() -> u64 {
    500
}

fn default_queue_capacity() -> usize {
    100
}

fn default_priorities() -> usize {
    5
}

impl BusConfig {
    pub fn settings(&self) -> BusSettings {
        BusSettings::default()
            .tries(self.tries)
            .capacity(self.queue_capacity)
            .priorities(self.priorities)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Register table a point lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegisterKind {
    Holding,
    Input,
    Coil,
    Discrete,
}

impl RegisterKind {
    pub fn is_bit(&self) -> bool {
        matches!(self, RegisterKind::Coil | RegisterKind::Discrete)
    }

    pub fn is_writable(&self) -> bool {
        matches!(self, RegisterKind::Holding | RegisterKind::Coil)
    }
}

/// A polled value on a device
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PointConfig {
    /// Item id used as the message target id
    pub id: i64,
    pub name: String,
    pub bus: String,
    /// Modbus unit (slave) address
    pub unit: u8,
    pub register: RegisterKind,
    pub address: u16,
    #[serde(default = "default_count")]
    pub count: u16,
    #[serde(default = "default_poll_ms")]
    pub poll_ms: u64,
    #[serde(default = "default_point_priority")]
    pub priority: usize,
    /// Attempts per read or write
    #[serde(default = "default_point_tries")]
    pub tries: u8,
    #[serde(default)]
    pub writable: bool,
}

fn default_count() -> u16 {
    1
}

fn default_poll_ms() -> u64 {
    5000
}

fn default_point_priority() -> usize {
    3
}

fn default_point_tries() -> u8 {
    2
}

impl PointConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_ms)
    }
}

impl Settings {
    /// Load and validate a config file, applying environment overrides
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        Self::extract(
            Figment::new()
                .merge(Toml::file(path))
                .merge(Env::prefixed("DOMUS_").split("__")),
        )
    }

    /// Parse and validate config text
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        Self::extract(Figment::from(Toml::string(text)))
    }

    fn extract(figment: Figment) -> Result<Self, ConfigError> {
        let settings: Settings = figment.extract().map_err(Box::new)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn bus(&self, name: &str) -> Option<&BusConfig> {
        self.buses.iter().find(|bus| bus.name == name)
    }

    /// Check cross references and ranges
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(name) = self.events.iter().find(|name| name.trim().is_empty()) {
            return Err(ConfigError::InvalidEvent(name.clone()));
        }

        let mut names = HashSet::new();
        for bus in &self.buses {
            if !names.insert(bus.name.as_str()) {
                return Err(ConfigError::DuplicateBus(bus.name.clone()));
            }
            bus.validate()?;
        }

        let mut ids = HashSet::new();
        for point in &self.points {
            if !ids.insert(point.id) {
                return Err(ConfigError::DuplicatePoint(point.id));
            }
            let bus = self.bus(&point.bus).ok_or_else(|| ConfigError::UnknownBus {
                point: point.id,
                bus: point.bus.clone(),
            })?;
            point.validate(bus)?;
        }

        Ok(())
    }
}

impl BusConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidBus {
            bus: self.name.clone(),
            reason,
        };

        if self.name.is_empty() {
            return Err(invalid("name is empty".to_string()));
        }
        if !(1..=MAX_TRIES).contains(&self.tries) {
            return Err(invalid(format!("tries must be between 1 and {MAX_TRIES}")));
        }
        if self.timeout_ms == 0 {
            return Err(invalid("timeout_ms must be positive".to_string()));
        }
        if self.queue_capacity < MIN_CAPACITY {
            return Err(invalid(format!("queue_capacity must be at least {MIN_CAPACITY}")));
        }
        if !(1..=MAX_PRIORITIES).contains(&self.priorities) {
            return Err(invalid(format!("priorities must be between 1 and {MAX_PRIORITIES}")));
        }
        Ok(())
    }
}

impl PointConfig {
    fn validate(&self, bus: &BusConfig) -> Result<(), ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidPoint {
            point: self.id,
            reason,
        };

        if self.id < 1 {
            return Err(invalid("id must be at least 1".to_string()));
        }
        if self.poll_ms == 0 {
            return Err(invalid("poll_ms must be positive".to_string()));
        }
        if !(1..=MAX_TRIES).contains(&self.tries) {
            return Err(invalid(format!("tries must be between 1 and {MAX_TRIES}")));
        }
        if !(1..=bus.priorities).contains(&self.priority) {
            return Err(invalid(format!(
                "priority must be between 1 and {} on bus {}",
                bus.priorities, bus.name
            )));
        }

        let max = if self.register.is_bit() { MAX_BITS } else { MAX_REGISTERS };
        if !(1..=max).contains(&self.count) {
            return Err(invalid(format!("count must be between 1 and {max}")));
        }
        if self.writable && !self.register.is_writable() {
            return Err(invalid(format!("{:?} registers are read-only", self.register)));
        }
        if self.writable && self.count != 1 {
            return Err(invalid("writable points must have count 1".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SAMPLE: &str = r#"
events = ["object.port.on_press"]

[dispatch]
publisher = "plant-room"

[[bus]]
name = "rs485-1"
transport = { kind = "rtu", path = "/dev/ttyUSB0", parity = "even" }
timeout_ms = 250

[[bus]]
name = "gateway"
transport = { kind = "tcp", address = "10.0.0.5:502" }
priorities = 3

[[point]]
id = 42
name = "boiler.temperature"
bus = "rs485-1"
unit = 1
register = "holding"
address = 0

[[point]]
id = 43
name = "pump.enable"
bus = "gateway"
unit = 2
register = "coil"
address = 10
priority = 1
writable = true
"#;

    #[test]
    fn test_parse_sample() {
        let settings = Settings::parse(SAMPLE).unwrap();

        assert_eq!(settings.dispatch.publisher, "plant-room");
        assert_eq!(settings.dispatch.subscriber_capacity, 1024);
        assert_eq!(settings.events, vec!["object.port.on_press"]);
        assert_eq!(settings.buses.len(), 2);
        assert_eq!(settings.points.len(), 2);

        let bus = settings.bus("rs485-1").unwrap();
        assert_eq!(bus.timeout(), Duration::from_millis(250));
        assert_eq!(bus.settings(), BusSettings::default());

        let point = &settings.points[0];
        assert_eq!(point.register, RegisterKind::Holding);
        assert_eq!(point.count, 1);
        assert_eq!(point.poll_interval(), Duration::from_secs(5));
        assert_eq!(point.priority, 3);
        assert_eq!(point.tries, 2);
        assert!(!point.writable);
        assert!(settings.points[1].writable);
    }

    #[test]
    fn test_load_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("domus.toml");
        std::fs::write(&path, SAMPLE).unwrap();

        let settings = Settings::load(&path).unwrap();
        assert_eq!(settings.bus("gateway").unwrap().priorities, 3);

        let missing = dir.path().join("missing.toml");
        assert!(matches!(Settings::load(&missing), Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn test_empty_config_is_valid() {
        let settings = Settings::parse("").unwrap();
        assert_eq!(settings.dispatch.publisher, "domus");
        assert!(settings.buses.is_empty());
    }

    #[test]
    fn test_rejects_bad_references() {
        let unknown_bus = SAMPLE.replace("bus = \"gateway\"", "bus = \"nowhere\"");
        assert!(matches!(
            Settings::parse(&unknown_bus),
            Err(ConfigError::UnknownBus { point: 43, .. })
        ));

        let duplicate_bus = SAMPLE.replace("name = \"gateway\"", "name = \"rs485-1\"");
        assert!(matches!(
            Settings::parse(&duplicate_bus),
            Err(ConfigError::DuplicateBus(name)) if name == "rs485-1"
        ));

        let duplicate_point = SAMPLE.replace("id = 43", "id = 42");
        assert!(matches!(
            Settings::parse(&duplicate_point),
            Err(ConfigError::DuplicatePoint(42))
        ));
    }

    #[test]
    fn test_rejects_bad_ranges() {
        let cases = [
            ("timeout_ms = 250", "timeout_ms = 0"),
            ("priorities = 3", "priorities = 0"),
            ("priorities = 3", "priorities = 3\ntries = 11"),
            ("priorities = 3", "priorities = 3\nqueue_capacity = 5"),
        ];
        for (from, to) in cases {
            let text = SAMPLE.replace(from, to);
            assert!(
                matches!(Settings::parse(&text), Err(ConfigError::InvalidBus { .. })),
                "{to}"
            );
        }

        let cases = [
            ("address = 0", "address = 0\npoll_ms = 0"),
            ("address = 0", "address = 0\ncount = 0"),
            ("address = 0", "address = 0\ncount = 126"),
            ("address = 0", "address = 0\ntries = 0"),
            ("priority = 1", "priority = 4"),
            ("register = \"coil\"", "register = \"discrete\""),
            ("id = 42", "id = 0"),
        ];
        for (from, to) in cases {
            let text = SAMPLE.replace(from, to);
            assert!(
                matches!(Settings::parse(&text), Err(ConfigError::InvalidPoint { .. })),
                "{to}"
            );
        }
    }

    #[test]
    fn test_rejects_malformed_toml() {
        assert!(matches!(
            Settings::parse("[[bus]]\nname = 3"),
            Err(ConfigError::Load(_))
        ));
        assert!(matches!(
            Settings::parse("events = [\"\"]"),
            Err(ConfigError::InvalidEvent(_))
        ));
    }
}
