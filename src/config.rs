use std::path::PathBuf;
use std::str::FromStr;

use crate::bus::DEFAULT_BUS_CAPACITY;
use crate::clock::{ClockError, DEFAULT_CLOSE_SLOT, DEFAULT_OPEN_SLOT, SlotClock};
use crate::model::Slot;
use crate::session::DEFAULT_SESSION_BUFFER;

pub const WAL_FILE_NAME: &str = "reservations.wal";

#[derive(Debug)]
pub enum ConfigError {
    Invalid { key: &'static str, value: String },
    Window(ClockError),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Invalid { key, value } => write!(f, "invalid value for {key}: {value:?}"),
            ConfigError::Window(e) => write!(f, "ROOMSYNC_OPEN_SLOT/ROOMSYNC_CLOSE_SLOT: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Server settings, read from `ROOMSYNC_*` environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub open_slot: Slot,
    pub close_slot: Slot,
    pub session_buffer: usize,
    pub bus_capacity: usize,
    pub metrics_port: Option<u16>,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 5433,
            data_dir: PathBuf::from("./data"),
            password: "roomsync".into(),
            max_connections: 256,
            compact_threshold: 1000,
            open_slot: DEFAULT_OPEN_SLOT,
            close_slot: DEFAULT_CLOSE_SLOT,
            session_buffer: DEFAULT_SESSION_BUFFER,
            bus_capacity: DEFAULT_BUS_CAPACITY,
            metrics_port: None,
            tls_cert: None,
            tls_key: None,
        }
    }
}

fn parsed<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(key) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { key, value }),
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unset keys keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let d = Self::default();
        let config = Self {
            bind: lookup("ROOMSYNC_BIND").unwrap_or(d.bind),
            port: parsed(&lookup, "ROOMSYNC_PORT")?.unwrap_or(d.port),
            data_dir: lookup("ROOMSYNC_DATA_DIR").map(PathBuf::from).unwrap_or(d.data_dir),
            password: lookup("ROOMSYNC_PASSWORD").unwrap_or(d.password),
            max_connections: parsed(&lookup, "ROOMSYNC_MAX_CONNECTIONS")?
                .unwrap_or(d.max_connections),
            compact_threshold: parsed(&lookup, "ROOMSYNC_COMPACT_THRESHOLD")?
                .unwrap_or(d.compact_threshold),
            open_slot: parsed(&lookup, "ROOMSYNC_OPEN_SLOT")?.unwrap_or(d.open_slot),
            close_slot: parsed(&lookup, "ROOMSYNC_CLOSE_SLOT")?.unwrap_or(d.close_slot),
            session_buffer: parsed(&lookup, "ROOMSYNC_SESSION_BUFFER")?.unwrap_or(d.session_buffer),
            bus_capacity: parsed(&lookup, "ROOMSYNC_BUS_CAPACITY")?.unwrap_or(d.bus_capacity),
            metrics_port: parsed(&lookup, "ROOMSYNC_METRICS_PORT")?,
            tls_cert: lookup("ROOMSYNC_TLS_CERT"),
            tls_key: lookup("ROOMSYNC_TLS_KEY"),
        };
        if config.max_connections == 0 {
            return Err(ConfigError::Invalid {
                key: "ROOMSYNC_MAX_CONNECTIONS",
                value: "0".into(),
            });
        }
        config.clock()?;
        Ok(config)
    }

    pub fn clock(&self) -> Result<SlotClock, ConfigError> {
        SlotClock::new(self.open_slot, self.close_slot).map_err(ConfigError::Window)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join(WAL_FILE_NAME)
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}
