//! Gateway tuning loaded from `world_gateway.toml` and the environment.

use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use super::persistence::RecordCodec;
use super::scheduler::ReschedulePolicy;
use super::types::{DimensionId, WorldTick};

pub const ENV_TARGET_DIMENSION: &str = "WORLD_GATEWAY_TARGET_DIMENSION";
pub const ENV_TICK_INTERVAL_MS: &str = "WORLD_GATEWAY_TICK_INTERVAL_MS";
pub const ENV_RESTORE_DELAY_TICKS: &str = "WORLD_GATEWAY_RESTORE_DELAY_TICKS";
pub const ENV_DEDUP_RADIUS: &str = "WORLD_GATEWAY_DEDUP_RADIUS";
pub const ENV_PURGE_RADIUS: &str = "WORLD_GATEWAY_PURGE_RADIUS";
pub const ENV_PURGE_ESCALATED_RADIUS: &str = "WORLD_GATEWAY_PURGE_ESCALATED_RADIUS";
pub const ENV_MAX_PENDING_RESTORATIONS: &str = "WORLD_GATEWAY_MAX_PENDING_RESTORATIONS";
pub const ENV_RESCHEDULE_POLICY: &str = "WORLD_GATEWAY_RESCHEDULE_POLICY";
pub const ENV_RECORD_CODEC: &str = "WORLD_GATEWAY_RECORD_CODEC";

pub const DEFAULT_CONFIG_FILE_NAME: &str = "world_gateway.toml";
pub const DEFAULT_TARGET_DIMENSION: &str = "gateway";
pub const DEFAULT_TICK_INTERVAL_MS: u64 = 50;
pub const DEFAULT_RESTORE_DELAY_TICKS: WorldTick = 60;
pub const DEFAULT_DEDUP_RADIUS: i32 = 4;
pub const DEFAULT_PURGE_RADIUS: i32 = 10;
pub const DEFAULT_PURGE_ESCALATED_RADIUS: i32 = 16;
pub const DEFAULT_MAX_PENDING_RESTORATIONS: usize = 4096;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayConfig {
    /// Dimension whose first entry arms instability and whose portals get purged.
    pub target_dimension: DimensionId,
    pub tick_interval: Duration,
    pub restore_delay_ticks: WorldTick,
    /// "Close enough" radius when matching an entry point to a known portal.
    pub dedup_radius: i32,
    pub purge_radius: i32,
    pub purge_escalated_radius: i32,
    pub max_pending_restorations: usize,
    pub reschedule_policy: ReschedulePolicy,
    pub record_codec: RecordCodec,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            target_dimension: DimensionId::from_static(DEFAULT_TARGET_DIMENSION),
            tick_interval: Duration::from_millis(DEFAULT_TICK_INTERVAL_MS),
            restore_delay_ticks: DEFAULT_RESTORE_DELAY_TICKS,
            dedup_radius: DEFAULT_DEDUP_RADIUS,
            purge_radius: DEFAULT_PURGE_RADIUS,
            purge_escalated_radius: DEFAULT_PURGE_ESCALATED_RADIUS,
            max_pending_restorations: DEFAULT_MAX_PENDING_RESTORATIONS,
            reschedule_policy: ReschedulePolicy::default(),
            record_codec: RecordCodec::default(),
        }
    }
}

impl GatewayConfig {
    /// `world_gateway.toml` in the working directory, else the environment.
    pub fn from_default_sources() -> Result<Self, GatewayConfigError> {
        Self::from_default_sources_in(Path::new("."))
    }

    pub fn from_default_sources_in(dir: &Path) -> Result<Self, GatewayConfigError> {
        let config_path = dir.join(DEFAULT_CONFIG_FILE_NAME);
        if config_path.exists() {
            return Self::from_config_file(&config_path);
        }
        Self::from_env()
    }

    /// TOML keys use the environment variable names; missing keys fall back
    /// to the environment, then to defaults.
    pub fn from_config_file(path: &Path) -> Result<Self, GatewayConfigError> {
        let content = fs::read_to_string(path).map_err(|err| GatewayConfigError::ReadConfigFile {
            path: path.display().to_string(),
            message: err.to_string(),
        })?;
        let value: toml::Value =
            toml::from_str(&content).map_err(|err| GatewayConfigError::ParseConfigFile {
                path: path.display().to_string(),
                message: err.to_string(),
            })?;
        let table = value
            .as_table()
            .ok_or_else(|| GatewayConfigError::ParseConfigFile {
                path: path.display().to_string(),
                message: "root is not a TOML table".to_string(),
            })?;

        Self::from_env_with(|key| {
            table
                .get(key)
                .and_then(toml_value_to_string)
                .or_else(|| std::env::var(key).ok())
        })
    }

    pub fn from_env() -> Result<Self, GatewayConfigError> {
        Self::from_env_with(|key| std::env::var(key).ok())
    }

    pub fn from_env_with<F>(mut getter: F) -> Result<Self, GatewayConfigError>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let target_dimension = match non_blank(getter(ENV_TARGET_DIMENSION)) {
            Some(value) => DimensionId::new(value.clone()).map_err(|_| {
                GatewayConfigError::InvalidValue {
                    key: ENV_TARGET_DIMENSION.to_string(),
                    value,
                }
            })?,
            None => defaults.target_dimension,
        };
        let tick_interval_ms: u64 =
            parse_or(&mut getter, ENV_TICK_INTERVAL_MS, DEFAULT_TICK_INTERVAL_MS)?;
        let config = Self {
            target_dimension,
            tick_interval: Duration::from_millis(tick_interval_ms),
            restore_delay_ticks: parse_or(
                &mut getter,
                ENV_RESTORE_DELAY_TICKS,
                DEFAULT_RESTORE_DELAY_TICKS,
            )?,
            dedup_radius: parse_or(&mut getter, ENV_DEDUP_RADIUS, DEFAULT_DEDUP_RADIUS)?,
            purge_radius: parse_or(&mut getter, ENV_PURGE_RADIUS, DEFAULT_PURGE_RADIUS)?,
            purge_escalated_radius: parse_or(
                &mut getter,
                ENV_PURGE_ESCALATED_RADIUS,
                DEFAULT_PURGE_ESCALATED_RADIUS,
            )?,
            max_pending_restorations: parse_or(
                &mut getter,
                ENV_MAX_PENDING_RESTORATIONS,
                DEFAULT_MAX_PENDING_RESTORATIONS,
            )?,
            reschedule_policy: parse_or(
                &mut getter,
                ENV_RESCHEDULE_POLICY,
                defaults.reschedule_policy,
            )?,
            record_codec: parse_or(&mut getter, ENV_RECORD_CODEC, defaults.record_codec)?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), GatewayConfigError> {
        if self.tick_interval.is_zero() {
            return Err(invalid(ENV_TICK_INTERVAL_MS, "0"));
        }
        if self.restore_delay_ticks == 0 {
            return Err(invalid(ENV_RESTORE_DELAY_TICKS, "0"));
        }
        if self.max_pending_restorations == 0 {
            return Err(invalid(ENV_MAX_PENDING_RESTORATIONS, "0"));
        }
        for (key, radius) in [
            (ENV_DEDUP_RADIUS, self.dedup_radius),
            (ENV_PURGE_RADIUS, self.purge_radius),
            (ENV_PURGE_ESCALATED_RADIUS, self.purge_escalated_radius),
        ] {
            if radius < 0 {
                return Err(invalid(key, &radius.to_string()));
            }
        }
        if self.purge_escalated_radius < self.purge_radius {
            return Err(invalid(
                ENV_PURGE_ESCALATED_RADIUS,
                &self.purge_escalated_radius.to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayConfigError {
    ReadConfigFile { path: String, message: String },
    ParseConfigFile { path: String, message: String },
    InvalidValue { key: String, value: String },
}

impl fmt::Display for GatewayConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GatewayConfigError::ReadConfigFile { path, message } => {
                write!(f, "failed to read config file {path}: {message}")
            }
            GatewayConfigError::ParseConfigFile { path, message } => {
                write!(f, "failed to parse config file {path}: {message}")
            }
            GatewayConfigError::InvalidValue { key, value } => {
                write!(f, "invalid value for {key}: {value}")
            }
        }
    }
}

impl std::error::Error for GatewayConfigError {}

fn invalid(key: &str, value: &str) -> GatewayConfigError {
    GatewayConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty())
}

fn parse_or<F, T>(getter: &mut F, key: &str, default: T) -> Result<T, GatewayConfigError>
where
    F: FnMut(&str) -> Option<String>,
    T: FromStr,
{
    match non_blank(getter(key)) {
        Some(value) => value.trim().parse::<T>().map_err(|_| invalid(key, &value)),
        None => Ok(default),
    }
}

fn toml_value_to_string(value: &toml::Value) -> Option<String> {
    match value {
        toml::Value::String(value) => Some(value.clone()),
        toml::Value::Integer(value) => Some(value.to_string()),
        toml::Value::Float(value) => Some(value.to_string()),
        toml::Value::Boolean(value) => Some(value.to_string()),
        _ => None,
    }
}
