//! Configuration management
//!
//! Config file is stored next to the executable as `gateway.toml`,
//! falling back to `config/default.toml`. Every section has defaults so a
//! missing or partial file still yields a runnable configuration; the schema
//! file itself is loaded separately (see `schema::TomlSchemaSource`).

use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::constants::{
    DEFAULT_AUTOSAVE_SECS, DEFAULT_BOARD_TCP_PORT, DEFAULT_DUMP_SIZE, DEFAULT_MTU,
    DEFAULT_ROW_SIZE, DEFAULT_SNIFFER_PORT,
};
use crate::error::{GatewayError, Result};

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Path to the exported packet schema
    pub schema_path: PathBuf,
    pub vehicle: VehicleConfig,
    pub logger: LoggerConfig,
}

// =============================================================================
// Vehicle
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VehicleConfig {
    /// Local address the pipes bind before dialing out
    pub local_ip: String,
    /// TCP port every board listens on
    pub board_port: u16,
    /// Read buffer size per TCP read
    pub mtu: usize,
    pub sniffer: SnifferConfig,
}

impl Default for VehicleConfig {
    fn default() -> Self {
        Self {
            local_ip: "0.0.0.0".to_string(),
            board_port: DEFAULT_BOARD_TCP_PORT,
            mtu: DEFAULT_MTU,
            sniffer: SnifferConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SnifferConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for SnifferConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: DEFAULT_SNIFFER_PORT,
        }
    }
}

// =============================================================================
// Logger
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggerConfig {
    /// Bytes buffered per field before a forced dump
    pub dump_size: u64,
    /// Estimated bytes per CSV row
    pub row_size: u64,
    /// Autosave flush interval (seconds)
    pub autosave_secs: u64,
    /// Base directory for session CSV files
    pub path: PathBuf,
    /// Topic the console uses to request enable/disable
    pub enable_topic: String,
    /// Topic session-state transitions are published on
    pub state_topic: String,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            dump_size: DEFAULT_DUMP_SIZE,
            row_size: DEFAULT_ROW_SIZE,
            autosave_secs: DEFAULT_AUTOSAVE_SECS,
            path: PathBuf::from("sessions"),
            enable_topic: "logger/enable".to_string(),
            state_topic: "logger/state".to_string(),
        }
    }
}

impl LoggerConfig {
    /// Buffered rows per field that force a dump
    pub fn dump_threshold(&self) -> usize {
        (self.dump_size / self.row_size.max(1)) as usize
    }
}

// =============================================================================
// Loading
// =============================================================================

/// Get the project root directory
///
/// Searches in order:
/// 1. Next to executable (production deployment)
/// 2. Up from target/release or target/debug (dev builds)
fn find_project_root() -> Result<PathBuf> {
    let exe = std::env::current_exe().map_err(|e| GatewayError::ConfigRead {
        path: PathBuf::from("executable"),
        source: e,
    })?;
    let exe_dir = exe.parent().ok_or_else(|| GatewayError::ConfigValidation {
        field: "exe_path",
        reason: "no parent directory".into(),
    })?;

    // Check if config exists next to executable (production)
    if exe_dir.join("gateway.toml").exists() || exe_dir.join("config").exists() {
        return Ok(exe_dir.to_path_buf());
    }

    // Check if we're in target/release or target/debug (dev)
    if let Some(target_dir) = exe_dir.parent() {
        if target_dir
            .file_name()
            .map(|n| n == "target")
            .unwrap_or(false)
        {
            if let Some(project_root) = target_dir.parent() {
                if project_root.join("config").exists() {
                    return Ok(project_root.to_path_buf());
                }
            }
        }
    }

    Ok(exe_dir.to_path_buf())
}

/// Get the config file path
///
/// Looks for gateway.toml, falls back to config/default.toml
pub fn config_path() -> Result<PathBuf> {
    let root = find_project_root()?;

    let user_config = root.join("gateway.toml");
    if user_config.exists() {
        return Ok(user_config);
    }

    let default_config = root.join("config").join("default.toml");
    if default_config.exists() {
        return Ok(default_config);
    }

    Ok(user_config)
}

/// Load config from file, or fall back to defaults
pub fn load() -> GatewayConfig {
    let path = match config_path() {
        Ok(p) => p,
        Err(e) => {
            warn!("Failed to determine config path: {}, using defaults", e);
            return GatewayConfig::default();
        }
    };

    if !path.exists() {
        return GatewayConfig::default();
    }

    match fs::read_to_string(&path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => config,
            Err(e) => {
                warn!("Config parse error in {:?}: {}, using defaults", path, e);
                GatewayConfig::default()
            }
        },
        Err(e) => {
            warn!("Failed to read config {:?}: {}, using defaults", path, e);
            GatewayConfig::default()
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_vehicle_config_values() {
        let config = VehicleConfig::default();
        assert_eq!(config.local_ip, "0.0.0.0");
        assert_eq!(config.board_port, DEFAULT_BOARD_TCP_PORT);
        assert_eq!(config.mtu, DEFAULT_MTU);
        assert!(!config.sniffer.enabled);
    }

    #[test]
    fn test_default_logger_threshold() {
        let config = LoggerConfig::default();
        assert_eq!(
            config.dump_threshold() as u64,
            DEFAULT_DUMP_SIZE / DEFAULT_ROW_SIZE
        );
    }

    #[test]
    fn test_zero_row_size_does_not_divide_by_zero() {
        let config = LoggerConfig {
            row_size: 0,
            ..LoggerConfig::default()
        };
        assert_eq!(config.dump_threshold() as u64, DEFAULT_DUMP_SIZE);
    }

    #[test]
    fn test_config_empty_file_uses_defaults() {
        let config: GatewayConfig = toml::from_str("").unwrap();
        assert_eq!(config.vehicle.board_port, DEFAULT_BOARD_TCP_PORT);
        assert_eq!(config.logger.autosave_secs, DEFAULT_AUTOSAVE_SECS);
        assert_eq!(config.logger.path, PathBuf::from("sessions"));
    }

    #[test]
    fn test_config_partial_sections_keep_defaults() {
        let partial = r#"
schema_path = "boards.toml"

[vehicle]
local_ip = "192.168.0.9"

[logger]
dump_size = 1024
"#;
        let config: GatewayConfig = toml::from_str(partial).unwrap();
        assert_eq!(config.schema_path, PathBuf::from("boards.toml"));
        assert_eq!(config.vehicle.local_ip, "192.168.0.9");
        assert_eq!(config.vehicle.board_port, DEFAULT_BOARD_TCP_PORT);
        assert_eq!(config.logger.dump_size, 1024);
        assert_eq!(config.logger.row_size, DEFAULT_ROW_SIZE);
    }

    #[test]
    fn test_config_serialize_deserialize_roundtrip() {
        let config = GatewayConfig {
            schema_path: PathBuf::from("schema.toml"),
            vehicle: VehicleConfig {
                local_ip: "10.0.0.1".to_string(),
                board_port: 7700,
                mtu: 512,
                sniffer: SnifferConfig {
                    enabled: true,
                    port: 7701,
                },
            },
            logger: LoggerConfig {
                dump_size: 2048,
                row_size: 16,
                autosave_secs: 5,
                path: PathBuf::from("/var/log/pod"),
                enable_topic: "log/on".to_string(),
                state_topic: "log/running".to_string(),
            },
        };

        let toml_str = toml::to_string_pretty(&config).unwrap();
        let restored: GatewayConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(restored.vehicle.local_ip, "10.0.0.1");
        assert_eq!(restored.vehicle.board_port, 7700);
        assert!(restored.vehicle.sniffer.enabled);
        assert_eq!(restored.logger.dump_size, 2048);
        assert_eq!(restored.logger.dump_threshold(), 128);
        assert_eq!(restored.logger.state_topic, "log/running");
    }
}
