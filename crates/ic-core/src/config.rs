//! Emulator configuration

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Log verbosity levels selectable from the config file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

/// How PPU code is executed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PpuTranslator {
    /// Interpret every instruction
    Interpreter,
    /// Recompile basic blocks to host code, falling back to the
    /// interpreter for unsupported shapes
    #[default]
    Recompiler,
}

/// Emulated firmware revision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FirmwareKind {
    /// Retail firmware
    #[default]
    Cex,
    /// Developer firmware
    Dex,
    /// Debug firmware
    Decr,
}

/// CPU settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CpuConfig {
    pub translator: PpuTranslator,
}

/// Kernel emulation settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct KernelConfig {
    pub firmware: FirmwareKind,
}

/// Debugging and logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebugConfig {
    pub log_level: LogLevel,
    pub log_to_file: bool,
    pub log_path: PathBuf,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            log_level: LogLevel::default(),
            log_to_file: false,
            log_path: PathBuf::from("ironcell.log"),
        }
    }
}

/// Emulator configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub cpu: CpuConfig,
    pub kernel: KernelConfig,
    pub debug: DebugConfig,
}

impl Config {
    /// Path of the per-user config file
    pub fn path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("ironcell").join("config.toml"))
    }

    /// Load the config file, or report why it could not be read
    pub fn load() -> crate::Result<Self> {
        let Some(path) = Self::path() else {
            return Ok(Self::default());
        };
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(&path)?;
        toml::from_str(&text).map_err(|e| crate::CoreError::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.cpu.translator, PpuTranslator::Recompiler);
        assert_eq!(config.kernel.firmware, FirmwareKind::Cex);
        assert!(!config.debug.log_to_file);
    }

    #[test]
    fn test_config_roundtrip() {
        let config = Config::default();
        let text = toml::to_string(&config).unwrap();
        let parsed: Config = toml::from_str(&text).unwrap();
        assert_eq!(parsed.cpu.translator, config.cpu.translator);
    }

    #[test]
    fn test_partial_config_file() {
        let parsed: Config = toml::from_str("[cpu]\ntranslator = \"interpreter\"\n").unwrap();
        assert_eq!(parsed.cpu.translator, PpuTranslator::Interpreter);
        assert_eq!(parsed.kernel.firmware, FirmwareKind::Cex);
    }
}
