use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{VaultError, VaultResult};

/// Size of the hardware unique ID in bytes
pub const HARDWARE_ID_LEN: usize = 16;

/// Hardware ID used when the config does not pin one.
pub const DEFAULT_HARDWARE_ID: [u8; HARDWARE_ID_LEN] = [
    0x52, 0x56, 0x00, 0x01, 0x33, 0x37, 0x41, 0x10, 0x20, 0x30, 0x40, 0x50, 0x60, 0x70, 0x80, 0x90,
];

/// Top-level configuration (loaded from radvault.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    pub device: DeviceConfig,
    pub security: SecurityConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Hardware unique ID as 32 hex characters
    pub cpu_id: Option<String>,
    /// File backing the emulated SPI flash
    pub flash_image: PathBuf,
    /// Emulated flash size in bytes (default: 2 MiB)
    pub flash_size: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// KDF stretching iterations for new passcodes (default: 8192)
    pub kdf_iterations: u32,
    /// Failed-attempt limit when none is stored (default: 10)
    pub default_max_tries: u8,
    /// Lower clamp for a user-chosen attempt limit
    pub min_max_tries: u8,
    /// Upper clamp for a user-chosen attempt limit
    pub max_max_tries: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            cpu_id: None,
            flash_image: PathBuf::from("radvault-flash.bin"),
            flash_size: 0x20_0000,
        }
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            kdf_iterations: 8192,
            default_max_tries: 10,
            min_max_tries: 3,
            max_max_tries: 50,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl VaultConfig {
    /// Load from `path`, falling back to defaults when the file is absent.
    pub fn load(path: &Path) -> VaultResult<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| VaultError::Config(format!("parsing {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> VaultResult<()> {
        let s = &self.security;
        if s.kdf_iterations == 0 {
            return Err(VaultError::Config("kdf_iterations must be non-zero".into()));
        }
        if s.min_max_tries == 0 || s.min_max_tries > s.max_max_tries {
            return Err(VaultError::Config(format!(
                "invalid attempt limit range {}..={}",
                s.min_max_tries, s.max_max_tries
            )));
        }
        if !(s.min_max_tries..=s.max_max_tries).contains(&s.default_max_tries) {
            return Err(VaultError::Config(format!(
                "default_max_tries {} outside {}..={}",
                s.default_max_tries, s.min_max_tries, s.max_max_tries
            )));
        }
        self.device.hardware_id()?;
        Ok(())
    }
}

impl DeviceConfig {
    /// Decode the configured hardware ID, or the built-in default.
    pub fn hardware_id(&self) -> VaultResult<[u8; HARDWARE_ID_LEN]> {
        let Some(hex) = self.cpu_id.as_deref() else {
            return Ok(DEFAULT_HARDWARE_ID);
        };
        let hex = hex.trim();
        if hex.len() != HARDWARE_ID_LEN * 2 || !hex.is_ascii() {
            return Err(VaultError::Config(format!(
                "cpu_id must be {} hex characters",
                HARDWARE_ID_LEN * 2
            )));
        }
        let mut id = [0u8; HARDWARE_ID_LEN];
        for (i, byte) in id.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16)
                .map_err(|e| VaultError::Config(format!("cpu_id: {e}")))?;
        }
        Ok(id)
    }
}
