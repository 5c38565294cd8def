//! Store configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! - `CSV_PRODUCTS_PATH` - products file (default: `./data/products.csv`)
//! - `CSV_ORDERS_PATH` - order ledger (default: `./data/orders.csv`)
//! - `BACKUP_DIR` - backup directory (default: `./data/backups`)
//! - `GOODS_IMAGE_DIR` - product image directory (default: `./static/img/goods`)
//! - `ORDER_ENCRYPTION` - `on` or `off` (default: `on`)
//! - `DATA_ENCRYPTION_KEY` - master secret, required while encryption is on
//! - `ENCRYPTION_SALT` - key derivation salt (default: `default_salt_change_me`)
//! - `ORDER_RETENTION_MIN_DAYS` - smallest age accepted by cleanup (default: 30)
//! - `FLATSHOP_PORT` - daemon listen port (default: 7101)

use std::path::{Path, PathBuf};

use log::warn;
use secrecy::SecretString;
use thiserror::Error;

use crate::engine::ledger::DEFAULT_RETENTION_MIN_DAYS;

pub const DEFAULT_SALT: &str = "default_salt_change_me";
pub const DEFAULT_PORT: u16 = 7101;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
}

/// Key material for the order ledger cipher.
///
/// Implements `Debug` manually to redact the master secret.
#[derive(Clone)]
pub struct EncryptionConfig {
    pub master_secret: SecretString,
    pub salt: String,
}

impl std::fmt::Debug for EncryptionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionConfig")
            .field("master_secret", &"[REDACTED]")
            .field("salt", &self.salt)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub products_path: PathBuf,
    pub orders_path: PathBuf,
    pub backup_dir: PathBuf,
    pub image_dir: PathBuf,
    /// `None` stores order fields in clear text.
    pub encryption: Option<EncryptionConfig>,
    pub retention_min_days: u32,
    pub port: u16,
}

impl StoreConfig {
    /// Loads configuration from the process environment, reading `.env` first
    /// if present.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration through `lookup`, which returns the raw value of a
    /// variable if set.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let env_or = |key: &str, default: &str| env(key).unwrap_or_else(|| default.to_string());

        let encryption = match env_or("ORDER_ENCRYPTION", "on").to_ascii_lowercase().as_str() {
            "on" | "true" | "1" | "yes" => {
                let master_secret = env("DATA_ENCRYPTION_KEY")
                    .ok_or_else(|| ConfigError::MissingEnvVar("DATA_ENCRYPTION_KEY".to_string()))?;
                let salt = env_or("ENCRYPTION_SALT", DEFAULT_SALT);
                if salt == DEFAULT_SALT {
                    warn!("ENCRYPTION_SALT is not set; using the built-in default salt");
                }
                Some(EncryptionConfig {
                    master_secret: SecretString::from(master_secret),
                    salt,
                })
            }
            "off" | "false" | "0" | "no" => None,
            other => {
                return Err(ConfigError::InvalidEnvVar(
                    "ORDER_ENCRYPTION".to_string(),
                    format!("expected on or off, got '{}'", other),
                ))
            }
        };

        let retention_min_days = env_or("ORDER_RETENTION_MIN_DAYS", &DEFAULT_RETENTION_MIN_DAYS.to_string())
            .parse::<u32>()
            .map_err(|e| ConfigError::InvalidEnvVar("ORDER_RETENTION_MIN_DAYS".to_string(), e.to_string()))?;
        let port = env_or("FLATSHOP_PORT", &DEFAULT_PORT.to_string())
            .parse::<u16>()
            .map_err(|e| ConfigError::InvalidEnvVar("FLATSHOP_PORT".to_string(), e.to_string()))?;

        Ok(Self {
            products_path: env_or("CSV_PRODUCTS_PATH", "./data/products.csv").into(),
            orders_path: env_or("CSV_ORDERS_PATH", "./data/orders.csv").into(),
            backup_dir: env_or("BACKUP_DIR", "./data/backups").into(),
            image_dir: env_or("GOODS_IMAGE_DIR", "./static/img/goods").into(),
            encryption,
            retention_min_days,
            port,
        })
    }

    /// A configuration with every file under `dir` and encryption off.
    pub fn in_dir<P: AsRef<Path>>(dir: P) -> Self {
        let dir = dir.as_ref();
        Self {
            products_path: dir.join("products.csv"),
            orders_path: dir.join("orders.csv"),
            backup_dir: dir.join("backups"),
            image_dir: dir.join("img"),
            encryption: None,
            retention_min_days: DEFAULT_RETENTION_MIN_DAYS,
            port: DEFAULT_PORT,
        }
    }

    pub fn with_encryption(mut self, master_secret: &str, salt: &str) -> Self {
        self.encryption = Some(EncryptionConfig {
            master_secret: SecretString::from(master_secret.to_string()),
            salt: salt.to_string(),
        });
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<StoreConfig, ConfigError> {
        let vars: HashMap<String, String> =
            vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        StoreConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[("DATA_ENCRYPTION_KEY", "master")]).unwrap();
        assert_eq!(config.products_path, PathBuf::from("./data/products.csv"));
        assert_eq!(config.orders_path, PathBuf::from("./data/orders.csv"));
        assert_eq!(config.backup_dir, PathBuf::from("./data/backups"));
        assert_eq!(config.retention_min_days, 30);
        assert_eq!(config.port, 7101);
        let encryption = config.encryption.unwrap();
        assert_eq!(encryption.master_secret.expose_secret(), "master");
        assert_eq!(encryption.salt, DEFAULT_SALT);
    }

    #[test]
    fn test_encryption_requires_key() {
        assert!(matches!(load(&[]), Err(ConfigError::MissingEnvVar(k)) if k == "DATA_ENCRYPTION_KEY"));
        assert!(matches!(
            load(&[("DATA_ENCRYPTION_KEY", "  ")]),
            Err(ConfigError::MissingEnvVar(_))
        ));
        let config = load(&[("ORDER_ENCRYPTION", "off")]).unwrap();
        assert!(config.encryption.is_none());
    }

    #[test]
    fn test_invalid_values() {
        assert!(matches!(
            load(&[("ORDER_ENCRYPTION", "maybe")]),
            Err(ConfigError::InvalidEnvVar(k, _)) if k == "ORDER_ENCRYPTION"
        ));
        assert!(matches!(
            load(&[("ORDER_ENCRYPTION", "off"), ("FLATSHOP_PORT", "99999")]),
            Err(ConfigError::InvalidEnvVar(k, _)) if k == "FLATSHOP_PORT"
        ));
        assert!(matches!(
            load(&[("ORDER_ENCRYPTION", "off"), ("ORDER_RETENTION_MIN_DAYS", "-3")]),
            Err(ConfigError::InvalidEnvVar(k, _)) if k == "ORDER_RETENTION_MIN_DAYS"
        ));
    }

    #[test]
    fn test_debug_redacts_secret() {
        let config = StoreConfig::in_dir("/tmp/shop").with_encryption("super-secret-key", "pepper");
        let debug = format!("{:?}", config);
        assert!(!debug.contains("super-secret-key"));
        assert!(debug.contains("[REDACTED]"));
        assert_eq!(config.orders_path, PathBuf::from("/tmp/shop/orders.csv"));
    }
}
