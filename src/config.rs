//! Process configuration (environment / `.env`) and the site settings
//! persisted in storage.

use serde::{Deserialize, Serialize};
use std::env;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

use crate::storage::{Storage, StorageError};

pub const SYSTEM_CONFIG_KEY: &str = "systemConfig";
pub const IMAGE_SETTINGS_KEY: &str = "imageManagementSettings";

pub const DATA_PATH_ENV_VAR: &str = "SITE_DATA_PATH";
pub const BIND_ENV_VAR: &str = "SITE_BIND";
pub const JWT_SECRET_ENV_VAR: &str = "SITE_JWT_SECRET";
pub const GEO_FALLBACK_ENV_VAR: &str = "SITE_GEO_FALLBACK";
pub const GEO_LOOKUP_URL_ENV_VAR: &str = "SITE_GEO_LOOKUP_URL";
pub const GEO_TIMEOUT_ENV_VAR: &str = "SITE_GEO_TIMEOUT_MS";
pub const ADMIN_EMAIL_ENV_VAR: &str = "SITE_ADMIN_EMAIL";
pub const ADMIN_PASSWORD_ENV_VAR: &str = "SITE_ADMIN_PASSWORD";
pub const LOG_ENV_VAR: &str = "SITE_LOG";
pub const LOG_JSON_ENV_VAR: &str = "SITE_LOG_JSON";
pub const LOG_DIR_ENV_VAR: &str = "SITE_LOG_DIR";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: '{value}'")]
    Invalid { var: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub data_path: String,
    pub bind: SocketAddr,
    pub jwt_secret: String,
    pub geo_fallback: bool,
    /// Empty disables the external lookup.
    pub geo_lookup_url: String,
    pub geo_timeout: Duration,
    pub admin_email: String,
    pub admin_password: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_path: "site_data".to_string(),
            bind: SocketAddr::from(([0, 0, 0, 0], 11111)),
            jwt_secret: "change-me-in-production".to_string(),
            geo_fallback: true,
            geo_lookup_url: "http://ip-api.com/json".to_string(),
            geo_timeout: Duration::from_millis(3000),
            admin_email: "admin@infetech.com".to_string(),
            admin_password: "admin123".to_string(),
        }
    }
}

impl AppConfig {
    /// Load `.env` (if present) and read the `SITE_*` variables over the defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|var| env::var(var).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(path) = lookup(DATA_PATH_ENV_VAR) {
            config.data_path = path;
        }
        if let Some(bind) = lookup(BIND_ENV_VAR) {
            config.bind = bind.parse().map_err(|_| ConfigError::Invalid {
                var: BIND_ENV_VAR,
                value: bind.clone(),
            })?;
        }
        match lookup(JWT_SECRET_ENV_VAR) {
            Some(secret) if !secret.is_empty() => config.jwt_secret = secret,
            _ => warn!("{} not set, using the built-in development secret", JWT_SECRET_ENV_VAR),
        }
        if let Some(flag) = lookup(GEO_FALLBACK_ENV_VAR) {
            config.geo_fallback = parse_bool(GEO_FALLBACK_ENV_VAR, &flag)?;
        }
        if let Some(url) = lookup(GEO_LOOKUP_URL_ENV_VAR) {
            config.geo_lookup_url = url;
        }
        if let Some(ms) = lookup(GEO_TIMEOUT_ENV_VAR) {
            let ms: u64 = ms.parse().map_err(|_| ConfigError::Invalid {
                var: GEO_TIMEOUT_ENV_VAR,
                value: ms.clone(),
            })?;
            config.geo_timeout = Duration::from_millis(ms);
        }
        if let Some(email) = lookup(ADMIN_EMAIL_ENV_VAR) {
            config.admin_email = email;
        }
        if let Some(password) = lookup(ADMIN_PASSWORD_ENV_VAR) {
            config.admin_password = password;
        }
        Ok(config)
    }
}

fn parse_bool(var: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            var,
            value: value.to_string(),
        }),
    }
}

/// Site-wide settings editable from the admin screen.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct SystemConfig {
    pub site_name: String,
    pub default_service: String,
    pub contact_email: String,
    /// Public routes answer 503 while set.
    pub maintenance_mode: bool,
    pub analytics_enabled: bool,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            site_name: "Infetech".to_string(),
            default_service: "SEO".to_string(),
            contact_email: "hello@infetech.com".to_string(),
            maintenance_mode: false,
            analytics_enabled: true,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ImageSettings {
    pub max_upload_bytes: u64,
    pub allowed_extensions: Vec<String>,
    pub default_category: String,
}

impl Default for ImageSettings {
    fn default() -> Self {
        Self {
            max_upload_bytes: 5 * 1024 * 1024,
            allowed_extensions: ["jpg", "jpeg", "png", "webp", "gif", "svg"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            default_category: "general".to_string(),
        }
    }
}

impl ImageSettings {
    pub fn allows(&self, extension: &str) -> bool {
        let extension = extension.to_lowercase();
        self.allowed_extensions.iter().any(|e| *e == extension)
    }
}

/// Stored settings, or defaults when missing or unreadable.
pub fn load_system_config(storage: &Storage) -> SystemConfig {
    load_or_default(storage, SYSTEM_CONFIG_KEY)
}

pub fn save_system_config(storage: &Storage, config: &SystemConfig) -> Result<(), StorageError> {
    storage.set_json(SYSTEM_CONFIG_KEY, config)
}

pub fn load_image_settings(storage: &Storage) -> ImageSettings {
    load_or_default(storage, IMAGE_SETTINGS_KEY)
}

pub fn save_image_settings(storage: &Storage, settings: &ImageSettings) -> Result<(), StorageError> {
    storage.set_json(IMAGE_SETTINGS_KEY, settings)
}

fn load_or_default<T: Default + serde::de::DeserializeOwned>(storage: &Storage, key: &str) -> T {
    match storage.get_json(key) {
        Ok(Some(value)) => value,
        Ok(None) => T::default(),
        Err(e) => {
            warn!(key, error = %e, "unreadable settings, using defaults");
            T::default()
        }
    }
}
