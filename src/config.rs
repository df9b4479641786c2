//! Process configuration, read from the environment at startup.

use crate::crypto::EncryptionKey;
use crate::error::NutgrafError;
use std::env;
use std::net::IpAddr;
use tracing::info;

pub const DEFAULT_ADDR: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8000;

pub struct AppConfig {
    pub address: IpAddr,
    pub port: u16,
    pub encryption_key: EncryptionKey,
}

impl AppConfig {
    /// Read `NUTGRAF_ADDR`, `NUTGRAF_PORT` and `NUTGRAF_ENCRYPTION_KEY`.
    /// A missing encryption key falls back to an ephemeral one; malformed
    /// values are configuration errors, never silent defaults.
    pub fn from_env() -> Result<Self, NutgrafError> {
        let address = match env::var("NUTGRAF_ADDR") {
            Ok(raw) => raw.parse::<IpAddr>().map_err(|_| {
                NutgrafError::ConfigurationError(format!("Invalid NUTGRAF_ADDR: {}", raw))
            })?,
            Err(_) => DEFAULT_ADDR.parse().expect("default address is valid"),
        };

        let port = match env::var("NUTGRAF_PORT") {
            Ok(raw) => raw.parse::<u16>().map_err(|_| {
                NutgrafError::ConfigurationError(format!("Invalid NUTGRAF_PORT: {}", raw))
            })?,
            Err(_) => DEFAULT_PORT,
        };

        let encryption_key = match env::var("NUTGRAF_ENCRYPTION_KEY") {
            Ok(encoded) => {
                let key = EncryptionKey::from_base64(&encoded)?;
                info!("loaded encryption key from environment");
                key
            }
            Err(_) => EncryptionKey::generate(),
        };

        Ok(Self {
            address,
            port,
            encryption_key,
        })
    }
}
