use std::net::SocketAddr;

use anyhow::{bail, Result};

use crate::db::DbConfig;
use crate::provisioning::ProvisioningConfig;
use crate::runtime::RuntimeConfig;

/// Which tenant registry backend to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryBackend {
    Postgres,
    /// In-process, lost on restart. Local development only.
    Memory,
}

impl RegistryBackend {
    fn parse(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "postgres" | "pg" => Ok(Self::Postgres),
            "memory" => Ok(Self::Memory),
            other => bail!("unknown TENANTRY_REGISTRY backend '{other}' (expected postgres or memory)"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: SocketAddr,
    pub log_level: String,
    pub dev_mode: bool,
    pub registry: RegistryBackend,
    pub database: DbConfig,
    pub runtime: RuntimeConfig,
    pub provisioning: ProvisioningConfig,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let listen_addr = std::env::var("TENANTRY_LISTEN_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:8080".to_string())
            .parse()?;

        let log_level = std::env::var("TENANTRY_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let dev_mode = std::env::var("TENANTRY_DEV")
            .map(|v| v == "1" || v.to_lowercase() == "true")
            .unwrap_or(false);

        let registry = match std::env::var("TENANTRY_REGISTRY") {
            Ok(value) => RegistryBackend::parse(&value)?,
            Err(_) => RegistryBackend::Postgres,
        };

        Ok(Self {
            listen_addr,
            log_level,
            dev_mode,
            registry,
            database: DbConfig::from_env(),
            runtime: RuntimeConfig::from_env(),
            provisioning: ProvisioningConfig::from_env(),
        })
    }
}
