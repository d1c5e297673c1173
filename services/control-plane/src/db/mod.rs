//! Postgres persistence for the tenant registry.
//!
//! The only table is `tenants`; [`Database`] owns the pool and hands out
//! [`PgTenantRegistry`] handles over it. Migrations are plain `.sql` files
//! read at runtime, so no database is needed to build the crate.

mod error;
mod tenants;

pub use error::DbError;
pub use tenants::PgTenantRegistry;

use std::path::PathBuf;
use std::time::Duration;

use sqlx::migrate::Migrator;
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{debug, info};

const DEFAULT_DATABASE_URL: &str = "postgres://localhost/tenantry";

/// Pool settings for the registry database.
#[derive(Debug, Clone)]
pub struct DbConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
    pub max_lifetime: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            max_connections: 10,
            min_connections: 1,
            acquire_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(600),
            max_lifetime: Duration::from_secs(1800),
        }
    }
}

impl DbConfig {
    /// Read `DATABASE_URL`, `DB_MAX_CONNECTIONS` and `DB_MIN_CONNECTIONS`.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let count = |name: &str, fallback: u32| {
            std::env::var(name)
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(fallback)
        };

        Self {
            database_url: std::env::var("DATABASE_URL").unwrap_or(defaults.database_url),
            max_connections: count("DB_MAX_CONNECTIONS", defaults.max_connections),
            min_connections: count("DB_MIN_CONNECTIONS", defaults.min_connections),
            ..Self::default()
        }
    }
}

/// Registry database handle.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub async fn connect(config: &DbConfig) -> Result<Self, DbError> {
        info!(
            max_connections = config.max_connections,
            min_connections = config.min_connections,
            "Connecting to registry database"
        );

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.acquire_timeout)
            .idle_timeout(Some(config.idle_timeout))
            .max_lifetime(Some(config.max_lifetime))
            .connect(&config.database_url)
            .await
            .map_err(DbError::Connect)?;

        Ok(Self { pool })
    }

    /// Apply the `tenants` schema.
    ///
    /// The binary may run from the workspace root or the crate directory, so
    /// the migrations directory is looked up in both before falling back to
    /// the path baked in at build time.
    pub async fn run_migrations(&self) -> Result<(), DbError> {
        let candidates = [
            PathBuf::from("./migrations"),
            PathBuf::from("services/control-plane/migrations"),
            PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("migrations"),
        ];

        let mut last_error = None;
        for dir in &candidates {
            match Migrator::new(dir.clone()).await {
                Ok(migrator) => {
                    info!(migrations_dir = %dir.display(), "Applying tenant registry migrations");
                    return migrator.run(&self.pool).await.map_err(DbError::Migration);
                }
                Err(e) => {
                    debug!(migrations_dir = %dir.display(), error = %e, "No migrations here");
                    last_error = Some(e.to_string());
                }
            }
        }

        Err(DbError::MigrationDirNotFound {
            tried: candidates
                .iter()
                .map(|dir| dir.display().to_string())
                .collect::<Vec<_>>()
                .join(", "),
            last_error: last_error.unwrap_or_else(|| "unknown error".to_string()),
        })
    }

    pub fn tenant_registry(&self) -> PgTenantRegistry {
        PgTenantRegistry::new(self.clone())
    }

    fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn health_check(&self) -> Result<(), DbError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(DbError::Query)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_db_config_defaults() {
        let config = DbConfig::default();
        assert_eq!(config.database_url, DEFAULT_DATABASE_URL);
        assert_eq!(config.max_connections, 10);
        assert_eq!(config.min_connections, 1);
    }
}
