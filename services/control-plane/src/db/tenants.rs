//! Postgres-backed tenant registry.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tenantry_id::TenantId;
use tracing::{debug, info};

use super::{Database, DbError};
use crate::registry::{NewTenant, ProvisioningState, RegistryError, Tenant, TenantRegistry};

const TENANT_COLUMNS: &str = "id, name, email, phone, username, company_name, subdomain, \
                              credentials_ref, provisioning_state, created_at";

/// Tenant registry stored in the `tenants` table.
#[derive(Clone)]
pub struct PgTenantRegistry {
    db: Database,
}

impl PgTenantRegistry {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

struct TenantRow {
    id: i64,
    name: String,
    email: String,
    phone: String,
    username: String,
    company_name: String,
    subdomain: String,
    credentials_ref: String,
    provisioning_state: String,
    created_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for TenantRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        Ok(Self {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            email: row.try_get("email")?,
            phone: row.try_get("phone")?,
            username: row.try_get("username")?,
            company_name: row.try_get("company_name")?,
            subdomain: row.try_get("subdomain")?,
            credentials_ref: row.try_get("credentials_ref")?,
            provisioning_state: row.try_get("provisioning_state")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

impl TryFrom<TenantRow> for Tenant {
    type Error = DbError;

    fn try_from(row: TenantRow) -> Result<Self, Self::Error> {
        let id = TenantId::new(row.id).map_err(|e| DbError::CorruptRow {
            table: "tenants",
            message: e.to_string(),
        })?;
        let provisioning =
            ProvisioningState::parse(&row.provisioning_state).ok_or_else(|| DbError::CorruptRow {
                table: "tenants",
                message: format!("unknown provisioning_state '{}'", row.provisioning_state),
            })?;

        Ok(Self {
            id,
            name: row.name,
            email: row.email,
            phone: row.phone,
            username: row.username,
            company_name: row.company_name,
            subdomain: row.subdomain,
            credentials_ref: row.credentials_ref,
            provisioning,
            created_at: row.created_at,
        })
    }
}

/// Map an insert failure, naming the field behind a unique violation.
fn insert_error(err: sqlx::Error) -> RegistryError {
    if let sqlx::Error::Database(ref db_err) = err {
        if db_err.code().as_deref() == Some("23505") {
            let field = match db_err.constraint().unwrap_or_default() {
                "tenants_username_key" => "username",
                "tenants_email_key" => "email",
                "tenants_subdomain_key" => "subdomain",
                _ => "tenant",
            };
            return RegistryError::Duplicate { field };
        }
    }
    DbError::Query(err).into()
}

#[async_trait]
impl TenantRegistry for PgTenantRegistry {
    async fn get_all_tenants(&self) -> Result<Vec<Tenant>, RegistryError> {
        let rows: Vec<TenantRow> =
            sqlx::query_as(&format!("SELECT {TENANT_COLUMNS} FROM tenants ORDER BY id"))
                .fetch_all(self.db.pool())
                .await
                .map_err(DbError::Query)?;

        debug!(count = rows.len(), "Loaded tenants");
        rows.into_iter()
            .map(|row| Tenant::try_from(row).map_err(RegistryError::from))
            .collect()
    }

    async fn get_tenant(&self, id: TenantId) -> Result<Tenant, RegistryError> {
        let row: Option<TenantRow> =
            sqlx::query_as(&format!("SELECT {TENANT_COLUMNS} FROM tenants WHERE id = $1"))
                .bind(id.get())
                .fetch_optional(self.db.pool())
                .await
                .map_err(DbError::Query)?;

        match row {
            Some(row) => Ok(Tenant::try_from(row)?),
            None => Err(RegistryError::NotFound(id)),
        }
    }

    async fn insert_tenant(&self, tenant: NewTenant) -> Result<Tenant, RegistryError> {
        let row: TenantRow = sqlx::query_as(&format!(
            r#"
            INSERT INTO tenants
                (name, email, phone, username, company_name, subdomain, credentials_ref, provisioning_state)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {TENANT_COLUMNS}
            "#
        ))
        .bind(&tenant.name)
        .bind(&tenant.email)
        .bind(&tenant.phone)
        .bind(&tenant.username)
        .bind(&tenant.company_name)
        .bind(&tenant.subdomain)
        .bind(&tenant.credentials_ref)
        .bind(ProvisioningState::Pending.as_str())
        .fetch_one(self.db.pool())
        .await
        .map_err(insert_error)?;

        let tenant = Tenant::try_from(row)?;
        info!(tenant_id = %tenant.id, subdomain = %tenant.subdomain, "Tenant inserted");
        Ok(tenant)
    }

    async fn delete_tenant(&self, id: TenantId) -> Result<(), RegistryError> {
        let result = sqlx::query("DELETE FROM tenants WHERE id = $1")
            .bind(id.get())
            .execute(self.db.pool())
            .await
            .map_err(DbError::Query)?;

        if result.rows_affected() == 0 {
            return Err(RegistryError::NotFound(id));
        }
        info!(tenant_id = %id, "Tenant deleted");
        Ok(())
    }

    async fn set_provisioning_state(
        &self,
        id: TenantId,
        state: ProvisioningState,
    ) -> Result<(), RegistryError> {
        let result = sqlx::query("UPDATE tenants SET provisioning_state = $2 WHERE id = $1")
            .bind(id.get())
            .bind(state.as_str())
            .execute(self.db.pool())
            .await
            .map_err(DbError::Query)?;

        if result.rows_affected() == 0 {
            return Err(RegistryError::NotFound(id));
        }
        debug!(tenant_id = %id, state = %state, "Provisioning state updated");
        Ok(())
    }

    async fn health_check(&self) -> Result<(), RegistryError> {
        Ok(self.db.health_check().await?)
    }
}
