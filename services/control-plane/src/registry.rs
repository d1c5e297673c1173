//! Tenant registry.
//!
//! The registry is the source of desired state: every row is a tenant that
//! should own exactly one runtime unit. Unit names and ports are derived from
//! the tenant id and never stored.
//!
//! Two backends implement [`TenantRegistry`]:
//! - [`crate::db::PgTenantRegistry`]: Postgres, used in production
//! - [`MemoryRegistry`]: in-process, used in tests and local development

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tenantry_id::TenantId;
use thiserror::Error;
use tokio::sync::Mutex;

/// Outcome of the most recent provisioning attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvisioningState {
    /// Row written, runtime unit not yet created.
    Pending,
    Provisioned,
    Failed,
}

impl ProvisioningState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Provisioned => "provisioned",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "provisioned" => Some(Self::Provisioned),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for ProvisioningState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A registered tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Tenant {
    pub id: TenantId,
    pub name: String,
    pub email: String,
    pub phone: String,
    pub username: String,
    pub company_name: String,
    pub subdomain: String,

    /// Reference to the tenant's database credentials (the database user).
    pub credentials_ref: String,

    pub provisioning: ProvisioningState,
    pub created_at: DateTime<Utc>,
}

/// Fields supplied at registration. The id is assigned by the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTenant {
    pub name: String,
    pub email: String,
    pub phone: String,
    pub username: String,
    pub company_name: String,
    pub subdomain: String,
    pub credentials_ref: String,
}

/// Registry errors.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("tenant not found: {0}")]
    NotFound(TenantId),

    /// A unique field is already taken.
    #[error("{field} already registered")]
    Duplicate { field: &'static str },

    #[error("registry backend error: {0}")]
    Backend(String),
}

/// Read/write access to registered tenants.
#[async_trait]
pub trait TenantRegistry: Send + Sync {
    /// All tenants, ordered by id.
    async fn get_all_tenants(&self) -> Result<Vec<Tenant>, RegistryError>;

    async fn get_tenant(&self, id: TenantId) -> Result<Tenant, RegistryError>;

    /// Insert a tenant in state `pending` and return it with its new id.
    async fn insert_tenant(&self, tenant: NewTenant) -> Result<Tenant, RegistryError>;

    async fn delete_tenant(&self, id: TenantId) -> Result<(), RegistryError>;

    async fn set_provisioning_state(
        &self,
        id: TenantId,
        state: ProvisioningState,
    ) -> Result<(), RegistryError>;

    /// Check the backend is reachable.
    async fn health_check(&self) -> Result<(), RegistryError>;
}

#[derive(Debug, Default)]
struct MemoryState {
    last_id: i64,
    tenants: BTreeMap<TenantId, Tenant>,
}

/// In-memory registry.
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    state: Mutex<MemoryState>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TenantRegistry for MemoryRegistry {
    async fn get_all_tenants(&self) -> Result<Vec<Tenant>, RegistryError> {
        let state = self.state.lock().await;
        Ok(state.tenants.values().cloned().collect())
    }

    async fn get_tenant(&self, id: TenantId) -> Result<Tenant, RegistryError> {
        let state = self.state.lock().await;
        state
            .tenants
            .get(&id)
            .cloned()
            .ok_or(RegistryError::NotFound(id))
    }

    async fn insert_tenant(&self, tenant: NewTenant) -> Result<Tenant, RegistryError> {
        let mut state = self.state.lock().await;

        for existing in state.tenants.values() {
            if existing.username == tenant.username {
                return Err(RegistryError::Duplicate { field: "username" });
            }
            if existing.email == tenant.email {
                return Err(RegistryError::Duplicate { field: "email" });
            }
            if existing.subdomain == tenant.subdomain {
                return Err(RegistryError::Duplicate { field: "subdomain" });
            }
        }

        let id = TenantId::new(state.last_id + 1)
            .map_err(|e| RegistryError::Backend(format!("id space exhausted: {e}")))?;
        state.last_id = id.get();

        let tenant = Tenant {
            id,
            name: tenant.name,
            email: tenant.email,
            phone: tenant.phone,
            username: tenant.username,
            company_name: tenant.company_name,
            subdomain: tenant.subdomain,
            credentials_ref: tenant.credentials_ref,
            provisioning: ProvisioningState::Pending,
            created_at: Utc::now(),
        };
        state.tenants.insert(id, tenant.clone());
        Ok(tenant)
    }

    async fn delete_tenant(&self, id: TenantId) -> Result<(), RegistryError> {
        let mut state = self.state.lock().await;
        state
            .tenants
            .remove(&id)
            .map(|_| ())
            .ok_or(RegistryError::NotFound(id))
    }

    async fn set_provisioning_state(
        &self,
        id: TenantId,
        provisioning: ProvisioningState,
    ) -> Result<(), RegistryError> {
        let mut state = self.state.lock().await;
        let tenant = state
            .tenants
            .get_mut(&id)
            .ok_or(RegistryError::NotFound(id))?;
        tenant.provisioning = provisioning;
        Ok(())
    }

    async fn health_check(&self) -> Result<(), RegistryError> {
        Ok(())
    }
}

#[cfg(test)]
pub(crate) fn new_tenant(subdomain: &str) -> NewTenant {
    NewTenant {
        name: format!("{subdomain} owner"),
        email: format!("{subdomain}@example.com"),
        phone: "+15550100".to_string(),
        username: subdomain.to_string(),
        company_name: format!("{subdomain} inc"),
        subdomain: subdomain.to_string(),
        credentials_ref: format!("user_{subdomain}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_insert_assigns_sequential_ids() {
        let registry = MemoryRegistry::new();
        let a = registry.insert_tenant(new_tenant("acme")).await.unwrap();
        let b = registry.insert_tenant(new_tenant("globex")).await.unwrap();

        assert_eq!(a.id.get(), 1);
        assert_eq!(b.id.get(), 2);
        assert_eq!(a.provisioning, ProvisioningState::Pending);
    }

    #[tokio::test]
    async fn test_ids_not_reused_after_delete() {
        let registry = MemoryRegistry::new();
        let a = registry.insert_tenant(new_tenant("acme")).await.unwrap();
        registry.delete_tenant(a.id).await.unwrap();
        let b = registry.insert_tenant(new_tenant("globex")).await.unwrap();
        assert_eq!(b.id.get(), 2);
    }

    #[tokio::test]
    async fn test_duplicate_fields() {
        let registry = MemoryRegistry::new();
        registry.insert_tenant(new_tenant("acme")).await.unwrap();

        let mut dup = new_tenant("other");
        dup.email = "acme@example.com".to_string();
        let err = registry.insert_tenant(dup).await.unwrap_err();
        assert!(matches!(err, RegistryError::Duplicate { field: "email" }));

        let mut dup = new_tenant("other");
        dup.subdomain = "acme".to_string();
        let err = registry.insert_tenant(dup).await.unwrap_err();
        assert!(matches!(err, RegistryError::Duplicate { field: "subdomain" }));
    }

    #[tokio::test]
    async fn test_provisioning_state_and_not_found() {
        let registry = MemoryRegistry::new();
        let tenant = registry.insert_tenant(new_tenant("acme")).await.unwrap();

        registry
            .set_provisioning_state(tenant.id, ProvisioningState::Failed)
            .await
            .unwrap();
        assert_eq!(
            registry.get_tenant(tenant.id).await.unwrap().provisioning,
            ProvisioningState::Failed
        );

        let missing = TenantId::new(99).unwrap();
        assert!(matches!(
            registry.get_tenant(missing).await,
            Err(RegistryError::NotFound(_))
        ));
        assert!(matches!(
            registry.delete_tenant(missing).await,
            Err(RegistryError::NotFound(_))
        ));
    }

    #[test]
    fn test_provisioning_state_round_trip() {
        for state in [
            ProvisioningState::Pending,
            ProvisioningState::Provisioned,
            ProvisioningState::Failed,
        ] {
            assert_eq!(ProvisioningState::parse(state.as_str()), Some(state));
        }
        assert_eq!(ProvisioningState::parse("bogus"), None);
    }
}
