//! Reconciliation engine.
//!
//! Read-only. Each call loads every tenant, takes one fresh listing of
//! prefixed units from the runtime and joins the two. Nothing is cached
//! between calls and nothing is changed: orphans are reported, never
//! removed.

use std::sync::Arc;

use tenantry_id::UNIT_NAME_PREFIX;
use tenantry_reconcile::{reconcile, ExpectedUnit, Observed, Report, ReportStats};
use tracing::{debug, instrument, warn};

use crate::registry::{ProvisioningState, RegistryError, Tenant, TenantRegistry};
use crate::runtime::RuntimeClient;

/// Joins the registry with the runtime.
pub struct ReconciliationEngine {
    registry: Arc<dyn TenantRegistry>,
    runtime: Arc<RuntimeClient>,
}

impl ReconciliationEngine {
    pub fn new(registry: Arc<dyn TenantRegistry>, runtime: Arc<RuntimeClient>) -> Self {
        Self { registry, runtime }
    }

    /// Build a report covering every registered tenant.
    ///
    /// Only a registry failure is an error. If the runtime cannot be listed
    /// every tenant is reported `unknown`.
    #[instrument(skip(self))]
    pub async fn reconcile(&self) -> Result<Report<Tenant>, RegistryError> {
        let tenants = self.registry.get_all_tenants().await?;

        let observed = match self.runtime.list_units(UNIT_NAME_PREFIX).await {
            Ok(units) => Observed::Available(units),
            Err(e) => {
                warn!(error = %e, "Runtime listing failed; reporting tenants as unknown");
                Observed::Unavailable
            }
        };

        let report = reconcile(tenants, observed, |tenant: &Tenant| ExpectedUnit {
            unit_name: tenant.id.unit_name(),
            provisioning_failed: tenant.provisioning == ProvisioningState::Failed,
        });

        if !report.orphans.is_empty() {
            warn!(
                orphans = ?report.orphan_names(),
                "Runtime units with no registered tenant"
            );
        }

        debug!(
            tenants = report.entries.len(),
            orphans = report.orphans.len(),
            runtime_available = report.runtime_available,
            "Reconciliation complete"
        );
        Ok(report)
    }

    /// Aggregate counts for dashboards.
    pub async fn stats(&self) -> Result<ReportStats, RegistryError> {
        Ok(self.reconcile().await?.stats())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{new_tenant, MemoryRegistry};
    use crate::runtime::{MockTransport, RuntimeTimeouts, RuntimeTransport};
    use tenantry_reconcile::{ConvergenceStatus, TenantStatus};

    async fn setup(tenants: usize) -> (ReconciliationEngine, Arc<MemoryRegistry>, Arc<MockTransport>) {
        let registry = Arc::new(MemoryRegistry::new());
        for i in 0..tenants {
            registry
                .insert_tenant(new_tenant(&format!("tenant{i}")))
                .await
                .unwrap();
        }
        let mock = Arc::new(MockTransport::new());
        let runtime = RuntimeClient::new(
            vec![mock.clone() as Arc<dyn RuntimeTransport>],
            RuntimeTimeouts::default(),
        );
        let engine = ReconciliationEngine::new(registry.clone(), Arc::new(runtime));
        (engine, registry, mock)
    }

    #[tokio::test]
    async fn test_mixed_fleet() {
        let (engine, _, mock) = setup(3).await;
        mock.insert_unit("chatbot_1", true).await;
        mock.insert_unit("chatbot_3", false).await;

        let report = engine.reconcile().await.unwrap();
        let statuses: Vec<_> = report
            .entries
            .iter()
            .map(|e| (e.tenant.id.get(), e.status))
            .collect();
        assert_eq!(
            statuses,
            vec![
                (1, TenantStatus::Running),
                (2, TenantStatus::NotCreated),
                (3, TenantStatus::Stopped),
            ]
        );
        assert_eq!(report.entries[0].convergence, ConvergenceStatus::Converged);
        assert_eq!(mock.list_calls(), 1);
    }

    #[tokio::test]
    async fn test_runtime_unavailable_reports_unknown() {
        let (engine, _, mock) = setup(2).await;
        mock.set_reachable(false);

        let report = engine.reconcile().await.unwrap();
        assert_eq!(report.entries.len(), 2);
        assert!(report
            .entries
            .iter()
            .all(|e| e.status == TenantStatus::Unknown));
        assert!(!report.runtime_available);
    }

    #[tokio::test]
    async fn test_failed_provisioning_surfaces() {
        let (engine, registry, _) = setup(1).await;
        let id = registry.get_all_tenants().await.unwrap()[0].id;
        registry
            .set_provisioning_state(id, ProvisioningState::Failed)
            .await
            .unwrap();

        let report = engine.reconcile().await.unwrap();
        assert_eq!(report.entries[0].status, TenantStatus::ProvisioningFailed);
    }

    #[tokio::test]
    async fn test_orphans_counted_not_removed() {
        let (engine, _, mock) = setup(1).await;
        mock.insert_unit("chatbot_1", true).await;
        mock.insert_unit("chatbot_77", false).await;
        mock.insert_unit("unrelated", true).await;

        let stats = engine.stats().await.unwrap();
        assert_eq!(stats.total_tenants, 1);
        assert_eq!(stats.total_units, 2);
        assert_eq!(stats.running_units, 1);
        assert_eq!(stats.orphaned_units, 1);
        assert_eq!(mock.remove_calls(), 0);
    }
}
