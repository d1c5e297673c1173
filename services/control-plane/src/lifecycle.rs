//! Lifecycle orchestrator.
//!
//! Drives a tenant's unit through `absent -> creating -> running <-> stopped
//! -> removing -> absent`. Every operation is safe to repeat: asking for the
//! state a unit is already in succeeds without touching the runtime.
//!
//! There is no per-unit locking. Two concurrent creates for the same name are
//! arbitrated by the runtime's name uniqueness; the loser gets
//! `already_exists`.

use std::sync::Arc;

use serde::Serialize;
use tenantry_id::{TenantId, UnitName};
use tenantry_reconcile::UnitState;
use tracing::{error, info, warn};

use crate::provisioning::{ProvisioningConfig, TenantCredentials};
use crate::registry::{NewTenant, ProvisioningState, RegistryError, Tenant, TenantRegistry};
use crate::runtime::{RuntimeClient, RuntimeError, UnitHandle};

/// Result of a unit action that reached the runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionResult {
    pub success: bool,
    pub message: String,
}

impl ActionResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// Outcome of a registration whose registry write succeeded.
#[derive(Debug)]
pub enum RegistrationOutcome {
    Provisioned(Tenant),

    /// The tenant is registered but has no working unit. Its provisioning
    /// state is `failed` and it reports `provisioning_failed` until
    /// recreated.
    RuntimeFailed { tenant: Tenant, error: RuntimeError },
}

/// Outcome of a teardown. The registry row is gone in both cases.
#[derive(Debug)]
pub struct TeardownOutcome {
    pub tenant: Tenant,
    pub runtime: Result<ActionResult, RuntimeError>,
}

/// Orchestrates tenant units.
pub struct LifecycleOrchestrator {
    registry: Arc<dyn TenantRegistry>,
    runtime: Arc<RuntimeClient>,
    provisioning: ProvisioningConfig,
}

impl LifecycleOrchestrator {
    pub fn new(
        registry: Arc<dyn TenantRegistry>,
        runtime: Arc<RuntimeClient>,
        provisioning: ProvisioningConfig,
    ) -> Self {
        Self {
            registry,
            runtime,
            provisioning,
        }
    }

    pub fn provisioning(&self) -> &ProvisioningConfig {
        &self.provisioning
    }

    /// Create and start a tenant's unit.
    ///
    /// Fails with [`RuntimeError::AlreadyExists`] if a unit with the tenant's
    /// name exists, whether found up front or reported by the runtime on
    /// create.
    pub async fn provision(&self, tenant: &Tenant) -> Result<UnitHandle, RuntimeError> {
        let unit_name = tenant.id.unit_name().to_string();

        match self.runtime.get_unit(&unit_name).await {
            Ok(existing) => {
                info!(
                    unit_name = %unit_name,
                    state = existing.state.as_str(),
                    "Unit already exists, not provisioning"
                );
                return Err(RuntimeError::AlreadyExists(unit_name));
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }

        let credentials = TenantCredentials::generate(&tenant.credentials_ref);
        let spec = self.provisioning.unit_spec(tenant, &credentials);

        info!(
            tenant_id = %tenant.id,
            unit_name = %unit_name,
            image = %spec.image,
            expected_port = tenant.id.expected_port(),
            host_port_published = !spec.port_bindings.is_empty(),
            "Provisioning unit"
        );

        let handle = self.runtime.create_unit(&spec).await?;
        self.runtime.start_unit(&unit_name).await?;

        info!(tenant_id = %tenant.id, unit_id = %handle.unit_id, "Unit provisioned");
        Ok(handle)
    }

    /// Register a tenant and provision its unit.
    ///
    /// The registry row is written first and kept whatever happens to the
    /// runtime; only a registry failure is returned as an error.
    pub async fn register(&self, new_tenant: NewTenant) -> Result<RegistrationOutcome, RegistryError> {
        let mut tenant = self.registry.insert_tenant(new_tenant).await?;
        info!(tenant_id = %tenant.id, subdomain = %tenant.subdomain, "Tenant registered");

        match self.provision(&tenant).await {
            Ok(_) => {
                self.record_state(tenant.id, ProvisioningState::Provisioned)
                    .await;
                tenant.provisioning = ProvisioningState::Provisioned;
                Ok(RegistrationOutcome::Provisioned(tenant))
            }
            Err(e) => {
                warn!(
                    tenant_id = %tenant.id,
                    error = %e,
                    "Provisioning failed; tenant kept as provisioning_failed"
                );
                self.record_state(tenant.id, ProvisioningState::Failed).await;
                tenant.provisioning = ProvisioningState::Failed;
                Ok(RegistrationOutcome::RuntimeFailed { tenant, error: e })
            }
        }
    }

    /// Start a unit. Starting a running unit is a no-op.
    pub async fn start(&self, unit: UnitName) -> Result<ActionResult, RuntimeError> {
        let name = unit.to_string();
        match self.runtime.get_unit(&name).await {
            Ok(obs) if obs.state == UnitState::Running => {
                self.mark_running(unit.tenant_id()).await;
                return Ok(ActionResult::ok(format!("Unit {name} is already running")));
            }
            Ok(_) => {}
            Err(e) if e.is_not_found() => {
                return Ok(ActionResult::failed(format!("Unit {name} not found")));
            }
            Err(e) => return Err(e),
        }

        match self.runtime.start_unit(&name).await {
            Ok(()) => {
                info!(unit_name = %name, "Unit started");
                self.mark_running(unit.tenant_id()).await;
                Ok(ActionResult::ok(format!("Unit {name} started")))
            }
            Err(e) if e.is_not_found() => Ok(ActionResult::failed(format!("Unit {name} not found"))),
            Err(e) => Err(e),
        }
    }

    /// Stop a unit. Stopping a stopped or absent unit succeeds.
    pub async fn stop(&self, unit: UnitName) -> Result<ActionResult, RuntimeError> {
        let name = unit.to_string();
        match self.runtime.get_unit(&name).await {
            Ok(obs) if obs.state == UnitState::Stopped => {
                return Ok(ActionResult::ok(format!("Unit {name} is already stopped")));
            }
            Ok(_) => {}
            Err(e) if e.is_not_found() => {
                return Ok(ActionResult::ok(format!("Unit {name} does not exist")));
            }
            Err(e) => return Err(e),
        }

        match self.runtime.stop_unit(&name).await {
            Ok(()) => {
                info!(unit_name = %name, "Unit stopped");
                Ok(ActionResult::ok(format!("Unit {name} stopped")))
            }
            Err(e) if e.is_not_found() => Ok(ActionResult::ok(format!("Unit {name} does not exist"))),
            Err(e) => Err(e),
        }
    }

    /// Stop then force-remove a unit. Removing an absent unit succeeds.
    ///
    /// A stop the daemon refuses or that overruns its bound does not block
    /// the force-remove; only an unreachable runtime does.
    pub async fn remove(&self, unit: UnitName) -> Result<ActionResult, RuntimeError> {
        let name = unit.to_string();

        match self.runtime.stop_unit(&name).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                return Ok(ActionResult::ok(format!("Unit {name} does not exist")));
            }
            Err(e) if e.is_unavailable() => return Err(e),
            Err(e) => {
                warn!(unit_name = %name, error = %e, "Graceful stop failed, forcing removal");
            }
        }

        match self.runtime.remove_unit(&name, true).await {
            Ok(()) => {
                info!(unit_name = %name, "Unit removed");
                Ok(ActionResult::ok(format!("Unit {name} removed")))
            }
            Err(e) if e.is_not_found() => Ok(ActionResult::ok(format!("Unit {name} does not exist"))),
            Err(e) => Err(e),
        }
    }

    /// Provision a registered tenant's unit on demand.
    pub async fn create(&self, tenant: &Tenant) -> Result<ActionResult, RuntimeError> {
        self.provision_recorded(tenant).await
    }

    /// Replace a tenant's unit, remediating failed provisioning.
    pub async fn recreate(&self, tenant: &Tenant) -> Result<ActionResult, RuntimeError> {
        let removed = self.remove(tenant.id.unit_name()).await?;
        info!(tenant_id = %tenant.id, message = %removed.message, "Recreating unit");
        self.provision_recorded(tenant).await
    }

    /// Remove a tenant's unit and delete the tenant.
    ///
    /// The registry row is deleted even when the runtime could not be
    /// reached; the runtime outcome is returned alongside.
    pub async fn teardown(&self, id: TenantId) -> Result<TeardownOutcome, RegistryError> {
        let tenant = self.registry.get_tenant(id).await?;

        let runtime = self.remove(id.unit_name()).await;
        if let Err(e) = &runtime {
            warn!(
                tenant_id = %id,
                error = %e,
                "Runtime teardown failed; deleting tenant anyway"
            );
        }

        self.registry.delete_tenant(id).await?;
        info!(tenant_id = %id, "Tenant torn down");

        Ok(TeardownOutcome { tenant, runtime })
    }

    /// Provision and record the outcome on the tenant row.
    async fn provision_recorded(&self, tenant: &Tenant) -> Result<ActionResult, RuntimeError> {
        let name = tenant.id.unit_name();
        match self.provision(tenant).await {
            Ok(_) => {
                self.record_state(tenant.id, ProvisioningState::Provisioned)
                    .await;
                Ok(ActionResult::ok(format!("Unit {name} created and started")))
            }
            Err(RuntimeError::AlreadyExists(_)) => {
                let running = matches!(
                    self.runtime.get_unit(&name.to_string()).await,
                    Ok(obs) if obs.state == UnitState::Running
                );
                if running && tenant.provisioning != ProvisioningState::Provisioned {
                    self.record_state(tenant.id, ProvisioningState::Provisioned)
                        .await;
                }
                Ok(ActionResult::failed(format!("Unit {name} already exists")))
            }
            Err(e) => {
                self.record_state(tenant.id, ProvisioningState::Failed).await;
                Err(e)
            }
        }
    }

    /// Clear a stale `failed` marker once the tenant's unit is seen running.
    /// Units without a tenant row are left alone.
    async fn mark_running(&self, id: TenantId) {
        match self.registry.get_tenant(id).await {
            Ok(tenant) if tenant.provisioning != ProvisioningState::Provisioned => {
                self.record_state(id, ProvisioningState::Provisioned).await;
            }
            Ok(_) | Err(RegistryError::NotFound(_)) => {}
            Err(e) => warn!(tenant_id = %id, error = %e, "Failed to read tenant"),
        }
    }

    async fn record_state(&self, id: TenantId, state: ProvisioningState) {
        if let Err(e) = self.registry.set_provisioning_state(id, state).await {
            error!(
                tenant_id = %id,
                state = %state,
                error = %e,
                "Failed to record provisioning state"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::registry::{new_tenant, MemoryRegistry};
    use crate::runtime::{MockTransport, RuntimeTimeouts, RuntimeTransport};

    struct Harness {
        orchestrator: LifecycleOrchestrator,
        registry: Arc<MemoryRegistry>,
        mock: Arc<MockTransport>,
    }

    fn harness() -> Harness {
        let registry = Arc::new(MemoryRegistry::new());
        let mock = Arc::new(MockTransport::new());
        let runtime = RuntimeClient::new(
            vec![mock.clone() as Arc<dyn RuntimeTransport>],
            RuntimeTimeouts::default(),
        );
        let orchestrator = LifecycleOrchestrator::new(
            registry.clone(),
            Arc::new(runtime),
            ProvisioningConfig::default(),
        );
        Harness {
            orchestrator,
            registry,
            mock,
        }
    }

    fn unit(id: i64) -> UnitName {
        TenantId::new(id).unwrap().unit_name()
    }

    #[tokio::test]
    async fn test_register_provisions_unit() {
        let h = harness();
        let outcome = h.orchestrator.register(new_tenant("acme")).await.unwrap();

        let tenant = match outcome {
            RegistrationOutcome::Provisioned(tenant) => tenant,
            other => panic!("expected provisioned, got {other:?}"),
        };
        assert_eq!(tenant.provisioning, ProvisioningState::Provisioned);
        assert_eq!(h.mock.unit_state("chatbot_1").await, UnitState::Running);

        let spec = h.mock.unit_spec("chatbot_1").await.unwrap();
        assert!(spec.env["DB_URL"].contains("user_acme:"));
        assert_eq!(
            spec.labels["traefik.http.routers.chatbot_1.rule"],
            "Host(`acme.tenantry.local`)"
        );
    }

    #[tokio::test]
    async fn test_provision_targets_derived_name_and_port() {
        let h = harness();
        // Burn ids 1..=41 so the next insert is 42.
        for i in 0..41 {
            let t = h
                .registry
                .insert_tenant(new_tenant(&format!("t{i}")))
                .await
                .unwrap();
            h.registry.delete_tenant(t.id).await.unwrap();
        }
        let tenant = h.registry.insert_tenant(new_tenant("acme")).await.unwrap();
        assert_eq!(tenant.id.get(), 42);

        let handle = h.orchestrator.provision(&tenant).await.unwrap();
        assert_eq!(handle.unit_name, "chatbot_42");
        assert_eq!(tenant.id.expected_port(), 80842);
        let spec = h.mock.unit_spec("chatbot_42").await.unwrap();
        assert!(spec.port_bindings.is_empty());
    }

    #[tokio::test]
    async fn test_provision_existing_unit_is_already_exists() {
        let h = harness();
        let tenant = h.registry.insert_tenant(new_tenant("acme")).await.unwrap();
        h.mock.insert_unit("chatbot_1", false).await;

        let err = h.orchestrator.provision(&tenant).await.unwrap_err();
        assert_eq!(err, RuntimeError::AlreadyExists("chatbot_1".to_string()));
        assert_eq!(h.mock.create_calls(), 0);
    }

    #[tokio::test]
    async fn test_register_keeps_tenant_when_runtime_fails() {
        let h = harness();
        h.mock.set_fail_creates(true);

        let outcome = h.orchestrator.register(new_tenant("acme")).await.unwrap();
        let tenant = match outcome {
            RegistrationOutcome::RuntimeFailed { tenant, error } => {
                assert_eq!(error.code(), "runtime_rejected");
                tenant
            }
            other => panic!("expected runtime failure, got {other:?}"),
        };

        let stored = h.registry.get_tenant(tenant.id).await.unwrap();
        assert_eq!(stored.provisioning, ProvisioningState::Failed);
    }

    #[tokio::test]
    async fn test_start_running_unit_is_noop() {
        let h = harness();
        h.mock.insert_unit("chatbot_1", true).await;

        let result = h.orchestrator.start(unit(1)).await.unwrap();
        assert!(result.success);
        assert_eq!(h.mock.start_calls(), 0);
    }

    #[tokio::test]
    async fn test_start_stopped_unit() {
        let h = harness();
        h.mock.insert_unit("chatbot_1", false).await;

        let result = h.orchestrator.start(unit(1)).await.unwrap();
        assert!(result.success);
        assert_eq!(h.mock.start_calls(), 1);
        assert_eq!(h.mock.unit_state("chatbot_1").await, UnitState::Running);
    }

    #[tokio::test]
    async fn test_start_missing_unit_fails_softly() {
        let h = harness();
        let result = h.orchestrator.start(unit(5)).await.unwrap();
        assert!(!result.success);
        assert!(result.message.contains("not found"));
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let h = harness();
        h.mock.insert_unit("chatbot_1", true).await;

        assert!(h.orchestrator.stop(unit(1)).await.unwrap().success);
        assert!(h.orchestrator.stop(unit(1)).await.unwrap().success);
        assert_eq!(h.mock.stop_calls(), 1);
        assert!(h.orchestrator.stop(unit(2)).await.unwrap().success);
    }

    #[tokio::test]
    async fn test_remove_twice_succeeds() {
        let h = harness();
        h.mock.insert_unit("chatbot_1", true).await;

        assert!(h.orchestrator.remove(unit(1)).await.unwrap().success);
        assert!(h.orchestrator.remove(unit(1)).await.unwrap().success);
        assert_eq!(h.mock.unit_state("chatbot_1").await, UnitState::NotCreated);
    }

    #[tokio::test]
    async fn test_remove_never_created_unit() {
        let h = harness();
        let result = h.orchestrator.remove(unit(99)).await.unwrap();
        assert!(result.success);
    }

    #[tokio::test]
    async fn test_runtime_unavailable_propagates() {
        let h = harness();
        h.mock.set_reachable(false);
        let err = h.orchestrator.start(unit(1)).await.unwrap_err();
        assert!(err.is_unavailable());
    }

    #[tokio::test]
    async fn test_create_existing_unit_reports_already_exists() {
        let h = harness();
        let tenant = h.registry.insert_tenant(new_tenant("acme")).await.unwrap();
        h.mock.insert_unit("chatbot_1", true).await;

        let result = h.orchestrator.create(&tenant).await.unwrap();
        assert!(!result.success);
        assert!(result.message.contains("already exists"));
    }

    #[tokio::test]
    async fn test_recreate_remediates_failed_tenant() {
        let h = harness();
        h.mock.set_fail_creates(true);
        let tenant = match h.orchestrator.register(new_tenant("acme")).await.unwrap() {
            RegistrationOutcome::RuntimeFailed { tenant, .. } => tenant,
            other => panic!("expected runtime failure, got {other:?}"),
        };

        h.mock.set_fail_creates(false);
        let result = h.orchestrator.recreate(&tenant).await.unwrap();
        assert!(result.success);
        assert_eq!(h.mock.unit_state("chatbot_1").await, UnitState::Running);
        assert_eq!(
            h.registry.get_tenant(tenant.id).await.unwrap().provisioning,
            ProvisioningState::Provisioned
        );
    }

    #[tokio::test]
    async fn test_teardown_removes_unit_and_row() {
        let h = harness();
        let tenant = match h.orchestrator.register(new_tenant("acme")).await.unwrap() {
            RegistrationOutcome::Provisioned(tenant) => tenant,
            other => panic!("expected provisioned, got {other:?}"),
        };

        let outcome = h.orchestrator.teardown(tenant.id).await.unwrap();
        assert!(outcome.runtime.unwrap().success);
        assert_eq!(h.mock.unit_state("chatbot_1").await, UnitState::NotCreated);
        assert!(matches!(
            h.registry.get_tenant(tenant.id).await,
            Err(RegistryError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_teardown_deletes_row_when_runtime_down() {
        let h = harness();
        let tenant = h.registry.insert_tenant(new_tenant("acme")).await.unwrap();
        h.mock.set_reachable(false);

        let outcome = h.orchestrator.teardown(tenant.id).await.unwrap();
        assert!(outcome.runtime.unwrap_err().is_unavailable());
        assert!(h.registry.get_all_tenants().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_teardown_unknown_tenant() {
        let h = harness();
        let err = h
            .orchestrator
            .teardown(TenantId::new(7).unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::NotFound(_)));
    }

    async fn failed_tenant(h: &Harness) -> Tenant {
        h.mock.set_fail_creates(true);
        let tenant = match h.orchestrator.register(new_tenant("acme")).await.unwrap() {
            RegistrationOutcome::RuntimeFailed { tenant, .. } => tenant,
            other => panic!("expected runtime failure, got {other:?}"),
        };
        h.mock.set_fail_creates(false);
        tenant
    }

    #[tokio::test]
    async fn test_remove_forces_when_stop_rejected() {
        let h = harness();
        h.mock.insert_unit("chatbot_1", true).await;
        h.mock.set_fail_stops(true);

        let result = h.orchestrator.remove(unit(1)).await.unwrap();
        assert!(result.success, "{}", result.message);
        assert_eq!(h.mock.stop_calls(), 1);
        assert_eq!(h.mock.remove_calls(), 1);
        assert_eq!(h.mock.unit_state("chatbot_1").await, UnitState::NotCreated);
    }

    #[tokio::test]
    async fn test_teardown_with_wedged_unit_leaves_nothing_behind() {
        let h = harness();
        let tenant = h.registry.insert_tenant(new_tenant("acme")).await.unwrap();
        h.mock.insert_unit("chatbot_1", true).await;
        h.mock.set_fail_stops(true);

        let outcome = h.orchestrator.teardown(tenant.id).await.unwrap();
        assert!(outcome.runtime.unwrap().success);
        assert_eq!(h.mock.unit_state("chatbot_1").await, UnitState::NotCreated);
        assert!(h.registry.get_all_tenants().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_start_clears_failed_marker() {
        let h = harness();
        let tenant = failed_tenant(&h).await;
        h.mock.insert_unit("chatbot_1", false).await;

        assert!(h.orchestrator.start(unit(1)).await.unwrap().success);
        assert_eq!(
            h.registry.get_tenant(tenant.id).await.unwrap().provisioning,
            ProvisioningState::Provisioned
        );
    }

    #[tokio::test]
    async fn test_create_over_running_unit_clears_failed_marker() {
        let h = harness();
        let tenant = failed_tenant(&h).await;
        h.mock.insert_unit("chatbot_1", true).await;

        let result = h.orchestrator.create(&tenant).await.unwrap();
        assert!(!result.success);
        assert_eq!(
            h.registry.get_tenant(tenant.id).await.unwrap().provisioning,
            ProvisioningState::Provisioned
        );
    }

    #[tokio::test]
    async fn test_start_unit_without_tenant_row() {
        let h = harness();
        h.mock.insert_unit("chatbot_9", false).await;

        assert!(h.orchestrator.start(unit(9)).await.unwrap().success);
        assert!(h.registry.get_all_tenants().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_provision_loser_gets_already_exists() {
        let h = harness();
        let tenant = h.registry.insert_tenant(new_tenant("acme")).await.unwrap();
        // Both existence checks complete before either create lands.
        h.mock.set_delay(Some(Duration::from_millis(20))).await;

        let (a, b) = tokio::join!(
            h.orchestrator.provision(&tenant),
            h.orchestrator.provision(&tenant)
        );

        assert_eq!(h.mock.create_calls(), 2);
        let errors: Vec<RuntimeError> = [a, b].into_iter().filter_map(Result::err).collect();
        assert_eq!(
            errors,
            vec![RuntimeError::AlreadyExists("chatbot_1".to_string())]
        );
        assert_eq!(h.mock.unit_state("chatbot_1").await, UnitState::Running);
    }

    #[tokio::test]
    async fn test_concurrent_create_reports_one_failure() {
        let h = harness();
        let tenant = h.registry.insert_tenant(new_tenant("acme")).await.unwrap();
        h.mock.set_delay(Some(Duration::from_millis(20))).await;

        let (a, b) = tokio::join!(
            h.orchestrator.create(&tenant),
            h.orchestrator.create(&tenant)
        );
        let (a, b) = (a.unwrap(), b.unwrap());

        assert_eq!(h.mock.create_calls(), 2);
        assert!(a.success != b.success);
        let loser = if a.success { b } else { a };
        assert!(loser.message.contains("already exists"));
    }
}
