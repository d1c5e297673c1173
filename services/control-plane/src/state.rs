//! Application state shared across request handlers.

use std::sync::Arc;

use crate::lifecycle::LifecycleOrchestrator;
use crate::provisioning::ProvisioningConfig;
use crate::reconciler::ReconciliationEngine;
use crate::registry::TenantRegistry;
use crate::runtime::RuntimeClient;

/// Shared application state.
///
/// This is passed to all request handlers via Axum's state extractor.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    registry: Arc<dyn TenantRegistry>,
    runtime: Arc<RuntimeClient>,
    orchestrator: LifecycleOrchestrator,
    engine: ReconciliationEngine,
}

impl AppState {
    /// Wire the orchestrator and engine over one registry and runtime client.
    pub fn new(
        registry: Arc<dyn TenantRegistry>,
        runtime: Arc<RuntimeClient>,
        provisioning: ProvisioningConfig,
    ) -> Self {
        let orchestrator =
            LifecycleOrchestrator::new(registry.clone(), runtime.clone(), provisioning);
        let engine = ReconciliationEngine::new(registry.clone(), runtime.clone());
        Self {
            inner: Arc::new(AppStateInner {
                registry,
                runtime,
                orchestrator,
                engine,
            }),
        }
    }

    pub fn registry(&self) -> &dyn TenantRegistry {
        self.inner.registry.as_ref()
    }

    pub fn runtime(&self) -> &RuntimeClient {
        &self.inner.runtime
    }

    pub fn orchestrator(&self) -> &LifecycleOrchestrator {
        &self.inner.orchestrator
    }

    pub fn engine(&self) -> &ReconciliationEngine {
        &self.inner.engine
    }
}
