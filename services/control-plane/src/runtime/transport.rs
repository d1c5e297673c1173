//! Transport interface.

use std::time::Duration;

use async_trait::async_trait;
use tenantry_reconcile::UnitObservation;

use super::{TransportError, UnitHandle, UnitSpec};

/// One way of talking to the container runtime.
///
/// Implementations do not apply timeouts themselves; the client bounds
/// every call. Implementations must be safe to drop mid-call.
#[async_trait]
pub trait RuntimeTransport: Send + Sync {
    /// Short name used in logs ("api", "cli", "mock").
    fn name(&self) -> &'static str;

    /// Check the daemon is reachable.
    async fn ping(&self) -> Result<(), TransportError>;

    /// List all units (running or not) whose name contains `name_filter`.
    async fn list_units(&self, name_filter: &str) -> Result<Vec<UnitObservation>, TransportError>;

    /// Inspect a single unit.
    async fn get_unit(&self, name: &str) -> Result<UnitObservation, TransportError>;

    /// Create (but do not start) a unit.
    async fn create_unit(&self, spec: &UnitSpec) -> Result<UnitHandle, TransportError>;

    /// Start a unit. Starting a running unit succeeds.
    async fn start_unit(&self, name: &str) -> Result<(), TransportError>;

    /// Stop a unit, killing it after `grace`. Stopping a stopped unit succeeds.
    async fn stop_unit(&self, name: &str, grace: Duration) -> Result<(), TransportError>;

    /// Remove a unit.
    async fn remove_unit(&self, name: &str, force: bool) -> Result<(), TransportError>;
}
