//! In-memory transport for testing and development.
//!
//! Behaves like a single Docker daemon: unit names are unique, start and
//! stop are no-ops when already in the target state, and calls are counted
//! so tests can assert on side effects.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tenantry_reconcile::{UnitObservation, UnitState};
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{RuntimeTransport, TransportError, UnitHandle, UnitSpec};

#[derive(Debug, Clone)]
struct MockUnit {
    id: String,
    running: bool,
    spec: Option<UnitSpec>,
}

/// Mock transport.
pub struct MockTransport {
    name: &'static str,
    units: Mutex<BTreeMap<String, MockUnit>>,
    id_counter: AtomicU64,
    reachable: AtomicBool,
    fail_creates: AtomicBool,
    fail_stops: AtomicBool,
    delay: Mutex<Option<Duration>>,
    create_calls: AtomicUsize,
    start_calls: AtomicUsize,
    stop_calls: AtomicUsize,
    remove_calls: AtomicUsize,
    list_calls: AtomicUsize,
}

impl MockTransport {
    /// Create an empty, reachable mock.
    pub fn new() -> Self {
        Self::named("mock")
    }

    /// Create a mock reporting `name` in logs (to tell two mocks apart).
    pub fn named(name: &'static str) -> Self {
        Self {
            name,
            units: Mutex::new(BTreeMap::new()),
            id_counter: AtomicU64::new(0),
            reachable: AtomicBool::new(true),
            fail_creates: AtomicBool::new(false),
            fail_stops: AtomicBool::new(false),
            delay: Mutex::new(None),
            create_calls: AtomicUsize::new(0),
            start_calls: AtomicUsize::new(0),
            stop_calls: AtomicUsize::new(0),
            remove_calls: AtomicUsize::new(0),
            list_calls: AtomicUsize::new(0),
        }
    }

    /// Create a mock whose daemon cannot be reached.
    pub fn unreachable() -> Self {
        let mock = Self::new();
        mock.set_reachable(false);
        mock
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Make every create fail with a daemon-side rejection.
    pub fn set_fail_creates(&self, fail: bool) {
        self.fail_creates.store(fail, Ordering::SeqCst);
    }

    /// Make every stop fail as a wedged container would.
    pub fn set_fail_stops(&self, fail: bool) {
        self.fail_stops.store(fail, Ordering::SeqCst);
    }

    /// Delay every call (to exercise timeouts).
    pub async fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock().await = delay;
    }

    /// Seed a unit that already exists.
    pub async fn insert_unit(&self, name: &str, running: bool) {
        let id = self.next_id();
        self.units.lock().await.insert(
            name.to_string(),
            MockUnit {
                id,
                running,
                spec: None,
            },
        );
    }

    /// Current state of a unit, `NotCreated` if absent.
    pub async fn unit_state(&self, name: &str) -> UnitState {
        match self.units.lock().await.get(name) {
            Some(unit) if unit.running => UnitState::Running,
            Some(_) => UnitState::Stopped,
            None => UnitState::NotCreated,
        }
    }

    /// The spec a unit was created from, if it was created through the mock.
    pub async fn unit_spec(&self, name: &str) -> Option<UnitSpec> {
        self.units
            .lock()
            .await
            .get(name)
            .and_then(|u| u.spec.clone())
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn start_calls(&self) -> usize {
        self.start_calls.load(Ordering::SeqCst)
    }

    pub fn stop_calls(&self) -> usize {
        self.stop_calls.load(Ordering::SeqCst)
    }

    pub fn remove_calls(&self) -> usize {
        self.remove_calls.load(Ordering::SeqCst)
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    fn next_id(&self) -> String {
        let counter = self.id_counter.fetch_add(1, Ordering::SeqCst);
        format!("{:012x}", counter + 1)
    }

    /// Common prelude: simulated latency, then reachability.
    async fn enter(&self) -> Result<(), TransportError> {
        let delay = *self.delay.lock().await;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if !self.reachable.load(Ordering::SeqCst) {
            return Err(TransportError::Connect(format!(
                "[MOCK] {} unreachable",
                self.name
            )));
        }
        Ok(())
    }

    fn observe(name: &str, unit: &MockUnit) -> UnitObservation {
        let (image, ports) = match &unit.spec {
            Some(spec) => (
                spec.image.clone(),
                spec.port_bindings
                    .iter()
                    .map(|b| format!("0.0.0.0:{}->{}/tcp", b.host_port, b.container_port))
                    .collect(),
            ),
            None => ("mock:latest".to_string(), Vec::new()),
        };
        UnitObservation {
            unit_id: unit.id.clone(),
            unit_name: name.to_string(),
            state: if unit.running {
                UnitState::Running
            } else {
                UnitState::Stopped
            },
            ports,
            image,
            created_at: Some(Utc::now()),
        }
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RuntimeTransport for MockTransport {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn ping(&self) -> Result<(), TransportError> {
        self.enter().await
    }

    async fn list_units(&self, name_filter: &str) -> Result<Vec<UnitObservation>, TransportError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        self.enter().await?;
        let units = self.units.lock().await;
        Ok(units
            .iter()
            .filter(|(name, _)| name.contains(name_filter))
            .map(|(name, unit)| Self::observe(name, unit))
            .collect())
    }

    async fn get_unit(&self, name: &str) -> Result<UnitObservation, TransportError> {
        self.enter().await?;
        let units = self.units.lock().await;
        units
            .get(name)
            .map(|unit| Self::observe(name, unit))
            .ok_or_else(|| TransportError::NotFound(name.to_string()))
    }

    async fn create_unit(&self, spec: &UnitSpec) -> Result<UnitHandle, TransportError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        self.enter().await?;

        if self.fail_creates.load(Ordering::SeqCst) {
            return Err(TransportError::Rejected {
                status: 500,
                message: "[MOCK] create configured to fail".to_string(),
            });
        }

        let mut units = self.units.lock().await;
        if units.contains_key(&spec.name) {
            return Err(TransportError::Conflict(spec.name.clone()));
        }

        let id = self.next_id();
        info!(unit_name = %spec.name, image = %spec.image, "[MOCK] Creating unit");
        units.insert(
            spec.name.clone(),
            MockUnit {
                id: id.clone(),
                running: false,
                spec: Some(spec.clone()),
            },
        );

        Ok(UnitHandle {
            unit_id: id,
            unit_name: spec.name.clone(),
        })
    }

    async fn start_unit(&self, name: &str) -> Result<(), TransportError> {
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        self.enter().await?;
        let mut units = self.units.lock().await;
        let unit = units
            .get_mut(name)
            .ok_or_else(|| TransportError::NotFound(name.to_string()))?;
        unit.running = true;
        debug!(unit_name = %name, "[MOCK] Unit started");
        Ok(())
    }

    async fn stop_unit(&self, name: &str, _grace: Duration) -> Result<(), TransportError> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        self.enter().await?;
        let mut units = self.units.lock().await;
        let unit = units
            .get_mut(name)
            .ok_or_else(|| TransportError::NotFound(name.to_string()))?;
        if self.fail_stops.load(Ordering::SeqCst) {
            return Err(TransportError::Rejected {
                status: 500,
                message: format!("[MOCK] cannot stop container {name}: permission denied"),
            });
        }
        unit.running = false;
        debug!(unit_name = %name, "[MOCK] Unit stopped");
        Ok(())
    }

    async fn remove_unit(&self, name: &str, force: bool) -> Result<(), TransportError> {
        self.remove_calls.fetch_add(1, Ordering::SeqCst);
        self.enter().await?;
        let mut units = self.units.lock().await;
        match units.get(name) {
            None => Err(TransportError::NotFound(name.to_string())),
            Some(unit) if unit.running && !force => Err(TransportError::Rejected {
                status: 409,
                message: format!("[MOCK] cannot remove running unit {name}"),
            }),
            Some(_) => {
                units.remove(name);
                debug!(unit_name = %name, "[MOCK] Unit removed");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(name: &str) -> UnitSpec {
        UnitSpec {
            name: name.to_string(),
            image: "test:latest".to_string(),
            env: Default::default(),
            labels: Default::default(),
            network: None,
            port_bindings: vec![],
            restart_policy: Default::default(),
        }
    }

    #[tokio::test]
    async fn test_mock_lifecycle() {
        let mock = MockTransport::new();

        mock.create_unit(&spec("chatbot_1")).await.unwrap();
        assert_eq!(mock.unit_state("chatbot_1").await, UnitState::Stopped);

        mock.start_unit("chatbot_1").await.unwrap();
        assert_eq!(mock.unit_state("chatbot_1").await, UnitState::Running);

        mock.remove_unit("chatbot_1", true).await.unwrap();
        assert_eq!(mock.unit_state("chatbot_1").await, UnitState::NotCreated);
    }

    #[tokio::test]
    async fn test_mock_duplicate_create_conflicts() {
        let mock = MockTransport::new();
        mock.create_unit(&spec("chatbot_1")).await.unwrap();
        let err = mock.create_unit(&spec("chatbot_1")).await.unwrap_err();
        assert!(matches!(err, TransportError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_mock_unreachable() {
        let mock = MockTransport::unreachable();
        let err = mock.list_units("chatbot_").await.unwrap_err();
        assert!(matches!(err, TransportError::Connect(_)));
    }
}
