//! Runtime client with transport fallback.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tenantry_reconcile::UnitObservation;
use tracing::{debug, info, warn};

use super::{
    DockerApiTransport, DockerCliTransport, RuntimeConfig, RuntimeError, RuntimeTimeouts,
    RuntimeTransport, TransportError, UnitHandle, UnitSpec,
};

/// Client over an ordered list of transports.
///
/// Reads (list, inspect) try each transport in turn until one answers.
/// Writes (create, start, stop, remove) also fall through when a transport
/// cannot be reached, but a write that times out is reported as
/// [`RuntimeError::Timeout`] straight away: the daemon may have acted on it,
/// so it is never replayed on another transport.
#[derive(Clone)]
pub struct RuntimeClient {
    transports: Vec<Arc<dyn RuntimeTransport>>,
    timeouts: RuntimeTimeouts,
    stop_grace: Duration,
}

impl RuntimeClient {
    /// Create a client over `transports`, highest priority first.
    pub fn new(transports: Vec<Arc<dyn RuntimeTransport>>, timeouts: RuntimeTimeouts) -> Self {
        Self {
            transports,
            timeouts,
            stop_grace: Duration::from_secs(10),
        }
    }

    /// Build the API-then-CLI client described by `config`.
    pub fn from_config(config: &RuntimeConfig) -> Self {
        let mut transports: Vec<Arc<dyn RuntimeTransport>> = Vec::new();
        if config.use_api {
            transports.push(Arc::new(DockerApiTransport::new(&config.docker_socket)));
        }
        if config.use_cli {
            transports.push(Arc::new(DockerCliTransport::new(&config.docker_cli)));
        }
        if transports.is_empty() {
            warn!("No runtime transports enabled; runtime calls will report unavailable");
        }

        Self::new(transports, config.timeouts).with_stop_grace(config.stop_grace)
    }

    pub fn with_stop_grace(mut self, stop_grace: Duration) -> Self {
        self.stop_grace = stop_grace;
        self
    }

    /// Names of the configured transports, in priority order.
    pub fn transport_names(&self) -> Vec<&'static str> {
        self.transports.iter().map(|t| t.name()).collect()
    }

    /// Find the first transport that can reach the daemon.
    pub async fn probe(&self) -> Result<&'static str, RuntimeError> {
        let mut failures = Vec::new();
        for transport in &self.transports {
            match tokio::time::timeout(self.timeouts.probe, transport.ping()).await {
                Ok(Ok(())) => return Ok(transport.name()),
                Ok(Err(e)) => failures.push(format!("{}: {e}", transport.name())),
                Err(_) => failures.push(format!("{}: ping timed out", transport.name())),
            }
        }
        Err(unavailable(failures))
    }

    /// List units whose name contains `name_filter`.
    pub async fn list_units(&self, name_filter: &str) -> Result<Vec<UnitObservation>, RuntimeError> {
        let filter = name_filter.to_string();
        self.read("list", self.timeouts.list, name_filter, move |t| {
            let filter = filter.clone();
            async move { t.list_units(&filter).await }
        })
        .await
    }

    /// Inspect one unit.
    pub async fn get_unit(&self, name: &str) -> Result<UnitObservation, RuntimeError> {
        let owned = name.to_string();
        self.read("inspect", self.timeouts.inspect, name, move |t| {
            let name = owned.clone();
            async move { t.get_unit(&name).await }
        })
        .await
    }

    /// Create a unit. Does not start it.
    pub async fn create_unit(&self, spec: &UnitSpec) -> Result<UnitHandle, RuntimeError> {
        let handle = self
            .write("create", self.timeouts.create, &spec.name, |t| {
                let spec = spec.clone();
                async move { t.create_unit(&spec).await }
            })
            .await?;
        info!(unit_name = %handle.unit_name, unit_id = %handle.unit_id, "Unit created");
        Ok(handle)
    }

    pub async fn start_unit(&self, name: &str) -> Result<(), RuntimeError> {
        let owned = name.to_string();
        self.write("start", self.timeouts.start, name, move |t| {
            let name = owned.clone();
            async move { t.start_unit(&name).await }
        })
        .await
    }

    /// Stop a unit with the configured grace period.
    pub async fn stop_unit(&self, name: &str) -> Result<(), RuntimeError> {
        let grace = self.stop_grace;
        let owned = name.to_string();
        self.write("stop", grace + self.timeouts.stop_slack, name, move |t| {
            let name = owned.clone();
            async move { t.stop_unit(&name, grace).await }
        })
        .await
    }

    pub async fn remove_unit(&self, name: &str, force: bool) -> Result<(), RuntimeError> {
        let owned = name.to_string();
        self.write("remove", self.timeouts.remove, name, move |t| {
            let name = owned.clone();
            async move { t.remove_unit(&name, force).await }
        })
        .await
    }

    async fn read<T, F, Fut>(
        &self,
        operation: &'static str,
        bound: Duration,
        target: &str,
        call: F,
    ) -> Result<T, RuntimeError>
    where
        F: Fn(Arc<dyn RuntimeTransport>) -> Fut,
        Fut: Future<Output = Result<T, TransportError>>,
    {
        let mut failures = Vec::new();
        for transport in &self.transports {
            debug!(transport = transport.name(), operation, unit = target, "Runtime call");
            let outcome = match tokio::time::timeout(bound, call(Arc::clone(transport))).await {
                Ok(outcome) => outcome,
                Err(_) => Err(TransportError::Timeout {
                    operation,
                    elapsed: bound,
                }),
            };

            match outcome {
                Ok(value) => return Ok(value),
                Err(e) if e.is_definitive() => return Err(definitive(operation, target, e)),
                Err(e) => {
                    warn!(
                        transport = transport.name(),
                        operation,
                        unit = target,
                        error = %e,
                        "Runtime transport failed, trying next"
                    );
                    failures.push(format!("{}: {e}", transport.name()));
                }
            }
        }
        Err(unavailable(failures))
    }

    async fn write<T, F, Fut>(
        &self,
        operation: &'static str,
        bound: Duration,
        target: &str,
        call: F,
    ) -> Result<T, RuntimeError>
    where
        F: Fn(Arc<dyn RuntimeTransport>) -> Fut,
        Fut: Future<Output = Result<T, TransportError>>,
    {
        let mut failures = Vec::new();
        for transport in &self.transports {
            debug!(transport = transport.name(), operation, unit = target, "Runtime call");
            let outcome = match tokio::time::timeout(bound, call(Arc::clone(transport))).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    warn!(
                        transport = transport.name(),
                        operation,
                        unit = target,
                        timeout_ms = bound.as_millis() as u64,
                        "Runtime write timed out; outcome unknown"
                    );
                    return Err(RuntimeError::Timeout {
                        operation,
                        unit: target.to_string(),
                    });
                }
            };

            match outcome {
                Ok(value) => return Ok(value),
                Err(e) if e.is_definitive() => return Err(definitive(operation, target, e)),
                Err(e) => {
                    warn!(
                        transport = transport.name(),
                        operation,
                        unit = target,
                        error = %e,
                        "Runtime transport failed, trying next"
                    );
                    failures.push(format!("{}: {e}", transport.name()));
                }
            }
        }
        Err(unavailable(failures))
    }
}

impl std::fmt::Debug for RuntimeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeClient")
            .field("transports", &self.transport_names())
            .field("timeouts", &self.timeouts)
            .field("stop_grace", &self.stop_grace)
            .finish()
    }
}

fn definitive(operation: &'static str, target: &str, err: TransportError) -> RuntimeError {
    match err {
        TransportError::NotFound(name) => RuntimeError::UnitNotFound(name),
        TransportError::Conflict(name) => RuntimeError::AlreadyExists(name),
        TransportError::Rejected { message, .. } => RuntimeError::Rejected {
            operation,
            unit: target.to_string(),
            message,
        },
        other => RuntimeError::Unavailable(other.to_string()),
    }
}

fn unavailable(failures: Vec<String>) -> RuntimeError {
    if failures.is_empty() {
        RuntimeError::Unavailable("no runtime transports configured".to_string())
    } else {
        RuntimeError::Unavailable(failures.join("; "))
    }
}
