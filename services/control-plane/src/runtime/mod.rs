//! Runtime client abstraction.
//!
//! Tenant units are Docker containers. The control plane reaches the Docker
//! daemon through two transports, tried in priority order:
//!
//! - `api`: Docker Engine API over the daemon's unix socket
//! - `cli`: the `docker` binary, parsing its JSON output
//!
//! [`RuntimeClient`] owns the ordered transport list, applies per-operation
//! timeouts and translates transport failures into [`RuntimeError`], so
//! nothing above this module sees a transport-specific error or shape.
//!
//! ## Components
//!
//! - `transport`: the [`RuntimeTransport`] trait
//! - `docker`: Docker JSON models shared by both transports
//! - `docker_api`: unix socket HTTP transport
//! - `docker_cli`: command-line transport
//! - `client`: fallback and timeout handling
//! - `mock`: in-memory transport for tests and development

mod client;
mod docker;
mod docker_api;
mod docker_cli;
mod error;
mod mock;
mod transport;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

pub use client::RuntimeClient;
pub use docker_api::DockerApiTransport;
pub use docker_cli::DockerCliTransport;
pub use error::{RuntimeError, TransportError};
pub use mock::MockTransport;
pub use transport::RuntimeTransport;

/// Restart policy applied to a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RestartPolicy {
    No,
    Always,
    #[default]
    UnlessStopped,
}

impl RestartPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::No => "no",
            Self::Always => "always",
            Self::UnlessStopped => "unless-stopped",
        }
    }
}

/// A host port published to a container port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortBinding {
    pub host_port: u16,
    pub container_port: u16,
}

/// Everything needed to create a unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitSpec {
    pub name: String,
    pub image: String,
    pub env: BTreeMap<String, String>,
    pub labels: BTreeMap<String, String>,
    /// Network to attach to (the reverse proxy's overlay).
    pub network: Option<String>,
    pub port_bindings: Vec<PortBinding>,
    pub restart_policy: RestartPolicy,
}

/// Handle returned by a successful create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitHandle {
    /// Container ID as reported by the runtime.
    pub unit_id: String,
    pub unit_name: String,
}

/// Upper bounds for each runtime operation.
#[derive(Debug, Clone, Copy)]
pub struct RuntimeTimeouts {
    pub probe: Duration,
    pub list: Duration,
    pub inspect: Duration,
    pub create: Duration,
    pub start: Duration,
    /// Added on top of the stop grace period.
    pub stop_slack: Duration,
    pub remove: Duration,
}

impl Default for RuntimeTimeouts {
    fn default() -> Self {
        Self {
            probe: Duration::from_secs(5),
            list: Duration::from_secs(10),
            inspect: Duration::from_secs(5),
            create: Duration::from_secs(30),
            start: Duration::from_secs(15),
            stop_slack: Duration::from_secs(10),
            remove: Duration::from_secs(15),
        }
    }
}

impl RuntimeTimeouts {
    /// Apply `TENANTRY_{OP}_TIMEOUT_SECS` overrides. Unset or unparsable
    /// values keep the current bound.
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let secs = |name: &str| {
            lookup(name)
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs)
        };
        for (name, bound) in [
            ("TENANTRY_PROBE_TIMEOUT_SECS", &mut self.probe),
            ("TENANTRY_LIST_TIMEOUT_SECS", &mut self.list),
            ("TENANTRY_INSPECT_TIMEOUT_SECS", &mut self.inspect),
            ("TENANTRY_CREATE_TIMEOUT_SECS", &mut self.create),
            ("TENANTRY_START_TIMEOUT_SECS", &mut self.start),
            ("TENANTRY_STOP_SLACK_TIMEOUT_SECS", &mut self.stop_slack),
            ("TENANTRY_REMOVE_TIMEOUT_SECS", &mut self.remove),
        ] {
            if let Some(value) = secs(name) {
                *bound = value;
            }
        }
        self
    }
}

/// Runtime configuration.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Docker daemon socket path.
    pub docker_socket: String,

    /// Docker CLI binary.
    pub docker_cli: PathBuf,

    /// Enable the Engine API transport.
    pub use_api: bool,

    /// Enable the CLI fallback transport.
    pub use_cli: bool,

    /// Grace period given to a unit before it is killed on stop.
    pub stop_grace: Duration,

    pub timeouts: RuntimeTimeouts,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            docker_socket: "/var/run/docker.sock".to_string(),
            docker_cli: PathBuf::from("docker"),
            use_api: true,
            use_cli: true,
            stop_grace: Duration::from_secs(10),
            timeouts: RuntimeTimeouts::default(),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let docker_socket = std::env::var("TENANTRY_DOCKER_SOCKET")
            .ok()
            .map(|s| s.trim_start_matches("unix://").to_string())
            .unwrap_or(defaults.docker_socket);

        let docker_cli = std::env::var("TENANTRY_DOCKER_CLI")
            .map(PathBuf::from)
            .unwrap_or(defaults.docker_cli);

        let transports = std::env::var("TENANTRY_RUNTIME_TRANSPORTS")
            .unwrap_or_else(|_| "api,cli".to_string())
            .to_lowercase();
        let use_api = transports.split(',').any(|t| t.trim() == "api");
        let use_cli = transports.split(',').any(|t| t.trim() == "cli");

        let stop_grace = env_secs("TENANTRY_STOP_GRACE_SECS").unwrap_or(defaults.stop_grace);
        let timeouts = defaults
            .timeouts
            .with_overrides(|name| std::env::var(name).ok());

        Self {
            docker_socket,
            docker_cli,
            use_api,
            use_cli,
            stop_grace,
            timeouts,
        }
    }
}

fn env_secs(name: &str) -> Option<Duration> {
    std::env::var(name)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .map(Duration::from_secs)
}
