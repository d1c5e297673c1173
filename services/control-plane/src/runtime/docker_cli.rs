//! Docker command-line transport.
//!
//! Used when the Engine API socket is not reachable from this process but a
//! `docker` binary is (remote `DOCKER_HOST`, socket proxies, rootless setups).
//! Output parsing is defensive: the CLI's text formats change between
//! releases.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tenantry_reconcile::UnitObservation;
use tokio::process::Command;
use tracing::debug;

use super::docker;
use super::{RuntimeTransport, TransportError, UnitHandle, UnitSpec};

/// Output of a finished CLI invocation.
struct CliOutput {
    stdout: String,
}

/// Transport shelling out to the `docker` binary.
pub struct DockerCliTransport {
    program: PathBuf,
}

impl DockerCliTransport {
    /// Create a transport invoking `program` (usually just `docker`).
    pub fn new<P: AsRef<Path>>(program: P) -> Self {
        Self {
            program: program.as_ref().to_path_buf(),
        }
    }

    /// Run the CLI. The child is killed if the returned future is dropped.
    async fn run(&self, args: &[String], target: &str) -> Result<CliOutput, TransportError> {
        debug!(
            program = %self.program.display(),
            command = args.first().map(String::as_str).unwrap_or_default(),
            unit = target,
            "Running docker CLI"
        );

        let output = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                TransportError::Connect(format!(
                    "failed to execute {}: {e}",
                    self.program.display()
                ))
            })?;

        if output.status.success() {
            return Ok(CliOutput {
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            });
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        Err(classify_failure(
            output.status.code().unwrap_or(-1),
            &stderr,
            target,
        ))
    }
}

/// Map a failed invocation onto a transport error using its stderr text.
fn classify_failure(code: i32, stderr: &str, target: &str) -> TransportError {
    let lower = stderr.to_lowercase();
    if lower.contains("no such container") || lower.contains("no such object") {
        TransportError::NotFound(target.to_string())
    } else if lower.contains("is already in use") || lower.contains("conflict") {
        TransportError::Conflict(target.to_string())
    } else if lower.contains("cannot connect to the docker daemon")
        || lower.contains("error during connect")
        || lower.contains("permission denied while trying to connect")
    {
        TransportError::Connect(stderr.to_string())
    } else {
        TransportError::Rejected {
            status: u16::try_from(code).unwrap_or(0),
            message: stderr.to_string(),
        }
    }
}

/// Arguments for `docker create`.
fn create_args(spec: &UnitSpec) -> Vec<String> {
    let mut args = vec![
        "create".to_string(),
        "--name".to_string(),
        spec.name.clone(),
        "--restart".to_string(),
        spec.restart_policy.as_str().to_string(),
    ];
    if let Some(network) = &spec.network {
        args.push("--network".to_string());
        args.push(network.clone());
    }
    for (key, value) in &spec.labels {
        args.push("--label".to_string());
        args.push(format!("{key}={value}"));
    }
    for (key, value) in &spec.env {
        args.push("--env".to_string());
        args.push(format!("{key}={value}"));
    }
    for binding in &spec.port_bindings {
        args.push("--publish".to_string());
        args.push(format!("{}:{}", binding.host_port, binding.container_port));
    }
    args.push(spec.image.clone());
    args
}

#[async_trait]
impl RuntimeTransport for DockerCliTransport {
    fn name(&self) -> &'static str {
        "cli"
    }

    async fn ping(&self) -> Result<(), TransportError> {
        let args = [
            "version".to_string(),
            "--format".to_string(),
            "{{.Server.Version}}".to_string(),
        ];
        self.run(&args, "daemon").await.map(|_| ())
    }

    async fn list_units(&self, name_filter: &str) -> Result<Vec<UnitObservation>, TransportError> {
        let args = [
            "ps".to_string(),
            "--all".to_string(),
            "--no-trunc".to_string(),
            "--filter".to_string(),
            format!("name={name_filter}"),
            "--format".to_string(),
            "{{json .}}".to_string(),
        ];
        let output = self.run(&args, name_filter).await?;
        Ok(docker::parse_ps_output(&output.stdout))
    }

    async fn get_unit(&self, name: &str) -> Result<UnitObservation, TransportError> {
        let args = [
            "inspect".to_string(),
            "--type".to_string(),
            "container".to_string(),
            name.to_string(),
        ];
        let output = self.run(&args, name).await?;
        docker::parse_inspect_output(&output.stdout, name)
            .ok_or_else(|| TransportError::Protocol(format!("unparseable inspect output for {name}")))
    }

    async fn create_unit(&self, spec: &UnitSpec) -> Result<UnitHandle, TransportError> {
        let output = self.run(&create_args(spec), &spec.name).await?;
        // Image pull progress may precede the ID; the ID is the last line.
        let unit_id = output
            .stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .last()
            .map(docker::short_id)
            .unwrap_or_default();

        Ok(UnitHandle {
            unit_id,
            unit_name: spec.name.clone(),
        })
    }

    async fn start_unit(&self, name: &str) -> Result<(), TransportError> {
        self.run(&["start".to_string(), name.to_string()], name)
            .await
            .map(|_| ())
    }

    async fn stop_unit(&self, name: &str, grace: Duration) -> Result<(), TransportError> {
        let args = [
            "stop".to_string(),
            "-t".to_string(),
            grace.as_secs().to_string(),
            name.to_string(),
        ];
        self.run(&args, name).await.map(|_| ())
    }

    async fn remove_unit(&self, name: &str, force: bool) -> Result<(), TransportError> {
        let mut args = vec!["rm".to_string()];
        if force {
            args.push("--force".to_string());
        }
        args.push(name.to_string());
        self.run(&args, name).await.map(|_| ())
    }
}
