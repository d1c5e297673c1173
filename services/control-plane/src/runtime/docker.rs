//! Docker JSON models shared by the API and CLI transports.
//!
//! Every field is optional on the wire. Docker has added, renamed and
//! reformatted fields across releases, so missing data degrades the
//! observation instead of failing the parse.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use tenantry_reconcile::{UnitObservation, UnitState};
use tracing::debug;

use super::UnitSpec;

/// Container IDs are reported in short form.
const SHORT_ID_LEN: usize = 12;

pub(super) fn short_id(id: &str) -> String {
    id.get(..SHORT_ID_LEN).unwrap_or(id).to_string()
}

// =============================================================================
// Engine API: GET /containers/json
// =============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(super) struct ContainerSummary {
    #[serde(rename = "Id")]
    id: String,
    #[serde(rename = "Names")]
    names: Vec<String>,
    #[serde(rename = "Image")]
    image: String,
    #[serde(rename = "State")]
    state: String,
    #[serde(rename = "Status")]
    status: String,
    #[serde(rename = "Ports")]
    ports: Vec<PortSummary>,
    #[serde(rename = "Created")]
    created: i64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PortSummary {
    #[serde(rename = "IP")]
    ip: Option<String>,
    #[serde(rename = "PrivatePort")]
    private_port: u16,
    #[serde(rename = "PublicPort")]
    public_port: Option<u16>,
    #[serde(rename = "Type")]
    protocol: String,
}

impl ContainerSummary {
    pub(super) fn into_observation(self) -> Option<UnitObservation> {
        let unit_name = self
            .names
            .iter()
            .map(|n| n.trim_start_matches('/'))
            .find(|n| !n.is_empty())?
            .to_string();

        let ports = self
            .ports
            .iter()
            .map(|p| match p.public_port {
                Some(public) => format!(
                    "{}:{}->{}/{}",
                    p.ip.as_deref().unwrap_or("0.0.0.0"),
                    public,
                    p.private_port,
                    p.protocol
                ),
                None => format!("{}/{}", p.private_port, p.protocol),
            })
            .collect();

        Some(UnitObservation {
            unit_id: short_id(&self.id),
            unit_name,
            state: state_or_status(&self.state, &self.status),
            ports,
            image: self.image,
            created_at: DateTime::<Utc>::from_timestamp(self.created, 0)
                .filter(|_| self.created > 0),
        })
    }
}

// =============================================================================
// Engine API / CLI: container inspect
// =============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(super) struct ContainerInspect {
    #[serde(rename = "Id")]
    id: String,
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Created")]
    created: String,
    #[serde(rename = "State")]
    state: InspectState,
    #[serde(rename = "Config")]
    config: InspectConfig,
    #[serde(rename = "NetworkSettings")]
    network_settings: InspectNetwork,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct InspectState {
    #[serde(rename = "Status")]
    status: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct InspectConfig {
    #[serde(rename = "Image")]
    image: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct InspectNetwork {
    #[serde(rename = "Ports")]
    ports: Option<HashMap<String, Option<Vec<HostBinding>>>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct HostBinding {
    #[serde(rename = "HostIp")]
    host_ip: String,
    #[serde(rename = "HostPort")]
    host_port: String,
}

impl ContainerInspect {
    pub(super) fn into_observation(self, requested_name: &str) -> UnitObservation {
        let unit_name = match self.name.trim_start_matches('/') {
            "" => requested_name.to_string(),
            name => name.to_string(),
        };

        let mut ports: Vec<String> = Vec::new();
        for (container_port, bindings) in self.network_settings.ports.unwrap_or_default() {
            match bindings {
                Some(bindings) if !bindings.is_empty() => {
                    for b in bindings {
                        let ip = if b.host_ip.is_empty() {
                            "0.0.0.0"
                        } else {
                            b.host_ip.as_str()
                        };
                        ports.push(format!("{ip}:{}->{container_port}", b.host_port));
                    }
                }
                _ => ports.push(container_port),
            }
        }
        ports.sort();

        UnitObservation {
            unit_id: short_id(&self.id),
            unit_name,
            state: UnitState::from_docker_state(&self.state.status),
            ports,
            image: self.config.image,
            created_at: DateTime::parse_from_rfc3339(&self.created)
                .ok()
                .map(|t| t.with_timezone(&Utc)),
        }
    }
}

/// Parse `docker inspect` output (a JSON array with one element).
pub(super) fn parse_inspect_output(stdout: &str, requested_name: &str) -> Option<UnitObservation> {
    let mut items: Vec<ContainerInspect> = serde_json::from_str(stdout.trim()).ok()?;
    if items.is_empty() {
        return None;
    }
    Some(items.swap_remove(0).into_observation(requested_name))
}

// =============================================================================
// CLI: docker ps --format '{{json .}}'
// =============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PsLine {
    #[serde(rename = "ID")]
    id: String,
    #[serde(rename = "Names")]
    names: String,
    #[serde(rename = "Image")]
    image: String,
    /// Absent before Docker 20.10.
    #[serde(rename = "State")]
    state: String,
    #[serde(rename = "Status")]
    status: String,
    #[serde(rename = "Ports")]
    ports: String,
    #[serde(rename = "CreatedAt")]
    created_at: String,
}

impl PsLine {
    fn into_observation(self) -> Option<UnitObservation> {
        let unit_name = self
            .names
            .split(',')
            .map(str::trim)
            .find(|n| !n.is_empty())?
            .to_string();

        Some(UnitObservation {
            unit_id: short_id(&self.id),
            unit_name,
            state: state_or_status(&self.state, &self.status),
            ports: self
                .ports
                .split(", ")
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(str::to_string)
                .collect(),
            image: self.image,
            created_at: parse_cli_timestamp(&self.created_at),
        })
    }
}

/// Parse `docker ps` JSON output.
///
/// Accepts one object per line, or a single JSON array (some
/// Docker-compatible CLIs). Malformed lines and entries without a name are
/// skipped.
pub(super) fn parse_ps_output(stdout: &str) -> Vec<UnitObservation> {
    let trimmed = stdout.trim();
    if trimmed.starts_with('[') {
        if let Ok(lines) = serde_json::from_str::<Vec<PsLine>>(trimmed) {
            return lines
                .into_iter()
                .filter_map(PsLine::into_observation)
                .collect();
        }
    }

    trimmed
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(|line| match serde_json::from_str::<PsLine>(line) {
            Ok(parsed) => parsed.into_observation(),
            Err(e) => {
                debug!(error = %e, "Skipping malformed docker ps line");
                None
            }
        })
        .collect()
}

/// Parse the CLI's `2024-01-15 10:30:00 +0000 UTC` timestamps.
fn parse_cli_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let mut parts = raw.split_whitespace();
    let (date, time, offset) = (parts.next()?, parts.next()?, parts.next()?);
    let with_offset = format!("{date} {time} {offset}");
    if let Ok(parsed) = DateTime::parse_from_str(&with_offset, "%Y-%m-%d %H:%M:%S %z") {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(&format!("{date} {time}"), "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Prefer the machine `State`; fall back to the human `Status` text.
fn state_or_status(state: &str, status: &str) -> UnitState {
    if !state.trim().is_empty() {
        return UnitState::from_docker_state(state);
    }
    let status = status.trim();
    if status.starts_with("Up") {
        UnitState::Running
    } else if status.starts_with("Exited") || status.starts_with("Created") {
        UnitState::Stopped
    } else {
        UnitState::Unknown
    }
}

// =============================================================================
// Engine API: POST /containers/create body
// =============================================================================

pub(super) fn create_body(spec: &UnitSpec) -> serde_json::Value {
    let env: Vec<String> = spec.env.iter().map(|(k, v)| format!("{k}={v}")).collect();

    let mut exposed: BTreeMap<String, serde_json::Value> = BTreeMap::new();
    let mut bindings: BTreeMap<String, Vec<serde_json::Value>> = BTreeMap::new();
    for binding in &spec.port_bindings {
        let key = format!("{}/tcp", binding.container_port);
        exposed.insert(key.clone(), json!({}));
        bindings
            .entry(key)
            .or_default()
            .push(json!({ "HostPort": binding.host_port.to_string() }));
    }

    let mut host_config = json!({
        "RestartPolicy": { "Name": spec.restart_policy.as_str() },
        "PortBindings": bindings,
    });
    if let Some(network) = &spec.network {
        host_config["NetworkMode"] = json!(network);
    }

    json!({
        "Image": spec.image,
        "Env": env,
        "Labels": spec.labels,
        "ExposedPorts": exposed,
        "HostConfig": host_config,
    })
}

// =============================================================================
// Engine API: POST /images/create
// =============================================================================

/// Split an image reference into the `fromImage` and `tag` query values.
///
/// Untagged references pull `latest`; digest references are passed whole.
pub(super) fn split_image_ref(image: &str) -> (&str, Option<&str>) {
    if image.contains('@') {
        return (image, None);
    }
    let name_start = image.rfind('/').map_or(0, |i| i + 1);
    match image[name_start..].rfind(':') {
        Some(i) => {
            let colon = name_start + i;
            (&image[..colon], Some(&image[colon + 1..]))
        }
        None => (image, Some("latest")),
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PullProgress {
    error: Option<String>,
}

/// First error reported in a pull progress stream.
///
/// The daemon answers 200 as soon as the pull starts, so failures only
/// show up as `{"error": ...}` lines in the body.
pub(super) fn pull_error(body: &[u8]) -> Option<String> {
    String::from_utf8_lossy(body)
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(|line| serde_json::from_str::<PullProgress>(line).ok())
        .find_map(|progress| progress.error)
}
