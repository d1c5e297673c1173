//! Reconciliation primitives.
//!
//! This library joins the registry's view of tenants (desired state) with a
//! snapshot of runtime units (observed state). Key concepts:
//!
//! - **Desired state**: every registered tenant should own one unit.
//! - **Observed state**: whatever the runtime reported on this request.
//! - **Convergence**: whether the observed unit matches what the tenant needs.
//!
//! # Invariants
//!
//! - One report entry per tenant, in input order, whether or not the runtime
//!   answered
//! - Units carrying the tenant prefix without a tenant are orphans; they are
//!   reported separately and never appear as entries
//! - Decisions are deterministic given the same inputs

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tenantry_id::{UnitName, UNIT_NAME_PREFIX};

/// Observed state of a single runtime unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitState {
    Running,
    Stopped,
    NotCreated,
    Unknown,
}

impl UnitState {
    /// Map a Docker container state string onto a unit state.
    ///
    /// Unrecognised values map to `Unknown` rather than failing.
    pub fn from_docker_state(state: &str) -> Self {
        match state.trim().to_ascii_lowercase().as_str() {
            "running" | "restarting" => Self::Running,
            "created" | "exited" | "paused" | "dead" | "removing" => Self::Stopped,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::NotCreated => "not_created",
            Self::Unknown => "unknown",
        }
    }
}

/// A runtime unit as reported by the control plane.
///
/// Produced fresh for every query and never cached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitObservation {
    /// Short container ID (12 hex chars), empty if the transport omitted it.
    pub unit_id: String,
    pub unit_name: String,
    pub state: UnitState,
    /// Published ports in `host_ip:host_port->container_port/proto` form.
    pub ports: Vec<String>,
    pub image: String,
    pub created_at: Option<DateTime<Utc>>,
}

/// Result of one bulk listing call.
#[derive(Debug, Clone)]
pub enum Observed {
    Available(Vec<UnitObservation>),
    Unavailable,
}

/// Status reported for a tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TenantStatus {
    Running,
    Stopped,
    NotCreated,
    /// Registered, but the runtime unit could not be created.
    ProvisioningFailed,
    Unknown,
}

impl From<UnitState> for TenantStatus {
    fn from(state: UnitState) -> Self {
        match state {
            UnitState::Running => Self::Running,
            UnitState::Stopped => Self::Stopped,
            UnitState::NotCreated => Self::NotCreated,
            UnitState::Unknown => Self::Unknown,
        }
    }
}

/// Convergence status for a tenant's unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConvergenceStatus {
    /// The unit exists and is running.
    Converged,

    /// The unit is missing, stopped or failed to provision.
    Diverged,

    /// Status is unknown (runtime did not answer).
    Unknown,
}

impl ConvergenceStatus {
    /// Returns true if the resource has converged.
    pub fn is_converged(&self) -> bool {
        matches!(self, Self::Converged)
    }

    fn for_status(status: TenantStatus) -> Self {
        match status {
            TenantStatus::Running => Self::Converged,
            TenantStatus::Stopped | TenantStatus::NotCreated | TenantStatus::ProvisioningFailed => {
                Self::Diverged
            }
            TenantStatus::Unknown => Self::Unknown,
        }
    }
}

/// What a tenant expects from the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpectedUnit {
    pub unit_name: UnitName,

    /// The last provisioning attempt failed.
    pub provisioning_failed: bool,
}

/// One tenant joined with its observation.
#[derive(Debug, Clone)]
pub struct ReportEntry<T> {
    pub tenant: T,
    pub unit_name: UnitName,
    pub status: TenantStatus,
    pub convergence: ConvergenceStatus,
    pub observation: Option<UnitObservation>,
}

/// Reconciliation report.
#[derive(Debug, Clone)]
pub struct Report<T> {
    pub entries: Vec<ReportEntry<T>>,

    /// Prefixed units with no matching tenant, sorted by name.
    pub orphans: Vec<UnitObservation>,

    pub runtime_available: bool,
}

/// Aggregate counts over a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ReportStats {
    pub total_tenants: usize,
    pub running_units: usize,
    pub total_units: usize,
    pub stopped_units: usize,
    pub orphaned_units: usize,
    pub runtime_available: bool,
}

impl<T> Report<T> {
    /// Count tenants and units.
    ///
    /// Unit totals cover every prefixed unit, orphans included.
    pub fn stats(&self) -> ReportStats {
        let units = self
            .entries
            .iter()
            .filter_map(|e| e.observation.as_ref())
            .chain(self.orphans.iter());

        let mut total_units = 0;
        let mut running_units = 0;
        for unit in units {
            total_units += 1;
            if unit.state == UnitState::Running {
                running_units += 1;
            }
        }

        ReportStats {
            total_tenants: self.entries.len(),
            running_units,
            total_units,
            stopped_units: total_units.saturating_sub(running_units),
            orphaned_units: self.orphans.len(),
            runtime_available: self.runtime_available,
        }
    }

    /// Names of orphaned units.
    pub fn orphan_names(&self) -> Vec<&str> {
        self.orphans.iter().map(|o| o.unit_name.as_str()).collect()
    }
}

/// Join tenants with observed units.
///
/// `expected` maps each tenant to the unit it should own. When the runtime
/// is unavailable every tenant is reported `Unknown`.
pub fn reconcile<T, F>(tenants: Vec<T>, observed: Observed, expected: F) -> Report<T>
where
    F: Fn(&T) -> ExpectedUnit,
{
    let observations = match observed {
        Observed::Available(observations) => observations,
        Observed::Unavailable => {
            let entries = tenants
                .into_iter()
                .map(|tenant| {
                    let unit_name = expected(&tenant).unit_name;
                    ReportEntry {
                        tenant,
                        unit_name,
                        status: TenantStatus::Unknown,
                        convergence: ConvergenceStatus::Unknown,
                        observation: None,
                    }
                })
                .collect();
            return Report {
                entries,
                orphans: Vec::new(),
                runtime_available: false,
            };
        }
    };

    // Name filters on the runtime side are substring matches.
    let mut by_name: HashMap<String, UnitObservation> = HashMap::new();
    for observation in observations {
        if !observation.unit_name.starts_with(UNIT_NAME_PREFIX) {
            continue;
        }
        by_name
            .entry(observation.unit_name.clone())
            .or_insert(observation);
    }

    let entries: Vec<ReportEntry<T>> = tenants
        .into_iter()
        .map(|tenant| {
            let ExpectedUnit {
                unit_name,
                provisioning_failed,
            } = expected(&tenant);
            let observation = by_name.remove(&unit_name.to_string());
            let status = match &observation {
                Some(o) => TenantStatus::from(o.state),
                None if provisioning_failed => TenantStatus::ProvisioningFailed,
                None => TenantStatus::NotCreated,
            };
            ReportEntry {
                tenant,
                unit_name,
                status,
                convergence: ConvergenceStatus::for_status(status),
                observation,
            }
        })
        .collect();

    let mut orphans: Vec<UnitObservation> = by_name.into_values().collect();
    orphans.sort_by(|a, b| a.unit_name.cmp(&b.unit_name));

    Report {
        entries,
        orphans,
        runtime_available: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;
    use tenantry_id::TenantId;

    #[derive(Debug, Clone)]
    struct Tenant {
        id: i64,
        failed: bool,
    }

    fn tenant(id: i64) -> Tenant {
        Tenant { id, failed: false }
    }

    fn expected(t: &Tenant) -> ExpectedUnit {
        ExpectedUnit {
            unit_name: TenantId::new(t.id).unwrap().unit_name(),
            provisioning_failed: t.failed,
        }
    }

    fn unit(name: &str, state: UnitState) -> UnitObservation {
        UnitObservation {
            unit_id: "0123456789ab".to_string(),
            unit_name: name.to_string(),
            state,
            ports: vec![],
            image: "fastapi_app:latest".to_string(),
            created_at: None,
        }
    }

    fn statuses<T>(report: &Report<T>) -> Vec<TenantStatus> {
        report.entries.iter().map(|e| e.status).collect()
    }

    #[test]
    fn test_mixed_fleet() {
        let observed = Observed::Available(vec![
            unit("chatbot_1", UnitState::Running),
            unit("chatbot_3", UnitState::Stopped),
        ]);
        let report = reconcile(vec![tenant(1), tenant(2), tenant(3)], observed, expected);

        assert_eq!(
            statuses(&report),
            vec![
                TenantStatus::Running,
                TenantStatus::NotCreated,
                TenantStatus::Stopped
            ]
        );
        assert_eq!(report.entries[1].tenant.id, 2);
        assert!(report.entries[0].convergence.is_converged());
        assert_eq!(report.entries[2].convergence, ConvergenceStatus::Diverged);
        assert!(report.orphans.is_empty());
    }

    #[test]
    fn test_unavailable_marks_everything_unknown() {
        let report = reconcile(vec![tenant(1), tenant(2)], Observed::Unavailable, expected);

        assert_eq!(report.entries.len(), 2);
        assert!(!report.runtime_available);
        assert!(report
            .entries
            .iter()
            .all(|e| e.status == TenantStatus::Unknown
                && e.convergence == ConvergenceStatus::Unknown));
    }

    #[test]
    fn test_failed_provisioning_is_visible() {
        let failed = Tenant { id: 5, failed: true };
        let report = reconcile(vec![failed], Observed::Available(vec![]), expected);
        assert_eq!(statuses(&report), vec![TenantStatus::ProvisioningFailed]);
    }

    #[test]
    fn test_observation_wins_over_failed_marker() {
        let failed = Tenant { id: 5, failed: true };
        let observed = Observed::Available(vec![unit("chatbot_5", UnitState::Running)]);
        let report = reconcile(vec![failed], observed, expected);
        assert_eq!(statuses(&report), vec![TenantStatus::Running]);
    }

    #[test]
    fn test_orphans_are_excluded_and_listed() {
        let observed = Observed::Available(vec![
            unit("chatbot_9", UnitState::Running),
            unit("chatbot_1", UnitState::Running),
            unit("chatbot_legacy", UnitState::Stopped),
            unit("postgres", UnitState::Running),
        ]);
        let report = reconcile(vec![tenant(1)], observed, expected);

        assert_eq!(report.entries.len(), 1);
        assert_eq!(report.orphan_names(), vec!["chatbot_9", "chatbot_legacy"]);
    }

    #[test]
    fn test_substring_match_is_not_a_hit() {
        // A runtime name filter for chatbot_1 also matches chatbot_12.
        let observed = Observed::Available(vec![unit("chatbot_12", UnitState::Running)]);
        let report = reconcile(vec![tenant(1)], observed, expected);
        assert_eq!(statuses(&report), vec![TenantStatus::NotCreated]);
        assert_eq!(report.orphan_names(), vec!["chatbot_12"]);
    }

    #[test]
    fn test_stats_include_orphans() {
        let observed = Observed::Available(vec![
            unit("chatbot_1", UnitState::Running),
            unit("chatbot_2", UnitState::Stopped),
            unit("chatbot_7", UnitState::Running),
        ]);
        let report = reconcile(vec![tenant(1), tenant(2), tenant(3)], observed, expected);
        let stats = report.stats();

        assert_eq!(
            stats,
            ReportStats {
                total_tenants: 3,
                running_units: 2,
                total_units: 3,
                stopped_units: 1,
                orphaned_units: 1,
                runtime_available: true,
            }
        );
    }

    #[rstest]
    #[case("running", UnitState::Running)]
    #[case("restarting", UnitState::Running)]
    #[case("exited", UnitState::Stopped)]
    #[case("created", UnitState::Stopped)]
    #[case("Paused", UnitState::Stopped)]
    #[case("dead", UnitState::Stopped)]
    #[case("", UnitState::Unknown)]
    #[case("hibernating", UnitState::Unknown)]
    fn test_docker_state_mapping(#[case] raw: &str, #[case] state: UnitState) {
        assert_eq!(UnitState::from_docker_state(raw), state);
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let json = serde_json::to_string(&TenantStatus::ProvisioningFailed).unwrap();
        assert_eq!(json, "\"provisioning_failed\"");
    }

    fn arb_state() -> impl Strategy<Value = UnitState> {
        prop_oneof![
            Just(UnitState::Running),
            Just(UnitState::Stopped),
            Just(UnitState::Unknown),
        ]
    }

    proptest! {
        #[test]
        fn prop_one_entry_per_tenant(
            ids in proptest::collection::btree_set(1i64..200, 0..40),
            units in proptest::collection::vec((1i64..300, arb_state()), 0..60),
            available in any::<bool>(),
        ) {
            let tenants: Vec<Tenant> = ids.iter().copied().map(tenant).collect();
            let observed = if available {
                Observed::Available(
                    units
                        .iter()
                        .map(|(id, state)| unit(&format!("chatbot_{id}"), *state))
                        .collect(),
                )
            } else {
                Observed::Unavailable
            };

            let report = reconcile(tenants.clone(), observed, expected);
            prop_assert_eq!(report.entries.len(), tenants.len());
            for (entry, t) in report.entries.iter().zip(tenants.iter()) {
                prop_assert_eq!(entry.tenant.id, t.id);
            }
        }
    }
}
