//! Runtime status and unit actions.
//!
//! Status and stats are read-only views over a fresh reconciliation. Unit
//! actions answer 200 with `{success, message}` for every outcome the
//! runtime gave a definite answer to, including "not found" and "already
//! exists"; only an unreachable runtime (503) or a timed out write (504)
//! is an error.

use axum::{
    extract::{Path, State},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tenantry_id::TenantId;
use tenantry_reconcile::{ConvergenceStatus, ReportEntry, TenantStatus};

use super::error::ApiError;
use super::request_context::RequestContext;
use crate::lifecycle::ActionResult;
use crate::registry::{ProvisioningState, Tenant};
use crate::runtime::RuntimeError;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/tenants-runtime-status", get(runtime_status))
        .route("/tenants-runtime-stats", get(runtime_stats))
        .route("/tenants/{id}/runtime/start", post(start_unit))
        .route("/tenants/{id}/runtime/stop", post(stop_unit))
        .route("/tenants/{id}/runtime/remove", post(remove_unit))
        .route("/tenants/{id}/runtime/create", post(create_unit))
        .route("/tenants/{id}/runtime/recreate", post(recreate_unit))
}

/// Body of every unit action.
#[derive(Debug, Serialize)]
pub struct ActionResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<&'static str>,
}

impl ActionResponse {
    /// Collapse a runtime outcome into a response body.
    pub fn from_outcome(outcome: Result<ActionResult, RuntimeError>) -> Self {
        match outcome {
            Ok(result) => result.into(),
            Err(e) => Self {
                success: false,
                message: e.to_string(),
                code: Some(e.code()),
            },
        }
    }
}

impl From<ActionResult> for ActionResponse {
    fn from(result: ActionResult) -> Self {
        Self {
            success: result.success,
            message: result.message,
            code: None,
        }
    }
}

/// Tenant fields shown next to each runtime entry.
#[derive(Debug, Serialize)]
pub struct TenantSummary {
    pub id: TenantId,
    pub name: String,
    pub email: String,
    pub username: String,
    pub company_name: String,
    pub subdomain: String,
    pub provisioning_state: ProvisioningState,
    pub created_at: DateTime<Utc>,
}

/// One report entry.
#[derive(Debug, Serialize)]
pub struct TenantRuntimeStatus {
    pub unit_name: String,
    pub unit_id: Option<String>,
    pub image: Option<String>,
    pub status: TenantStatus,
    pub convergence: ConvergenceStatus,
    pub ports: Vec<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub expected_port: u64,
    pub tenant: TenantSummary,
}

impl From<ReportEntry<Tenant>> for TenantRuntimeStatus {
    fn from(entry: ReportEntry<Tenant>) -> Self {
        let tenant = entry.tenant;
        let (unit_id, image, ports, created_at) = match entry.observation {
            Some(obs) => (Some(obs.unit_id), Some(obs.image), obs.ports, obs.created_at),
            None => (None, None, Vec::new(), None),
        };

        Self {
            unit_name: entry.unit_name.to_string(),
            unit_id,
            image,
            status: entry.status,
            convergence: entry.convergence,
            ports,
            created_at,
            expected_port: tenant.id.expected_port(),
            tenant: TenantSummary {
                id: tenant.id,
                name: tenant.name,
                email: tenant.email,
                username: tenant.username,
                company_name: tenant.company_name,
                subdomain: tenant.subdomain,
                provisioning_state: tenant.provisioning,
                created_at: tenant.created_at,
            },
        }
    }
}

/// Every tenant joined with its unit. Answers 200 even when the runtime is
/// down; entries are then `unknown`.
async fn runtime_status(
    State(state): State<AppState>,
    ctx: RequestContext,
) -> Result<impl IntoResponse, ApiError> {
    let report = state.engine().reconcile().await.map_err(|e| {
        tracing::error!(request_id = %ctx.request_id, error = %e, "Reconciliation failed");
        ApiError::registry(&e).with_request_id(ctx.request_id.clone())
    })?;

    let entries: Vec<TenantRuntimeStatus> =
        report.entries.into_iter().map(TenantRuntimeStatus::from).collect();
    Ok(Json(entries))
}

async fn runtime_stats(
    State(state): State<AppState>,
    ctx: RequestContext,
) -> Result<impl IntoResponse, ApiError> {
    let stats = state.engine().stats().await.map_err(|e| {
        tracing::error!(request_id = %ctx.request_id, error = %e, "Reconciliation failed");
        ApiError::registry(&e).with_request_id(ctx.request_id.clone())
    })?;
    Ok(Json(stats))
}

/// Turn an action outcome into a response, mapping unexpected runtime
/// failures onto problem responses.
fn action_response(
    outcome: Result<ActionResult, RuntimeError>,
    action: &'static str,
    id: TenantId,
    request_id: &str,
) -> Result<Json<ActionResponse>, ApiError> {
    match outcome {
        Ok(result) => {
            tracing::info!(
                request_id = %request_id,
                tenant_id = %id,
                action,
                success = result.success,
                "Unit action completed"
            );
            Ok(Json(result.into()))
        }
        Err(e) => {
            tracing::warn!(
                request_id = %request_id,
                tenant_id = %id,
                action,
                error = %e,
                "Unit action failed"
            );
            Err(ApiError::runtime(&e).with_request_id(request_id.to_string()))
        }
    }
}

async fn start_unit(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(id): Path<String>,
) -> Result<Json<ActionResponse>, ApiError> {
    let id = super::parse_tenant_id(&id, &ctx.request_id)?;
    let outcome = state.orchestrator().start(id.unit_name()).await;
    action_response(outcome, "start", id, &ctx.request_id)
}

async fn stop_unit(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(id): Path<String>,
) -> Result<Json<ActionResponse>, ApiError> {
    let id = super::parse_tenant_id(&id, &ctx.request_id)?;
    let outcome = state.orchestrator().stop(id.unit_name()).await;
    action_response(outcome, "stop", id, &ctx.request_id)
}

async fn remove_unit(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(id): Path<String>,
) -> Result<Json<ActionResponse>, ApiError> {
    let id = super::parse_tenant_id(&id, &ctx.request_id)?;
    let outcome = state.orchestrator().remove(id.unit_name()).await;
    action_response(outcome, "remove", id, &ctx.request_id)
}

async fn create_unit(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(id): Path<String>,
) -> Result<Json<ActionResponse>, ApiError> {
    let tenant = load_tenant(&state, &id, &ctx.request_id).await?;
    let outcome = state.orchestrator().create(&tenant).await;
    action_response(outcome, "create", tenant.id, &ctx.request_id)
}

async fn recreate_unit(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(id): Path<String>,
) -> Result<Json<ActionResponse>, ApiError> {
    let tenant = load_tenant(&state, &id, &ctx.request_id).await?;
    let outcome = state.orchestrator().recreate(&tenant).await;
    action_response(outcome, "recreate", tenant.id, &ctx.request_id)
}

async fn load_tenant(state: &AppState, id: &str, request_id: &str) -> Result<Tenant, ApiError> {
    let id = super::parse_tenant_id(id, request_id)?;
    state
        .registry()
        .get_tenant(id)
        .await
        .map_err(|e| ApiError::registry(&e).with_request_id(request_id.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_response_from_error_carries_code() {
        let response = ActionResponse::from_outcome(Err(RuntimeError::Unavailable("down".into())));
        assert!(!response.success);
        assert_eq!(response.code, Some("runtime_unavailable"));
    }

    #[test]
    fn test_action_response_serialization() {
        let response: ActionResponse = ActionResult::ok("Unit chatbot_1 started").into();
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"success": true, "message": "Unit chatbot_1 started"})
        );
    }
}
