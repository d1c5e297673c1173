//! Health check endpoints.
//!
//! These endpoints are used by load balancers and orchestration systems
//! to determine if the service is healthy and ready to receive traffic.

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;

use crate::state::AppState;

/// Health check response.
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct HealthResponse {
    /// Service status: "ok" or "degraded".
    pub status: String,

    /// Service name.
    pub service: String,

    /// Service version.
    pub version: String,

    /// Current timestamp (ISO 8601).
    pub timestamp: String,

    /// Detailed component health (optional).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub components: Option<ComponentHealth>,
}

/// Component health details.
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct ComponentHealth {
    /// Tenant registry backend.
    pub registry: ComponentStatus,

    /// Container runtime, with the transport that answered.
    pub runtime: ComponentStatus,
}

/// Individual component status.
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct ComponentStatus {
    /// Status: "ok" or "unavailable".
    pub status: String,

    /// Optional message with details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ComponentStatus {
    fn from_result<E: std::fmt::Display>(result: Result<String, E>) -> Self {
        match result {
            Ok(message) => Self {
                status: "ok".to_string(),
                message: Some(message),
            },
            Err(e) => Self {
                status: "unavailable".to_string(),
                message: Some(e.to_string()),
            },
        }
    }

    fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

/// Create health check routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/livez", get(livez))
}

/// Basic health check - is the service running?
///
/// Does not check dependencies.
async fn healthz() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        service: "control-plane".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now().to_rfc3339(),
        components: None,
    })
}

/// Readiness check.
///
/// Returns 503 unless both the registry and the runtime answer.
async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let (registry, runtime) = tokio::join!(state.registry().health_check(), state.runtime().probe());

    let components = ComponentHealth {
        registry: ComponentStatus::from_result(registry.map(|()| "reachable".to_string())),
        runtime: ComponentStatus::from_result(runtime.map(|t| format!("reachable via {t}"))),
    };
    let all_ok = components.registry.is_ok() && components.runtime.is_ok();

    let response = HealthResponse {
        status: if all_ok { "ok" } else { "degraded" }.to_string(),
        service: "control-plane".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now().to_rfc3339(),
        components: Some(components),
    };

    if all_ok {
        (StatusCode::OK, Json(response))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(response))
    }
}

/// Liveness check - is the service alive?
async fn livez() -> impl IntoResponse {
    StatusCode::OK
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_healthz_returns_ok() {
        let response = healthz().await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_livez_returns_ok() {
        let response = livez().await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn test_component_status() {
        assert!(ComponentStatus::from_result::<String>(Ok("up".into())).is_ok());
        assert!(!ComponentStatus::from_result(Err::<String, _>("down")).is_ok());
    }
}
