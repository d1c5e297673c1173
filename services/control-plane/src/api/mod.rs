//! HTTP API handlers and routing.

pub mod error;
mod health;
mod request_context;
mod runtime;
mod tenants;

use axum::{
    http::{header, Method},
    Router,
};
use tenantry_id::TenantId;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::state::AppState;
use error::ApiError;

/// Create the main API router with all routes and middleware.
pub fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_origin(Any);

    Router::new()
        .merge(health::routes())
        .merge(tenants::routes())
        .merge(runtime::routes())
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        // Application state
        .with_state(state)
}

/// Parse a tenant id path segment.
fn parse_tenant_id(raw: &str, request_id: &str) -> Result<TenantId, ApiError> {
    TenantId::parse(raw).map_err(|e| {
        ApiError::bad_request("invalid_tenant_id", format!("Invalid tenant id '{raw}': {e}"))
            .with_request_id(request_id.to_string())
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{body::Body, http::Request, http::StatusCode};
    use tower::ServiceExt;

    use super::*;
    use crate::provisioning::ProvisioningConfig;
    use crate::registry::MemoryRegistry;
    use crate::runtime::{MockTransport, RuntimeClient, RuntimeTimeouts, RuntimeTransport};

    fn router() -> Router {
        let runtime = RuntimeClient::new(
            vec![Arc::new(MockTransport::new()) as Arc<dyn RuntimeTransport>],
            RuntimeTimeouts::default(),
        );
        create_router(AppState::new(
            Arc::new(MemoryRegistry::new()),
            Arc::new(runtime),
            ProvisioningConfig::default(),
        ))
    }

    async fn call(method: Method, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = router()
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .header("x-request-id", "req-test")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or_default())
    }

    #[tokio::test]
    async fn test_invalid_tenant_id_is_bad_request() {
        let (status, body) = call(Method::POST, "/tenants/abc/runtime/start").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "invalid_tenant_id");
        assert_eq!(body["request_id"], "req-test");
    }

    #[tokio::test]
    async fn test_empty_registry_lists_nothing() {
        let (status, body) = call(Method::GET, "/tenants-runtime-status").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, serde_json::json!([]));
    }

    #[tokio::test]
    async fn test_unknown_tenant_teardown_is_not_found() {
        let (status, body) = call(Method::DELETE, "/tenants/3").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "tenant_not_found");
    }
}
