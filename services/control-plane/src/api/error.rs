use axum::{
    http::{header::CONTENT_TYPE, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::registry::RegistryError;
use crate::runtime::RuntimeError;

#[derive(Debug, Serialize)]
pub struct ProblemDetails {
    #[serde(rename = "type")]
    pub r#type: String,
    pub title: String,
    pub status: u16,
    pub detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,
    pub code: String,
    pub request_id: String,
    pub retryable: bool,
    pub retry_after_seconds: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Vec<FieldError>>,
    /// Tenant the failure concerns, when one was created.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl ProblemDetails {
    fn new(status: StatusCode, code: impl Into<String>, detail: impl Into<String>) -> Self {
        let code = code.into();
        let title = status
            .canonical_reason()
            .unwrap_or("Unknown Error")
            .to_string();
        Self {
            r#type: format!("https://tenantry.dev/problems/{code}"),
            title,
            status: status.as_u16(),
            detail: detail.into(),
            instance: None,
            code,
            request_id: "unknown".to_string(),
            retryable: false,
            retry_after_seconds: 0,
            details: None,
            tenant_id: None,
        }
    }

    fn set_request_id(&mut self, request_id: impl Into<String>) {
        let request_id = request_id.into();
        self.request_id = request_id.clone();
        if self.instance.is_none() {
            self.instance = Some(request_id);
        }
    }

    fn set_retry_after_seconds(&mut self, seconds: u32) {
        self.retry_after_seconds = seconds;
        if seconds > 0 {
            self.retryable = true;
        }
    }
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub problem: Box<ProblemDetails>,
}

impl ApiError {
    fn with_status(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> Self {
        let problem = Box::new(ProblemDetails::new(status, code, message));
        Self { status, problem }
    }

    pub fn bad_request(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::with_status(StatusCode::BAD_REQUEST, code, message)
    }

    pub fn not_found(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::with_status(StatusCode::NOT_FOUND, code, message)
    }

    pub fn internal(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::with_status(StatusCode::INTERNAL_SERVER_ERROR, code, message)
    }

    pub fn conflict(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::with_status(StatusCode::CONFLICT, code, message)
    }

    pub fn bad_gateway(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::with_status(StatusCode::BAD_GATEWAY, code, message)
    }

    pub fn service_unavailable(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::with_status(StatusCode::SERVICE_UNAVAILABLE, code, message)
            .with_retry_after_seconds(5)
    }

    pub fn gateway_timeout(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::with_status(StatusCode::GATEWAY_TIMEOUT, code, message)
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.problem.set_request_id(request_id);
        self
    }

    pub fn with_details(mut self, details: Vec<FieldError>) -> Self {
        self.problem.details = Some(details);
        self
    }

    pub fn with_retry_after_seconds(mut self, seconds: u32) -> Self {
        self.problem.set_retry_after_seconds(seconds);
        self
    }

    pub fn with_tenant_id(mut self, tenant_id: i64) -> Self {
        self.problem.tenant_id = Some(tenant_id);
        self
    }

    /// Map a runtime failure that was not an expected outcome.
    pub fn runtime(err: &RuntimeError) -> Self {
        match err {
            RuntimeError::Unavailable(_) => Self::service_unavailable(err.code(), err.to_string()),
            RuntimeError::Timeout { .. } => Self::gateway_timeout(err.code(), err.to_string()),
            RuntimeError::UnitNotFound(_) => Self::not_found(err.code(), err.to_string()),
            RuntimeError::AlreadyExists(_) => Self::conflict(err.code(), err.to_string()),
            RuntimeError::Rejected { .. } => Self::bad_gateway(err.code(), err.to_string()),
        }
    }

    /// Map a registry failure.
    pub fn registry(err: &RegistryError) -> Self {
        match err {
            RegistryError::NotFound(id) => {
                Self::not_found("tenant_not_found", format!("Tenant {id} not found"))
            }
            RegistryError::Duplicate { field } => Self::conflict(
                format!("duplicate_{field}"),
                format!("{field} is already registered"),
            )
            .with_details(vec![FieldError::new(*field, "already registered")]),
            RegistryError::Backend(_) => {
                Self::internal("registry_error", "Tenant registry unavailable")
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut response = (self.status, Json(self.problem)).into_response();
        response.headers_mut().insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/problem+json"),
        );
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(RuntimeError::Unavailable("down".into()), StatusCode::SERVICE_UNAVAILABLE)]
    #[case(
        RuntimeError::Timeout { operation: "create", unit: "chatbot_1".into() },
        StatusCode::GATEWAY_TIMEOUT
    )]
    #[case(
        RuntimeError::Rejected { operation: "create", unit: "chatbot_1".into(), message: "no image".into() },
        StatusCode::BAD_GATEWAY
    )]
    fn test_runtime_error_status(#[case] err: RuntimeError, #[case] status: StatusCode) {
        let api = ApiError::runtime(&err);
        assert_eq!(api.status, status);
        assert_eq!(api.problem.code, err.code());
    }

    #[test]
    fn test_unavailable_is_retryable() {
        let api = ApiError::runtime(&RuntimeError::Unavailable("down".into()));
        assert!(api.problem.retryable);
    }

    #[test]
    fn test_duplicate_names_field() {
        let api = ApiError::registry(&RegistryError::Duplicate { field: "email" });
        assert_eq!(api.status, StatusCode::CONFLICT);
        assert_eq!(api.problem.code, "duplicate_email");
        assert_eq!(api.problem.details.as_ref().map(Vec::len), Some(1));
    }

    #[test]
    fn test_problem_content_type() {
        let response = ApiError::bad_request("invalid", "nope")
            .with_request_id("req_1")
            .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            response.headers()[CONTENT_TYPE],
            "application/problem+json"
        );
    }
}
