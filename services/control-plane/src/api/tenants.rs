//! Tenant registration, listing and teardown.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tenantry_id::TenantId;

use super::error::{ApiError, FieldError};
use super::request_context::RequestContext;
use super::runtime::ActionResponse;
use crate::lifecycle::RegistrationOutcome;
use crate::provisioning::TenantCredentials;
use crate::registry::{NewTenant, ProvisioningState, RegistryError, Tenant};
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/tenants", get(list_tenants).post(register_tenant))
        .route("/tenants/{id}", delete(delete_tenant))
}

/// Registration payload.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RegistrationRequest {
    pub name: String,
    pub email: String,
    pub phone: String,
    pub username: String,
    pub company_name: String,
    pub subdomain: String,
}

impl RegistrationRequest {
    /// Trim all fields and lowercase the email.
    fn normalized(self) -> Self {
        Self {
            name: self.name.trim().to_string(),
            email: self.email.trim().to_lowercase(),
            phone: self.phone.trim().to_string(),
            username: self.username.trim().to_string(),
            company_name: self.company_name.trim().to_string(),
            subdomain: self.subdomain.trim().to_string(),
        }
    }

    fn validate(&self) -> Vec<FieldError> {
        let mut errors = Vec::new();

        for (field, value) in [("name", &self.name), ("company_name", &self.company_name)] {
            if value.is_empty() {
                errors.push(FieldError::new(field, "is required"));
            } else if value.len() > 255 {
                errors.push(FieldError::new(field, "must be at most 255 characters"));
            }
        }

        if !is_valid_email(&self.email) {
            errors.push(FieldError::new("email", "must be a valid email address"));
        }

        if self.phone.is_empty() {
            errors.push(FieldError::new("phone", "is required"));
        } else if self.phone.len() > 32
            || !self
                .phone
                .chars()
                .all(|c| c.is_ascii_digit() || matches!(c, '+' | '-' | ' ' | '(' | ')'))
        {
            errors.push(FieldError::new("phone", "must contain only digits, spaces and + - ( )"));
        }

        if !(3..=64).contains(&self.username.len())
            || !self
                .username
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
        {
            errors.push(FieldError::new(
                "username",
                "must be 3-64 characters of letters, numbers, '_', '-' or '.'",
            ));
        }

        if let Some(message) = subdomain_error(&self.subdomain) {
            errors.push(FieldError::new("subdomain", message));
        }

        errors
    }

    fn into_new_tenant(self) -> NewTenant {
        let credentials_ref = TenantCredentials::user_for(&self.subdomain);
        NewTenant {
            name: self.name,
            email: self.email,
            phone: self.phone,
            username: self.username,
            company_name: self.company_name,
            subdomain: self.subdomain,
            credentials_ref,
        }
    }
}

fn is_valid_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && email.len() <= 320
        && !email.chars().any(char::is_whitespace)
}

/// Subdomains become DNS labels: lowercase letters, digits and dashes.
fn subdomain_error(subdomain: &str) -> Option<&'static str> {
    if subdomain.is_empty() {
        Some("is required")
    } else if subdomain.len() > 63 {
        Some("must be at most 63 characters")
    } else if !subdomain
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        Some("must contain only lowercase letters, numbers, and dashes")
    } else if subdomain.starts_with('-') || subdomain.ends_with('-') {
        Some("must not start or end with a dash")
    } else {
        None
    }
}

#[derive(Debug, Serialize)]
pub struct RegistrationResponse {
    pub tenant_id: TenantId,
    pub dashboard_url: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct TenantResponse {
    pub id: TenantId,
    pub name: String,
    pub email: String,
    pub phone: String,
    pub username: String,
    pub company_name: String,
    pub subdomain: String,
    pub dashboard_url: String,
    pub unit_name: String,
    pub expected_port: u64,
    pub provisioning_state: ProvisioningState,
    pub created_at: DateTime<Utc>,
}

impl TenantResponse {
    fn new(tenant: Tenant, dashboard_url: String) -> Self {
        Self {
            id: tenant.id,
            unit_name: tenant.id.unit_name().to_string(),
            expected_port: tenant.id.expected_port(),
            name: tenant.name,
            email: tenant.email,
            phone: tenant.phone,
            username: tenant.username,
            company_name: tenant.company_name,
            subdomain: tenant.subdomain,
            dashboard_url,
            provisioning_state: tenant.provisioning,
            created_at: tenant.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TeardownResponse {
    pub tenant_id: TenantId,
    pub deleted: bool,
    pub runtime: ActionResponse,
}

/// Register a tenant and provision its unit.
async fn register_tenant(
    State(state): State<AppState>,
    ctx: RequestContext,
    body: Result<Json<RegistrationRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let request_id = ctx.request_id.clone();

    let Json(request) = body.map_err(|e| {
        ApiError::bad_request("invalid_body", e.body_text()).with_request_id(request_id.clone())
    })?;
    let request = request.normalized();

    let errors = request.validate();
    if !errors.is_empty() {
        return Err(
            ApiError::bad_request("validation_failed", "Registration payload is invalid")
                .with_details(errors)
                .with_request_id(request_id),
        );
    }

    let subdomain = request.subdomain.clone();
    let dashboard_url = state.orchestrator().provisioning().dashboard_url(&subdomain);

    let outcome = state
        .orchestrator()
        .register(request.into_new_tenant())
        .await
        .map_err(|e| {
            match &e {
                RegistryError::Duplicate { .. } => {
                    tracing::info!(request_id = %request_id, error = %e, "Registration rejected")
                }
                _ => tracing::error!(request_id = %request_id, error = %e, "Registration failed"),
            }
            registration_error(&e).with_request_id(request_id.clone())
        })?;

    match outcome {
        RegistrationOutcome::Provisioned(tenant) => Ok((
            StatusCode::CREATED,
            Json(RegistrationResponse {
                tenant_id: tenant.id,
                message: format!("Dashboard created at {dashboard_url}"),
                dashboard_url,
            }),
        )),
        RegistrationOutcome::RuntimeFailed { tenant, error } => {
            tracing::warn!(
                request_id = %request_id,
                tenant_id = %tenant.id,
                error = %error,
                "Tenant registered without a running unit"
            );
            Err(ApiError::bad_gateway(
                "provisioning_failed",
                format!(
                    "Tenant {} was registered but its environment could not be created: {error}",
                    tenant.id
                ),
            )
            .with_tenant_id(tenant.id.get())
            .with_request_id(request_id))
        }
    }
}

fn registration_error(err: &RegistryError) -> ApiError {
    match err {
        RegistryError::Backend(_) => {
            ApiError::internal("registration_failed", "Tenant could not be registered")
        }
        other => ApiError::registry(other),
    }
}

/// List registered tenants.
async fn list_tenants(
    State(state): State<AppState>,
    ctx: RequestContext,
) -> Result<impl IntoResponse, ApiError> {
    let tenants = state.registry().get_all_tenants().await.map_err(|e| {
        tracing::error!(request_id = %ctx.request_id, error = %e, "Failed to list tenants");
        ApiError::registry(&e).with_request_id(ctx.request_id.clone())
    })?;

    let provisioning = state.orchestrator().provisioning();
    let tenants: Vec<TenantResponse> = tenants
        .into_iter()
        .map(|t| {
            let url = provisioning.dashboard_url(&t.subdomain);
            TenantResponse::new(t, url)
        })
        .collect();

    Ok(Json(tenants))
}

/// Remove a tenant's unit and delete the tenant.
async fn delete_tenant(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = super::parse_tenant_id(&id, &ctx.request_id)?;

    let outcome = state.orchestrator().teardown(id).await.map_err(|e| {
        if !matches!(e, RegistryError::NotFound(_)) {
            tracing::error!(request_id = %ctx.request_id, tenant_id = %id, error = %e, "Teardown failed");
        }
        ApiError::registry(&e).with_request_id(ctx.request_id.clone())
    })?;

    Ok(Json(TeardownResponse {
        tenant_id: outcome.tenant.id,
        deleted: true,
        runtime: ActionResponse::from_outcome(outcome.runtime),
    }))
}
