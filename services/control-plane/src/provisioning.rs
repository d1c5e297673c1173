//! Tenant unit specification.
//!
//! Turns a registry row into the [`UnitSpec`] the runtime creates: reverse
//! proxy routing labels, tenant database credentials and the optional host
//! port binding.

use std::collections::BTreeMap;
use std::fmt;

use rand::Rng;
use tenantry_id::TenantId;

use crate::registry::Tenant;
use crate::runtime::{PortBinding, RestartPolicy, UnitSpec};

/// Label identifying the tenant that owns a unit.
pub const OWNER_LABEL: &str = "tenantry.tenant-id";

/// Length of generated tenant database passwords.
const PASSWORD_LEN: usize = 16;

/// Where tenant units find their database.
#[derive(Debug, Clone)]
pub struct TenantDbConfig {
    /// URL scheme, including any driver suffix.
    pub scheme: String,
    /// `host:port` as seen from inside the proxy network.
    pub host: String,
    pub database: String,
}

/// Provisioning configuration.
#[derive(Debug, Clone)]
pub struct ProvisioningConfig {
    /// Tenants are served at `{subdomain}.{base_domain}`.
    pub base_domain: String,

    /// Network shared with the reverse proxy.
    pub proxy_network: Option<String>,

    /// Image every tenant unit runs.
    pub image: String,

    /// Reverse proxy entrypoint for tenant routes.
    pub entrypoint: String,

    /// Reverse proxy TLS certificate resolver.
    pub tls_resolver: String,

    /// Port the tenant application listens on inside its unit.
    pub container_port: u16,

    /// Publish `808{id}` on the host when it is a valid port.
    pub publish_host_port: bool,

    pub tenant_db: TenantDbConfig,
}

impl Default for ProvisioningConfig {
    fn default() -> Self {
        Self {
            base_domain: "tenantry.local".to_string(),
            proxy_network: Some("traefik_default".to_string()),
            image: "fastapi_app:latest".to_string(),
            entrypoint: "websecure".to_string(),
            tls_resolver: "myresolver".to_string(),
            container_port: 80,
            publish_host_port: true,
            tenant_db: TenantDbConfig {
                scheme: "mysql+mysqlconnector".to_string(),
                host: "mysql-db:3306".to_string(),
                database: "multi_tenant_db".to_string(),
            },
        }
    }
}

impl ProvisioningConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let var = |name: &str, default: String| std::env::var(name).unwrap_or(default);

        // An empty network name disables attachment.
        let proxy_network = match std::env::var("TENANTRY_PROXY_NETWORK") {
            Ok(network) if network.trim().is_empty() => None,
            Ok(network) => Some(network),
            Err(_) => defaults.proxy_network,
        };

        let container_port = std::env::var("TENANTRY_CONTAINER_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.container_port);

        let publish_host_port = std::env::var("TENANTRY_PUBLISH_HOST_PORT")
            .map(|v| v != "0" && v.to_lowercase() != "false")
            .unwrap_or(defaults.publish_host_port);

        Self {
            base_domain: var("TENANTRY_BASE_DOMAIN", defaults.base_domain),
            proxy_network,
            image: var("TENANTRY_TENANT_IMAGE", defaults.image),
            entrypoint: var("TENANTRY_PROXY_ENTRYPOINT", defaults.entrypoint),
            tls_resolver: var("TENANTRY_TLS_RESOLVER", defaults.tls_resolver),
            container_port,
            publish_host_port,
            tenant_db: TenantDbConfig {
                scheme: var("TENANTRY_TENANT_DB_SCHEME", defaults.tenant_db.scheme),
                host: var("TENANTRY_TENANT_DB_HOST", defaults.tenant_db.host),
                database: var("TENANTRY_TENANT_DB_NAME", defaults.tenant_db.database),
            },
        }
    }

    /// Public URL of a tenant's dashboard.
    pub fn dashboard_url(&self, subdomain: &str) -> String {
        format!("https://{subdomain}.{}", self.base_domain)
    }

    /// Reverse proxy labels routing `{subdomain}.{base_domain}` to the unit.
    pub fn route_labels(&self, tenant_id: TenantId, subdomain: &str) -> BTreeMap<String, String> {
        let router = tenant_id.unit_name().to_string();
        let mut labels = BTreeMap::new();
        labels.insert("traefik.enable".to_string(), "true".to_string());
        labels.insert(
            format!("traefik.http.routers.{router}.rule"),
            format!("Host(`{subdomain}.{}`)", self.base_domain),
        );
        labels.insert(
            format!("traefik.http.routers.{router}.entrypoints"),
            self.entrypoint.clone(),
        );
        labels.insert(
            format!("traefik.http.routers.{router}.tls.certresolver"),
            self.tls_resolver.clone(),
        );
        labels.insert(
            format!("traefik.http.services.{router}.loadbalancer.server.port"),
            self.container_port.to_string(),
        );
        labels
    }

    /// Full specification of a tenant's unit.
    pub fn unit_spec(&self, tenant: &Tenant, credentials: &TenantCredentials) -> UnitSpec {
        let mut labels = self.route_labels(tenant.id, &tenant.subdomain);
        labels.insert(OWNER_LABEL.to_string(), tenant.id.to_string());

        let mut env = BTreeMap::new();
        env.insert("DB_URL".to_string(), credentials.database_url(&self.tenant_db));

        // 808{id} leaves the port range from id 100 on; such tenants are
        // reachable only through the proxy route.
        let port_bindings = match tenant.id.host_port() {
            Some(host_port) if self.publish_host_port => vec![PortBinding {
                host_port,
                container_port: self.container_port,
            }],
            _ => Vec::new(),
        };

        UnitSpec {
            name: tenant.id.unit_name().to_string(),
            image: self.image.clone(),
            env,
            labels,
            network: self.proxy_network.clone(),
            port_bindings,
            restart_policy: RestartPolicy::UnlessStopped,
        }
    }
}

/// Database credentials handed to a tenant unit.
#[derive(Clone)]
pub struct TenantCredentials {
    pub db_user: String,
    password: String,
}

impl TenantCredentials {
    /// Database user name for a subdomain.
    pub fn user_for(subdomain: &str) -> String {
        format!("user_{subdomain}")
    }

    /// Generate a fresh random password for `db_user`.
    pub fn generate(db_user: &str) -> Self {
        let password = rand::rng()
            .sample_iter(&rand::distr::Alphanumeric)
            .take(PASSWORD_LEN)
            .map(char::from)
            .collect();
        Self {
            db_user: db_user.to_string(),
            password,
        }
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    /// Connection URL with the password form-encoded.
    pub fn database_url(&self, db: &TenantDbConfig) -> String {
        let password: String =
            url::form_urlencoded::byte_serialize(self.password.as_bytes()).collect();
        format!(
            "{}://{}:{}@{}/{}",
            db.scheme, self.db_user, password, db.host, db.database
        )
    }
}

impl fmt::Debug for TenantCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TenantCredentials")
            .field("db_user", &self.db_user)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ProvisioningState;
    use chrono::Utc;

    fn tenant(id: i64, subdomain: &str) -> Tenant {
        Tenant {
            id: TenantId::new(id).unwrap(),
            name: "Acme".to_string(),
            email: "ops@acme.test".to_string(),
            phone: "+15550100".to_string(),
            username: "acme".to_string(),
            company_name: "Acme Inc".to_string(),
            subdomain: subdomain.to_string(),
            credentials_ref: TenantCredentials::user_for(subdomain),
            provisioning: ProvisioningState::Pending,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_generated_password_shape() {
        let creds = TenantCredentials::generate("user_acme");
        assert_eq!(creds.password().len(), PASSWORD_LEN);
        assert!(creds.password().chars().all(|c| c.is_ascii_alphanumeric()));
        assert!(!format!("{creds:?}").contains(creds.password()));
    }

    #[test]
    fn test_route_labels() {
        let config = ProvisioningConfig {
            base_domain: "example.com".to_string(),
            ..Default::default()
        };
        let labels = config.route_labels(TenantId::new(42).unwrap(), "acme");

        assert_eq!(labels["traefik.enable"], "true");
        assert_eq!(
            labels["traefik.http.routers.chatbot_42.rule"],
            "Host(`acme.example.com`)"
        );
        assert_eq!(labels["traefik.http.routers.chatbot_42.entrypoints"], "websecure");
        assert_eq!(
            labels["traefik.http.routers.chatbot_42.tls.certresolver"],
            "myresolver"
        );
    }

    #[test]
    fn test_unit_spec_for_small_id_publishes_port() {
        let config = ProvisioningConfig::default();
        let tenant = tenant(1, "acme");
        let creds = TenantCredentials::generate(&tenant.credentials_ref);

        let spec = config.unit_spec(&tenant, &creds);
        assert_eq!(spec.name, "chatbot_1");
        assert_eq!(spec.restart_policy, RestartPolicy::UnlessStopped);
        assert_eq!(spec.network.as_deref(), Some("traefik_default"));
        assert_eq!(spec.labels[OWNER_LABEL], "1");
        assert_eq!(
            spec.port_bindings,
            vec![PortBinding {
                host_port: 8081,
                container_port: 80
            }]
        );
        assert!(spec.env["DB_URL"].starts_with("mysql+mysqlconnector://user_acme:"));
        assert!(spec.env["DB_URL"].ends_with("@mysql-db:3306/multi_tenant_db"));
    }

    #[test]
    fn test_unit_spec_for_large_id_skips_port() {
        let config = ProvisioningConfig::default();
        let tenant = tenant(42, "acme");
        let creds = TenantCredentials::generate(&tenant.credentials_ref);

        let spec = config.unit_spec(&tenant, &creds);
        assert_eq!(spec.name, "chatbot_42");
        assert_eq!(tenant.id.expected_port(), 80842);
        assert!(spec.port_bindings.is_empty());
    }

    #[test]
    fn test_database_url_encodes_password() {
        let creds = TenantCredentials {
            db_user: "user_acme".to_string(),
            password: "a b&c".to_string(),
        };
        let url = creds.database_url(&TenantDbConfig {
            scheme: "postgres".to_string(),
            host: "db:5432".to_string(),
            database: "tenants".to_string(),
        });
        assert_eq!(url, "postgres://user_acme:a+b%26c@db:5432/tenants");
    }

    #[test]
    fn test_dashboard_url() {
        let config = ProvisioningConfig::default();
        assert_eq!(config.dashboard_url("acme"), "https://acme.tenantry.local");
    }
}
