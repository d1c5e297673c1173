//! # tenantry-id
//!
//! Tenant identifiers and the names derived from them.
//!
//! ## Design Principles
//!
//! - Tenant IDs are assigned by the registry; subdomains are user-controlled labels
//! - Runtime unit names and expected ports are pure functions of the tenant ID
//! - Nothing derived here ever takes user-supplied text as input
//!
//! ## Naming
//!
//! | Tenant ID | Unit name    | Expected port |
//! |-----------|--------------|---------------|
//! | `1`       | `chatbot_1`  | `8081`        |
//! | `42`      | `chatbot_42` | `80842`       |
//!
//! The expected port is the decimal concatenation of `808` and the ID, so it
//! leaves the TCP port range once the ID has three digits. Callers that need
//! an actual host binding use [`TenantId::host_port`].

mod error;
mod request;
mod tenant;

pub use error::IdError;
pub use request::RequestId;
pub use tenant::{TenantId, UnitName, MAX_TENANT_ID, UNIT_NAME_PREFIX};

/// Re-export ulid for consumers that need raw ULID operations
pub use ulid::Ulid;
