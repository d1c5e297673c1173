//! tenantry control plane library.
//!
//! This crate primarily ships a `control-plane` binary, but we expose a small
//! library surface to enable integration testing and reuse.

pub mod api;
pub mod config;
pub mod db;
pub mod lifecycle;
pub mod provisioning;
pub mod reconciler;
pub mod registry;
pub mod runtime;
pub mod state;
