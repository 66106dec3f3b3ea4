//! Huddle Core - Shared domain types and service infrastructure
//!
//! This crate provides:
//! - Standard service trait every Huddle service implements
//! - Actor and idempotency types handed out by the identity layer
//! - Error handling utilities
//! - Configuration management

pub mod config;
pub mod domain;
pub mod error;
pub mod service;

pub use config::ServiceConfig;
pub use domain::*;
pub use error::{HuddleError, Result};
pub use service::{DependencyStatus, HealthStatus, HuddleService, MicroserviceRuntime, ReadinessStatus};
