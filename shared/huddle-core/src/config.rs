//! Runtime configuration shared by every service

use crate::error::{HuddleError, Result};
use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub service_name: String,
    pub environment: String,
    /// Upper bound on `HuddleService::shutdown` before the runtime gives up on it
    pub shutdown_grace: Duration,
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self> {
        let shutdown_grace = match env::var("SHUTDOWN_GRACE_SECS") {
            Ok(raw) => raw
                .parse()
                .map(Duration::from_secs)
                .map_err(|e| HuddleError::Config(format!("Invalid SHUTDOWN_GRACE_SECS: {}", e)))?,
            Err(_) => Duration::from_secs(10),
        };

        Ok(Self {
            service_name: env::var("SERVICE_NAME").unwrap_or_else(|_| "unknown".to_string()),
            environment: env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
            shutdown_grace,
        })
    }
}
