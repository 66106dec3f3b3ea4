//! Telemetry configuration

/// Output encoding for log lines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub service_name: String,
    /// Base filter, used when `RUST_LOG` is unset
    pub log_level: String,
    /// Level for the service's own crate, layered over the base filter
    pub service_log_level: Option<String>,
    pub format: LogFormat,
}

impl TelemetryConfig {
    /// Read `SERVICE_NAME`, `RUST_LOG`, `SERVICE_LOG_LEVEL` and `JSON_LOGS`, naming the
    /// service `default_name` when `SERVICE_NAME` is unset
    pub fn from_env_for(default_name: &str) -> Self {
        let json_logs = std::env::var("JSON_LOGS")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(true);
        Self {
            service_name: std::env::var("SERVICE_NAME").unwrap_or_else(|_| default_name.to_string()),
            log_level: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            service_log_level: std::env::var("SERVICE_LOG_LEVEL").ok(),
            format: if json_logs { LogFormat::Json } else { LogFormat::Pretty },
        }
    }

    /// Tracing target of the service binary (`conversation-service` -> `conversation_service`)
    pub fn service_target(&self) -> String {
        self.service_name.replace('-', "_")
    }

    /// Filter directive for the service crate, if one was requested
    pub fn service_directive(&self) -> Option<String> {
        self.service_log_level
            .as_ref()
            .map(|level| format!("{}={}", self.service_target(), level))
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "huddle-service".to_string(),
            log_level: "info".to_string(),
            service_log_level: None,
            format: LogFormat::Json,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_directive_uses_crate_target() {
        let config = TelemetryConfig {
            service_name: "conversation-service".to_string(),
            service_log_level: Some("debug".to_string()),
            ..TelemetryConfig::default()
        };
        assert_eq!(config.service_target(), "conversation_service");
        assert_eq!(
            config.service_directive().as_deref(),
            Some("conversation_service=debug")
        );
        assert!(TelemetryConfig::default().service_directive().is_none());
    }
}
