//! Conversation service configuration

use huddle_core::{HuddleError, Result};
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ConversationServiceConfig {
    pub http_bind: String,
    pub jwt_secret: String,
    pub max_command_attempts: u32,
    pub retry_base_delay: Duration,
    pub typing_sweep_interval: Duration,
    pub default_max_participants: u32,
    pub event_channel_capacity: usize,
}

impl ConversationServiceConfig {
    pub fn from_env() -> Result<Self> {
        let jwt_secret = std::env::var("JWT_SECRET")
            .map_err(|_| HuddleError::Config("JWT_SECRET must be set".to_string()))?;

        Ok(Self {
            http_bind: std::env::var("HTTP_BIND").unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
            jwt_secret,
            max_command_attempts: parse_env("MAX_COMMAND_ATTEMPTS", 3)?,
            retry_base_delay: Duration::from_millis(parse_env("RETRY_BASE_DELAY_MS", 10)?),
            typing_sweep_interval: Duration::from_secs(parse_env("TYPING_SWEEP_INTERVAL_SECS", 60)?),
            default_max_participants: parse_env(
                "DEFAULT_MAX_PARTICIPANTS",
                huddle_conversation::permissions::DEFAULT_MAX_PARTICIPANTS,
            )?,
            event_channel_capacity: parse_env("EVENT_CHANNEL_CAPACITY", 1024)?,
        })
    }
}

fn parse_env<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|e| HuddleError::Config(format!("Invalid {}: {}", name, e))),
        Err(_) => Ok(default),
    }
}

impl Default for ConversationServiceConfig {
    fn default() -> Self {
        Self {
            http_bind: "0.0.0.0:8080".to_string(),
            jwt_secret: String::new(),
            max_command_attempts: 3,
            retry_base_delay: Duration::from_millis(10),
            typing_sweep_interval: Duration::from_secs(60),
            default_max_participants: huddle_conversation::permissions::DEFAULT_MAX_PARTICIPANTS,
            event_channel_capacity: 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_variable_uses_default() {
        let value: u32 = parse_env("HUDDLE_TEST_UNSET_VARIABLE", 7).unwrap();
        assert_eq!(value, 7);
    }

    #[test]
    fn test_unparsable_variable_is_config_error() {
        std::env::set_var("HUDDLE_TEST_BAD_ATTEMPTS", "three");
        let err = parse_env::<u32>("HUDDLE_TEST_BAD_ATTEMPTS", 3).unwrap_err();
        assert!(matches!(err, HuddleError::Config(_)));
    }
}
