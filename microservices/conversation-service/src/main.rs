//! Conversation Microservice
//!
//! Conversation state core behind a REST and WebSocket surface:
//! - Group and direct conversations with derived member capabilities
//! - Message lifecycle with threads, reactions and soft deletion
//! - Exact unread counts, read receipts and delivery status
//! - Typing indicators with read-time expiry

use huddle_core::{
    DependencyStatus, HealthStatus, HuddleError, HuddleService, MicroserviceRuntime,
    ReadinessStatus, Result,
};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

mod api;
mod config;
mod handlers;
mod infrastructure;
mod metrics;

pub use config::ConversationServiceConfig;

use handlers::CommandDispatcher;
use infrastructure::{
    EventBus, InMemoryConversationStore, InMemoryDirectory, InMemoryMessageStore,
    JwtIdentityVerifier,
};
use metrics::ServiceMetrics;

#[tokio::main]
async fn main() -> Result<()> {
    let _telemetry = huddle_telemetry::init("conversation-service")
        .map_err(|e| HuddleError::Config(e.to_string()))?;

    info!("Starting Conversation microservice");

    let service = Arc::new(ConversationService::new()?);
    MicroserviceRuntime::run(service).await
}

pub struct ConversationService {
    config: ConversationServiceConfig,
    dispatcher: Arc<CommandDispatcher>,
    identity: Arc<JwtIdentityVerifier>,
    metrics: Arc<ServiceMetrics>,
    start_time: Instant,
}

impl ConversationService {
    pub fn new() -> Result<Self> {
        let config = ConversationServiceConfig::from_env()?;
        let metrics = Arc::new(ServiceMetrics::new());
        let directory = Arc::new(InMemoryDirectory::new());
        let events = EventBus::new(config.event_channel_capacity);

        let dispatcher = Arc::new(CommandDispatcher::new(
            Arc::new(InMemoryConversationStore::new()),
            Arc::new(InMemoryMessageStore::new()),
            directory.clone(),
            events,
            metrics.clone(),
            &config,
        ));
        let identity =
            Arc::new(JwtIdentityVerifier::new(&config.jwt_secret).with_directory(directory));

        Ok(Self {
            config,
            dispatcher,
            identity,
            metrics,
            start_time: Instant::now(),
        })
    }

    /// Periodic memory hygiene for typing entries; expiry itself happens at read time
    fn spawn_typing_sweeper(&self) {
        let dispatcher = self.dispatcher.clone();
        let period = self.config.typing_sweep_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                dispatcher.sweep_typing();
            }
        });
    }

    /// Stand-in notification consumer until a push collaborator is wired up
    fn spawn_notification_logger(&self) {
        let mut notifications = self.dispatcher.events().subscribe_notifications();
        tokio::spawn(async move {
            loop {
                match notifications.recv().await {
                    Ok(event) => debug!(
                        conversation_id = %event.conversation_id(),
                        recipients = event.recipient_ids().len(),
                        ?event,
                        "Notification event"
                    ),
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Notification consumer lagged");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }
}

#[async_trait::async_trait]
impl HuddleService for ConversationService {
    fn service_id(&self) -> &'static str {
        "conversation-service"
    }

    async fn health(&self) -> HealthStatus {
        HealthStatus {
            healthy: true,
            service_id: self.service_id().to_string(),
            version: self.version().to_string(),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }

    async fn ready(&self) -> ReadinessStatus {
        ReadinessStatus {
            ready: true,
            dependencies: vec![DependencyStatus {
                name: "in-memory-store".to_string(),
                available: true,
                latency_ms: Some(0),
            }],
        }
    }

    async fn shutdown(&self) -> Result<()> {
        info!("Shutting down Conversation service");
        Ok(())
    }

    async fn start(self: Arc<Self>) -> Result<()> {
        info!(http = %self.config.http_bind, "Starting Conversation servers");

        self.spawn_typing_sweeper();
        self.spawn_notification_logger();

        let app = api::create_router(api::AppState {
            dispatcher: self.dispatcher.clone(),
            identity: self.identity.clone(),
            metrics: self.metrics.clone(),
            started_at: self.start_time,
        });

        let listener = tokio::net::TcpListener::bind(&self.config.http_bind).await?;
        axum::serve(listener, app).await?;

        Ok(())
    }
}
