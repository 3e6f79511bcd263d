//! Main application state and service coordination
//!
//! `AppState` owns the match engine, the AMQP connection and consumer, the
//! HTTP health server and the background maintenance tasks.

use crate::amqp::connection::{AmqpConfig, AmqpConnection};
use crate::amqp::handlers::{CommandConsumer, MessageHandler};
use crate::amqp::publisher::{AmqpEventPublisher, PublisherConfig};
use crate::config::AppConfig;
use crate::error::{MatchmakingError, Result as MatchmakingResult};
use crate::matchmaking::EnqueueOutcome;
use crate::metrics::health::{HealthServer, HealthServerConfig};
use crate::metrics::MetricsCollector;
use crate::service::engine::{EnginePorts, MatchService};
use crate::types::MatchCommand;
use amqprs::channel::QueueDeclareArguments;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use thiserror::Error;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{debug, error, info, warn};

const METRICS_REFRESH_INTERVAL: Duration = Duration::from_secs(15);

/// Service-level errors
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("AMQP connection error: {message}")]
    AmqpConnection { message: String },

    #[error("Service initialization error: {message}")]
    Initialization { message: String },

    #[error("Background task error: {message}")]
    BackgroundTask { message: String },
}

/// Routes inbound commands to the match engine
pub struct ProductionMessageHandler {
    engine: Arc<MatchService>,
    metrics: Arc<MetricsCollector>,
}

impl ProductionMessageHandler {
    pub fn new(engine: Arc<MatchService>, metrics: Arc<MetricsCollector>) -> Self {
        Self { engine, metrics }
    }

    async fn dispatch(&self, command: MatchCommand) -> MatchmakingResult<()> {
        match command {
            MatchCommand::Enqueue {
                player_id,
                display_name,
                amount,
                category,
                difficulty,
            } => {
                let outcome = self
                    .engine
                    .enqueue(&player_id, &display_name, amount, category, difficulty)
                    .await?;
                match outcome {
                    EnqueueOutcome::Matched(room) => {
                        info!("{} matched into room {}", player_id, room.room_id)
                    }
                    EnqueueOutcome::Queued { position } => {
                        info!("{} queued at position {}", player_id, position)
                    }
                }
                Ok(())
            }
            MatchCommand::Cancel { player_id } => {
                self.engine.cancel(&player_id)?;
                Ok(())
            }
            MatchCommand::SubmitAnswer {
                room_id,
                player_id,
                answer_index,
            } => {
                self.engine
                    .submit_answer(room_id, &player_id, answer_index)
                    .await?;
                Ok(())
            }
        }
    }
}

fn command_name(command: &MatchCommand) -> &'static str {
    match command {
        MatchCommand::Enqueue { .. } => "enqueue",
        MatchCommand::Cancel { .. } => "cancel",
        MatchCommand::SubmitAnswer { .. } => "submit_answer",
    }
}

#[async_trait]
impl MessageHandler for ProductionMessageHandler {
    async fn handle_command(&self, command: MatchCommand) -> MatchmakingResult<()> {
        let operation = command_name(&command);
        let timer = self.metrics.start_timer();

        let result = self.dispatch(command).await;
        let elapsed = timer.stop();
        self.metrics
            .record_amqp_operation(operation, result.is_ok(), elapsed);

        match &result {
            Ok(()) => debug!(
                "Command {} handled in {:.2}ms",
                operation,
                elapsed.as_secs_f64() * 1000.0
            ),
            Err(e) => warn!(
                "Command {} rejected after {:.2}ms: {}",
                operation,
                elapsed.as_secs_f64() * 1000.0,
                e
            ),
        }
        result
    }

    async fn handle_error(&self, error: MatchmakingError, message_data: &[u8]) {
        error!(
            "Command handling error - type: '{}', message_size: {} bytes",
            error,
            message_data.len()
        );

        if !message_data.is_empty() {
            let preview_len = std::cmp::min(100, message_data.len());
            let preview = String::from_utf8_lossy(&message_data[..preview_len]);
            error!("Message preview: {:?}", preview);
        }
    }
}

/// Main application state containing all service components
pub struct AppState {
    config: AppConfig,
    engine: Arc<MatchService>,
    metrics: Arc<MetricsCollector>,
    /// Absent when running without a broker
    amqp_connection: Option<Arc<AmqpConnection>>,
    consumer: tokio::sync::Mutex<Option<CommandConsumer>>,
    health_shutdown: Mutex<Option<broadcast::Sender<()>>>,
    background_tasks: Mutex<Vec<JoinHandle<()>>>,
    is_running: Arc<RwLock<bool>>,
    started_at: Instant,
}

impl AppState {
    /// Connect to the broker and build the engine
    pub async fn new(config: AppConfig) -> Result<Self, ServiceError> {
        info!("Initializing {} service", config.service.name);
        info!(
            "Configuration: service={}, amqp_url={}",
            config.service.name, config.amqp.url
        );

        let metrics = Self::initialize_metrics()?;
        let amqp_connection = Self::initialize_amqp(&config).await?;

        let channel = amqp_connection
            .open_channel()
            .await
            .map_err(|e| ServiceError::Initialization {
                message: format!("Failed to open publisher channel: {}", e),
            })?;

        let publisher_config = PublisherConfig {
            exchange: config.amqp.events_exchange.clone(),
            max_retries: config.amqp.max_retry_attempts,
            retry_delay_ms: config.amqp.retry_delay_ms,
            ..PublisherConfig::default()
        };
        let publisher = Arc::new(
            AmqpEventPublisher::new(channel, publisher_config)
                .await
                .map_err(|e| ServiceError::Initialization {
                    message: format!("Failed to initialize event publisher: {}", e),
                })?,
        );

        let ports =
            EnginePorts::production(publisher, config.service.rng_seed, Some(metrics.clone()));
        let engine = MatchService::from_config(&config, ports).map_err(|e| {
            ServiceError::Initialization {
                message: format!("Failed to build match engine: {}", e),
            }
        })?;

        Ok(Self::assemble(
            config,
            Arc::new(engine),
            metrics,
            Some(amqp_connection),
        ))
    }

    /// Run around an existing engine without a broker connection
    pub fn offline(
        config: AppConfig,
        engine: Arc<MatchService>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self::assemble(config, engine, metrics, None)
    }

    fn assemble(
        config: AppConfig,
        engine: Arc<MatchService>,
        metrics: Arc<MetricsCollector>,
        amqp_connection: Option<Arc<AmqpConnection>>,
    ) -> Self {
        Self {
            config,
            engine,
            metrics,
            amqp_connection,
            consumer: tokio::sync::Mutex::new(None),
            health_shutdown: Mutex::new(None),
            background_tasks: Mutex::new(Vec::new()),
            is_running: Arc::new(RwLock::new(false)),
            started_at: Instant::now(),
        }
    }

    /// Start the HTTP server, command consumption and background tasks
    pub async fn start(self: &Arc<Self>) -> Result<(), ServiceError> {
        info!("Starting {} service", self.config.service.name);

        *self.is_running.write().await = true;

        self.start_health_server()?;
        self.start_amqp_consumption().await?;
        self.start_background_tasks()?;

        info!("✅ {} service started", self.config.service.name);
        Ok(())
    }

    /// Stop consuming, stop the HTTP server and background tasks
    pub async fn shutdown(&self) -> Result<(), ServiceError> {
        info!("Starting graceful shutdown of {}", self.config.service.name);

        *self.is_running.write().await = false;

        if let Some(consumer) = self.consumer.lock().await.take() {
            if let Err(e) = consumer.stop_consuming().await {
                warn!("Failed to stop AMQP consumer: {}", e);
            } else {
                info!("✅ AMQP command consumption stopped");
            }
        }

        let shutdown = self
            .health_shutdown
            .lock()
            .map_err(|_| ServiceError::BackgroundTask {
                message: "Failed to acquire health server lock".to_string(),
            })?
            .take();
        if let Some(shutdown) = shutdown {
            if shutdown.send(()).is_err() {
                debug!("Health server already stopped");
            }
        }

        self.stop_background_tasks().await;

        let final_stats = self.engine.stats().await;
        info!(
            "Final statistics: {} rooms created, {} finished, {} still queued",
            final_stats.rooms.rooms_created,
            final_stats.rooms.matches_finished,
            final_stats.queue.players_in_queue
        );
        info!("✅ {} shutdown completed", self.config.service.name);
        Ok(())
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub async fn is_running(&self) -> bool {
        *self.is_running.read().await
    }

    pub fn engine(&self) -> Arc<MatchService> {
        self.engine.clone()
    }

    pub fn metrics(&self) -> Arc<MetricsCollector> {
        self.metrics.clone()
    }

    pub fn amqp_connection(&self) -> Option<Arc<AmqpConnection>> {
        self.amqp_connection.clone()
    }

    pub fn uptime(&self) -> std::time::Duration {
        self.started_at.elapsed()
    }

    fn initialize_metrics() -> Result<Arc<MetricsCollector>, ServiceError> {
        MetricsCollector::new()
            .map(Arc::new)
            .map_err(|e| ServiceError::Initialization {
                message: format!("Failed to create metrics collector: {}", e),
            })
    }

    async fn initialize_amqp(config: &AppConfig) -> Result<Arc<AmqpConnection>, ServiceError> {
        info!("Connecting to AMQP broker: {}", config.amqp.url);

        let amqp_config =
            AmqpConfig::from_settings(&config.amqp).map_err(|e| ServiceError::Configuration {
                message: format!("Failed to parse AMQP URL: {}", e),
            })?;

        let connection =
            AmqpConnection::new(amqp_config)
                .await
                .map_err(|e| ServiceError::AmqpConnection {
                    message: format!("Failed to connect to AMQP: {}", e),
                })?;

        Ok(Arc::new(connection))
    }

    fn start_health_server(self: &Arc<Self>) -> Result<(), ServiceError> {
        let port = self.config.service.http_port;
        let server = HealthServer::new(
            HealthServerConfig {
                port,
                host: "0.0.0.0".to_string(),
            },
            self.metrics.clone(),
        )
        .with_app_state(self.clone());

        *self
            .health_shutdown
            .lock()
            .map_err(|_| ServiceError::BackgroundTask {
                message: "Failed to acquire health server lock".to_string(),
            })? = Some(server.shutdown_handle());

        let handle = tokio::spawn(async move {
            if let Err(e) = server.start().await {
                error!("Health server failed: {}", e);
            }
        });
        self.push_task(handle)?;

        info!("HTTP endpoints starting on port {}", port);
        Ok(())
    }

    async fn start_amqp_consumption(self: &Arc<Self>) -> Result<(), ServiceError> {
        let Some(connection) = &self.amqp_connection else {
            info!("No AMQP connection, command consumption disabled");
            return Ok(());
        };

        let queue_name = self.config.amqp.command_queue.clone();
        let channel = connection
            .open_channel()
            .await
            .map_err(|e| ServiceError::AmqpConnection {
                message: format!("Failed to open consumer channel: {}", e),
            })?;

        let queue_declare_args = QueueDeclareArguments::new(&queue_name)
            .durable(true)
            .auto_delete(false)
            .finish();
        channel
            .queue_declare(queue_declare_args)
            .await
            .map_err(|e| ServiceError::AmqpConnection {
                message: format!("Failed to declare queue {}: {}", queue_name, e),
            })?;
        info!("Queue '{}' declared", queue_name);

        let handler = Arc::new(ProductionMessageHandler::new(
            self.engine.clone(),
            self.metrics.clone(),
        ));
        let consumer = CommandConsumer::new(handler, channel);
        consumer
            .start_consuming(&queue_name)
            .await
            .map_err(|e| ServiceError::AmqpConnection {
                message: format!("Failed to start consuming commands: {}", e),
            })?;

        *self.consumer.lock().await = Some(consumer);
        info!("Listening for match commands on '{}'", queue_name);
        Ok(())
    }

    fn start_background_tasks(self: &Arc<Self>) -> Result<(), ServiceError> {
        let metrics_task = {
            let engine = self.engine.clone();
            let metrics = self.metrics.clone();
            let is_running = self.is_running.clone();
            let amqp = self.amqp_connection.clone();
            let started_at = self.started_at;

            tokio::spawn(async move {
                let mut interval = tokio::time::interval(METRICS_REFRESH_INTERVAL);
                debug!("Metrics refresh task started");

                while *is_running.read().await {
                    interval.tick().await;

                    engine.refresh_gauges().await;
                    metrics.set_uptime(started_at.elapsed());

                    let amqp_healthy = amqp.as_ref().map(|c| c.is_alive()).unwrap_or(true);
                    metrics.update_component_health("amqp", amqp_healthy);
                    metrics.update_component_health("match_engine", true);
                    metrics.update_health_status(if amqp_healthy { 2 } else { 1 });
                }

                debug!("Metrics refresh task stopped");
            })
        };

        let cleanup_task = {
            let engine = self.engine.clone();
            let is_running = self.is_running.clone();
            let cleanup_interval = self.config.cleanup_interval();

            tokio::spawn(async move {
                let mut interval = tokio::time::interval(cleanup_interval);
                info!(
                    "Room cleanup task started ({}s interval)",
                    cleanup_interval.as_secs()
                );

                while *is_running.read().await {
                    interval.tick().await;

                    let evicted = engine.cleanup_finished_rooms().await;
                    if evicted > 0 {
                        info!("Evicted {} finished rooms", evicted);
                    } else {
                        debug!("Cleanup check completed - nothing to evict");
                    }
                }

                info!("Room cleanup task stopped");
            })
        };

        self.push_task(metrics_task)?;
        self.push_task(cleanup_task)?;
        info!("Background maintenance tasks started");
        Ok(())
    }

    fn push_task(&self, handle: JoinHandle<()>) -> Result<(), ServiceError> {
        self.background_tasks
            .lock()
            .map_err(|_| ServiceError::BackgroundTask {
                message: "Failed to acquire task list lock".to_string(),
            })?
            .push(handle);
        Ok(())
    }

    async fn stop_background_tasks(&self) {
        let tasks: Vec<JoinHandle<()>> = match self.background_tasks.lock() {
            Ok(mut tasks) => tasks.drain(..).collect(),
            Err(_) => {
                warn!("Task list lock poisoned, background tasks left running");
                return;
            }
        };

        if tasks.is_empty() {
            return;
        }

        info!("Stopping {} background tasks...", tasks.len());
        for task in &tasks {
            task.abort();
        }
        for task in tasks {
            let _ = task.await;
        }
        info!("✅ Background tasks stopped");
    }
}
