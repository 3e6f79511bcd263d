//! AMQP event publisher for outbound room events

use crate::amqp::messages::{MessageEnvelope, MessageUtils, EVENTS_EXCHANGE};
use crate::error::{MatchmakingError, Result};
use crate::types::*;
use amqprs::{
    channel::{BasicPublishArguments, Channel, ExchangeDeclareArguments},
    BasicProperties,
};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

const MAX_PUBLISH_BACKOFF_MS: u64 = 5000;
const DEDUP_CACHE_LIMIT: usize = 10_000;

/// Trait for publishing duel events
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Sent once per human participant when a room is opened
    async fn publish_room_found(&self, event: RoomFound) -> Result<()>;

    async fn publish_round_settled(&self, event: RoundSettled) -> Result<()>;

    async fn publish_match_finished(&self, event: MatchFinished) -> Result<()>;

    async fn publish_matchmaking_failed(&self, event: MatchmakingFailed) -> Result<()>;
}

/// Configuration for event publishing
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    pub exchange: String,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub enable_deduplication: bool,
    pub publish_timeout_ms: u64,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            exchange: EVENTS_EXCHANGE.to_string(),
            max_retries: 3,
            retry_delay_ms: 500,
            enable_deduplication: true,
            publish_timeout_ms: 5000,
        }
    }
}

/// AMQP-based event publisher implementation
pub struct AmqpEventPublisher {
    channel: Channel,
    config: PublisherConfig,
    published_messages: Mutex<HashSet<String>>,
}

impl AmqpEventPublisher {
    pub async fn new(channel: Channel, config: PublisherConfig) -> Result<Self> {
        let publisher = Self {
            channel,
            config,
            published_messages: Mutex::new(HashSet::new()),
        };

        publisher.setup_exchange().await?;

        Ok(publisher)
    }

    async fn setup_exchange(&self) -> Result<()> {
        let mut args = ExchangeDeclareArguments::new(&self.config.exchange, "topic");
        args.durable(true);
        self.channel.exchange_declare(args).await.map_err(|e| {
            MatchmakingError::AmqpConnectionFailed {
                message: format!(
                    "Failed to declare events exchange {}: {}",
                    self.config.exchange, e
                ),
            }
        })?;

        info!("Declared events exchange: {}", self.config.exchange);
        Ok(())
    }

    async fn publish_event(&self, event: DuelEvent) -> Result<()> {
        let routing_key = MessageUtils::routing_key(&event);
        let envelope = MessageEnvelope::new(event, routing_key);
        self.publish_to_exchange(&envelope).await
    }

    /// Publish with retry and exponential backoff
    async fn publish_to_exchange<T>(&self, envelope: &MessageEnvelope<T>) -> Result<()>
    where
        T: serde::Serialize + serde::de::DeserializeOwned,
    {
        if self.config.enable_deduplication {
            let published_messages = self
                .published_messages
                .lock()
                .map_err(|_| MatchmakingError::lock_failed("published messages"))?;
            if published_messages.contains(&envelope.correlation_id) {
                debug!(
                    "Message {} already published, skipping",
                    envelope.correlation_id
                );
                return Ok(());
            }
        }

        let mut retry_count = 0;
        let mut delay = Duration::from_millis(self.config.retry_delay_ms);

        loop {
            match self.try_publish(envelope).await {
                Ok(()) => {
                    if self.config.enable_deduplication {
                        let mut published_messages = self
                            .published_messages
                            .lock()
                            .map_err(|_| MatchmakingError::lock_failed("published messages"))?;
                        if published_messages.len() >= DEDUP_CACHE_LIMIT {
                            published_messages.clear();
                        }
                        published_messages.insert(envelope.correlation_id.clone());
                    }

                    debug!(
                        "Published message {} to {} with key {}",
                        envelope.correlation_id, self.config.exchange, envelope.routing_key
                    );
                    return Ok(());
                }
                Err(e) => {
                    retry_count += 1;
                    if retry_count > self.config.max_retries {
                        error!(
                            "Failed to publish message {} after {} retries: {}",
                            envelope.correlation_id, self.config.max_retries, e
                        );
                        return Err(e);
                    }

                    warn!(
                        "Publish attempt {} failed for message {}: {}. Retrying in {:?}",
                        retry_count, envelope.correlation_id, e, delay
                    );

                    sleep(delay).await;
                    delay = Duration::from_millis(
                        (delay.as_millis() as u64 * 2).min(MAX_PUBLISH_BACKOFF_MS),
                    );
                }
            }
        }
    }

    async fn try_publish<T>(&self, envelope: &MessageEnvelope<T>) -> Result<()>
    where
        T: serde::Serialize + serde::de::DeserializeOwned,
    {
        let payload = envelope.to_bytes()?;

        let args = BasicPublishArguments::new(&self.config.exchange, &envelope.routing_key);
        let mut properties = BasicProperties::default();
        properties
            .with_message_id(&envelope.correlation_id)
            .with_timestamp(envelope.timestamp.timestamp() as u64)
            .with_content_type("application/json");

        let publish = self.channel.basic_publish(properties, payload, args);
        let timeout = Duration::from_millis(self.config.publish_timeout_ms);

        match tokio::time::timeout(timeout, publish).await {
            Ok(result) => result.map_err(|e| {
                MatchmakingError::AmqpConnectionFailed {
                    message: format!("Failed to publish message: {}", e),
                }
                .into()
            }),
            Err(_) => Err(MatchmakingError::AmqpConnectionFailed {
                message: format!("Publish timed out after {:?}", timeout),
            }
            .into()),
        }
    }

    pub fn clear_deduplication_cache(&self) {
        if let Ok(mut published_messages) = self.published_messages.lock() {
            published_messages.clear();
        }
    }

    pub fn cached_message_count(&self) -> usize {
        self.published_messages
            .lock()
            .map(|cache| cache.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl EventPublisher for AmqpEventPublisher {
    async fn publish_room_found(&self, event: RoomFound) -> Result<()> {
        self.publish_event(DuelEvent::RoomFound(event)).await
    }

    async fn publish_round_settled(&self, event: RoundSettled) -> Result<()> {
        self.publish_event(DuelEvent::RoundSettled(event)).await
    }

    async fn publish_match_finished(&self, event: MatchFinished) -> Result<()> {
        self.publish_event(DuelEvent::MatchFinished(event)).await
    }

    async fn publish_matchmaking_failed(&self, event: MatchmakingFailed) -> Result<()> {
        self.publish_event(DuelEvent::MatchmakingFailed(event)).await
    }
}

/// In-memory publisher that records every event
#[derive(Debug, Default)]
pub struct MockEventPublisher {
    published_events: Mutex<Vec<DuelEvent>>,
}

impl MockEventPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, event: DuelEvent) {
        if let Ok(mut events) = self.published_events.lock() {
            events.push(event);
        }
    }

    pub fn events(&self) -> Vec<DuelEvent> {
        self.published_events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Routing keys of everything published so far, in order
    pub fn routing_keys(&self) -> Vec<&'static str> {
        self.events().iter().map(MessageUtils::routing_key).collect()
    }

    pub fn count_of(&self, routing_key: &str) -> usize {
        self.routing_keys()
            .into_iter()
            .filter(|key| *key == routing_key)
            .count()
    }

    pub fn room_found_for(&self, player_id: &str) -> Option<RoomFound> {
        self.events().into_iter().find_map(|event| match event {
            DuelEvent::RoomFound(found) if found.player_id == player_id => Some(found),
            _ => None,
        })
    }

    pub fn rounds_settled(&self) -> Vec<RoundSettled> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                DuelEvent::RoundSettled(settled) => Some(settled),
                _ => None,
            })
            .collect()
    }

    pub fn matches_finished(&self) -> Vec<MatchFinished> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                DuelEvent::MatchFinished(finished) => Some(finished),
                _ => None,
            })
            .collect()
    }

    pub fn failures(&self) -> Vec<MatchmakingFailed> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                DuelEvent::MatchmakingFailed(failed) => Some(failed),
                _ => None,
            })
            .collect()
    }

    pub fn clear_events(&self) {
        if let Ok(mut events) = self.published_events.lock() {
            events.clear();
        }
    }
}

#[async_trait]
impl EventPublisher for MockEventPublisher {
    async fn publish_room_found(&self, event: RoomFound) -> Result<()> {
        self.record(DuelEvent::RoomFound(event));
        Ok(())
    }

    async fn publish_round_settled(&self, event: RoundSettled) -> Result<()> {
        self.record(DuelEvent::RoundSettled(event));
        Ok(())
    }

    async fn publish_match_finished(&self, event: MatchFinished) -> Result<()> {
        self.record(DuelEvent::MatchFinished(event));
        Ok(())
    }

    async fn publish_matchmaking_failed(&self, event: MatchmakingFailed) -> Result<()> {
        self.record(DuelEvent::MatchmakingFailed(event));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amqp::messages::{MATCHMAKING_FAILED_ROUTING_KEY, ROOM_FOUND_ROUTING_KEY};

    fn failure(player_id: &str) -> MatchmakingFailed {
        MatchmakingFailed {
            player_id: player_id.to_string(),
            bet: Bet::new(10, Category::Math, Difficulty::Medium),
            reason: "no questions".to_string(),
            timestamp: chrono::Utc::now(),
        }
    }

    #[test]
    fn test_publisher_config_default() {
        let config = PublisherConfig::default();
        assert_eq!(config.exchange, EVENTS_EXCHANGE);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.retry_delay_ms, 500);
        assert!(config.enable_deduplication);
    }

    #[tokio::test]
    async fn test_mock_publisher_records_in_order() {
        let publisher = MockEventPublisher::new();
        publisher.publish_matchmaking_failed(failure("a")).await.unwrap();
        publisher.publish_matchmaking_failed(failure("b")).await.unwrap();

        assert_eq!(publisher.count_of(MATCHMAKING_FAILED_ROUTING_KEY), 2);
        assert_eq!(publisher.count_of(ROOM_FOUND_ROUTING_KEY), 0);
        let failures = publisher.failures();
        assert_eq!(failures[0].player_id, "a");
        assert_eq!(failures[1].player_id, "b");

        publisher.clear_events();
        assert!(publisher.events().is_empty());
    }
}
