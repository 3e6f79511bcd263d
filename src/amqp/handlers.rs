//! AMQP command consumer
//!
//! Inbound commands (enqueue, cancel, submit answer) arrive on one queue and are
//! forwarded to a [`MessageHandler`]. Every delivery is acknowledged after
//! processing; malformed or rejected commands are logged and dropped rather
//! than redelivered.

use crate::amqp::messages::MessageUtils;
use crate::error::{MatchmakingError, Result};
use crate::types::MatchCommand;
use amqprs::{
    channel::{BasicAckArguments, BasicCancelArguments, BasicConsumeArguments, Channel},
    consumer::AsyncConsumer,
    BasicProperties, Deliver,
};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Trait defining the interface for handling inbound commands
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle_command(&self, command: MatchCommand) -> Result<()>;

    /// Called when a delivery could not be decoded or processed
    async fn handle_error(&self, error: MatchmakingError, message_data: &[u8]);
}

/// Consumer bound to the command queue
pub struct CommandConsumer {
    handler: Arc<dyn MessageHandler>,
    channel: Channel,
    consumer_tag: String,
}

impl CommandConsumer {
    pub fn new(handler: Arc<dyn MessageHandler>, channel: Channel) -> Self {
        let consumer_tag = format!("duel-consumer-{}", uuid::Uuid::new_v4());

        Self {
            handler,
            channel,
            consumer_tag,
        }
    }

    pub fn consumer_tag(&self) -> &str {
        &self.consumer_tag
    }

    /// Start consuming messages from the queue
    pub async fn start_consuming(&self, queue_name: &str) -> Result<()> {
        let args = BasicConsumeArguments::new(queue_name, &self.consumer_tag);

        self.channel
            .basic_consume(CommandDelivery::new(self.handler.clone()), args)
            .await
            .map_err(|e| MatchmakingError::AmqpConnectionFailed {
                message: format!("Failed to start consuming: {}", e),
            })?;

        info!("Started consuming commands from queue: {}", queue_name);
        Ok(())
    }

    pub async fn stop_consuming(&self) -> Result<()> {
        let args = BasicCancelArguments::new(&self.consumer_tag);

        self.channel.basic_cancel(args).await.map_err(|e| {
            MatchmakingError::AmqpConnectionFailed {
                message: format!("Failed to stop consuming: {}", e),
            }
        })?;

        info!("Stopped consuming commands");
        Ok(())
    }
}

struct CommandDelivery {
    handler: Arc<dyn MessageHandler>,
}

impl CommandDelivery {
    fn new(handler: Arc<dyn MessageHandler>) -> Self {
        Self { handler }
    }

    async fn process_message(&self, content: &[u8]) -> Result<()> {
        let command = MessageUtils::deserialize_command(content)?;
        debug!("Command parsed: {:?}", command);
        self.handler.handle_command(command).await
    }
}

#[async_trait]
impl AsyncConsumer for CommandDelivery {
    async fn consume(
        &mut self,
        channel: &Channel,
        deliver: Deliver,
        _basic_properties: BasicProperties,
        content: Vec<u8>,
    ) {
        let delivery_tag = deliver.delivery_tag();
        info!(
            "AMQP command received - delivery_tag: {}, routing_key: '{}', size: {} bytes",
            delivery_tag,
            deliver.routing_key(),
            content.len()
        );

        let start_time = std::time::Instant::now();

        match self.process_message(&content).await {
            Ok(()) => {
                info!(
                    "Command processed - delivery_tag: {}, processing_time: {:.2}ms",
                    delivery_tag,
                    start_time.elapsed().as_secs_f64() * 1000.0
                );
            }
            Err(e) => {
                error!(
                    "Command processing failed - delivery_tag: {}, processing_time: {:.2}ms, error: {}",
                    delivery_tag,
                    start_time.elapsed().as_secs_f64() * 1000.0,
                    e
                );
                let error = match e.downcast::<MatchmakingError>() {
                    Ok(known) => known,
                    Err(other) => MatchmakingError::InternalError {
                        message: other.to_string(),
                    },
                };
                self.handler.handle_error(error, &content).await;
            }
        }

        if let Err(e) = channel
            .basic_ack(BasicAckArguments::new(delivery_tag, false))
            .await
        {
            warn!("Failed to ack delivery {}: {}", delivery_tag, e);
        }
    }
}

/// Message handler that records commands, for tests
#[derive(Default)]
pub struct MockMessageHandler {
    pub received_commands: Arc<tokio::sync::Mutex<Vec<MatchCommand>>>,
    pub errors: Arc<tokio::sync::Mutex<Vec<String>>>,
}

impl MockMessageHandler {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MessageHandler for MockMessageHandler {
    async fn handle_command(&self, command: MatchCommand) -> Result<()> {
        self.received_commands.lock().await.push(command);
        Ok(())
    }

    async fn handle_error(&self, error: MatchmakingError, _message_data: &[u8]) {
        self.errors.lock().await.push(error.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Category, Difficulty};

    #[tokio::test]
    async fn test_delivery_forwards_decoded_command() {
        let handler = Arc::new(MockMessageHandler::new());
        let delivery = CommandDelivery::new(handler.clone());

        let bytes = MessageUtils::serialize_command(&MatchCommand::Enqueue {
            player_id: "p1".to_string(),
            display_name: "Ana".to_string(),
            amount: 10,
            category: Category::Culture,
            difficulty: Difficulty::Hard,
        })
        .unwrap();

        delivery.process_message(&bytes).await.unwrap();

        let received = handler.received_commands.lock().await;
        assert_eq!(received.len(), 1);
        assert!(matches!(
            &received[0],
            MatchCommand::Enqueue { player_id, .. } if player_id == "p1"
        ));
    }

    #[tokio::test]
    async fn test_delivery_rejects_garbage() {
        let handler = Arc::new(MockMessageHandler::new());
        let delivery = CommandDelivery::new(handler.clone());

        assert!(delivery.process_message(b"not json").await.is_err());
        assert!(handler.received_commands.lock().await.is_empty());
    }
}
