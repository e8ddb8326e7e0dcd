use amiquip::{Connection, Exchange, Publish, QueueDeclareOptions};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::communication::messages::{ControllerEvent, EventSink};
use crate::global_variables::{AMQP_URL, QUEUE_PRIORITY_EVENTS};

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("broker error: {0}")]
    Broker(#[from] amiquip::Error),
    #[error("publisher task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Hands events to the RabbitMQ publisher task without blocking the control loop.
#[derive(Debug, Clone)]
pub struct AmqpEventSink {
    tx: UnboundedSender<ControllerEvent>,
    disconnected: bool,
}

impl AmqpEventSink {
    pub fn channel() -> (Self, UnboundedReceiver<ControllerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx,
                disconnected: false,
            },
            rx,
        )
    }
}

impl EventSink for AmqpEventSink {
    fn emit(&mut self, event: &ControllerEvent) {
        if self.disconnected {
            return;
        }
        if self.tx.send(event.clone()).is_err() {
            log::warn!("Event publisher stopped; further events stay local");
            self.disconnected = true;
        }
    }
}

/// Publishes every received event as JSON on the `priority_events` queue
/// until all senders are dropped.
pub async fn publish_events_rabbitmq(
    mut rx: UnboundedReceiver<ControllerEvent>,
) -> Result<(), PublishError> {
    tokio::task::spawn_blocking(move || -> Result<(), PublishError> {
        let mut connection = Connection::insecure_open(AMQP_URL)?;
        let channel = connection.open_channel(None)?;
        let _queue = channel.queue_declare(QUEUE_PRIORITY_EVENTS, QueueDeclareOptions::default())?;
        let exchange = Exchange::direct(&channel);
        log::info!("Publishing controller events to '{}'", QUEUE_PRIORITY_EVENTS);

        let mut published = 0u64;
        while let Some(event) = rx.blocking_recv() {
            let payload = match serde_json::to_string(&event) {
                Ok(payload) => payload,
                Err(e) => {
                    log::warn!("Dropping unserializable {} event: {}", event.kind(), e);
                    continue;
                }
            };
            exchange.publish(Publish::new(payload.as_bytes(), QUEUE_PRIORITY_EVENTS))?;
            published += 1;
        }
        log::info!("Event publisher done after {} messages", published);
        connection.close()?;
        Ok(())
    })
    .await?
}
