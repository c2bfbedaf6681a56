use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use serde::Serialize;
use std::time::Duration;
use tarmac_core::sink::{AccountingSink, NotificationSink};
use tarmac_shared::models::events::{AccountingEvent, NotificationEvent};
use tracing::{error, info};

pub const ACCOUNTING_TOPIC: &str = "tarmac.accounting";
pub const NOTIFICATION_TOPIC: &str = "tarmac.notifications";

#[derive(Clone)]
pub struct EventProducer {
    producer: FutureProducer,
}

impl EventProducer {
    pub fn new(brokers: &str) -> Result<Self, rdkafka::error::KafkaError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", "5000")
            .create()?;

        Ok(Self { producer })
    }

    pub async fn publish(&self, topic: &str, key: &str, payload: &str) -> Result<(), rdkafka::error::KafkaError> {
        let record = FutureRecord::to(topic).key(key).payload(payload);

        match self.producer.send(record, Timeout::After(Duration::from_secs(0))).await {
            Ok(delivery) => {
                info!(
                    "Sent message to {}/{}: partition {} offset {}",
                    topic, key, delivery.partition, delivery.offset
                );
                Ok(())
            }
            Err((e, _msg)) => Err(e),
        }
    }

    async fn publish_json<T: Serialize>(&self, topic: &str, key: &str, event: &T) {
        let payload = match serde_json::to_string(event) {
            Ok(payload) => payload,
            Err(e) => {
                error!(topic, key, "Event could not be serialised: {}", e);
                return;
            }
        };
        if let Err(e) = self.publish(topic, key, &payload).await {
            error!(topic, key, "Event delivery failed: {}", e);
        }
    }
}

/// Publishes accounting and notification events for downstream consumers.
/// Keyed by booking and subject so each stream stays ordered per entity.
#[async_trait]
impl AccountingSink for EventProducer {
    async fn emit(&self, event: AccountingEvent) {
        self.publish_json(ACCOUNTING_TOPIC, &event.booking_id.to_string(), &event)
            .await;
    }
}

#[async_trait]
impl NotificationSink for EventProducer {
    async fn notify(&self, event: NotificationEvent) {
        self.publish_json(NOTIFICATION_TOPIC, &event.subject_id.to_string(), &event)
            .await;
    }
}
