//! Audit delivery backends.
//!
//! # Responsibilities
//! - Define the seam between the publisher pool and the message bus
//! - Deliver keyed payloads to a Kafka topic
//! - Provide an in-process sink for wiring tests
//!
//! # Design Decisions
//! - The Kafka connection is established lazily on first delivery, so the
//!   proxy starts even when the brokers are down
//! - A missing topic is created with a single partition
//! - Records with the same key always land on the same partition

use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rskafka::client::error::Error as KafkaError;
use rskafka::client::partition::{Compression, PartitionClient, UnknownTopicHandling};
use rskafka::client::ClientBuilder;
use rskafka::record::Record;
use rskafka::topic::Topic;
use thiserror::Error;
use tokio::sync::{mpsc, OnceCell};

const CREATE_TOPIC_TIMEOUT_MS: i32 = 5_000;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const PRODUCE_TIMEOUT: Duration = Duration::from_secs(10);

/// Delivery failures. None of them are fatal to the proxy.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("failed to connect to kafka brokers {brokers:?}: {source}")]
    Connect {
        brokers: Vec<String>,
        #[source]
        source: KafkaError,
    },

    #[error("failed to prepare topic {topic}: {source}")]
    Topic {
        topic: String,
        #[source]
        source: KafkaError,
    },

    #[error("topic {0} has no partitions")]
    NoPartitions(String),

    #[error("failed to produce to topic {topic}: {source}")]
    Produce {
        topic: String,
        #[source]
        source: KafkaError,
    },

    #[error("kafka did not answer within {0:?}")]
    Timeout(Duration),

    #[error("audit sink is closed")]
    Closed,
}

/// Destination for serialized audit records.
#[async_trait]
pub trait AuditSink: Send + Sync + 'static {
    /// Deliver one keyed payload.
    async fn deliver(&self, key: String, payload: Vec<u8>) -> Result<(), PublishError>;
}

struct TopicProducer {
    partitions: Vec<PartitionClient>,
}

impl TopicProducer {
    fn pick(&self, key: &str) -> &PartitionClient {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let index = (hasher.finish() % self.partitions.len() as u64) as usize;
        &self.partitions[index]
    }
}

/// Publishes records to one Kafka topic.
pub struct KafkaSink {
    brokers: Vec<String>,
    topic: String,
    producer: OnceCell<TopicProducer>,
}

impl KafkaSink {
    pub fn new(brokers: Vec<String>, topic: impl Into<String>) -> Self {
        Self {
            brokers,
            topic: topic.into(),
            producer: OnceCell::new(),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    async fn producer(&self) -> Result<&TopicProducer, PublishError> {
        self.producer
            .get_or_try_init(|| async {
                tokio::time::timeout(CONNECT_TIMEOUT, self.connect())
                    .await
                    .unwrap_or(Err(PublishError::Timeout(CONNECT_TIMEOUT)))
            })
            .await
    }

    async fn connect(&self) -> Result<TopicProducer, PublishError> {
        let client = ClientBuilder::new(self.brokers.clone())
            .build()
            .await
            .map_err(|source| PublishError::Connect {
                brokers: self.brokers.clone(),
                source,
            })?;

        let topic_error = |source| PublishError::Topic {
            topic: self.topic.clone(),
            source,
        };

        let topics = client.list_topics().await.map_err(topic_error)?;
        let mut ids = partition_ids(&topics, &self.topic);

        if ids.is_empty() {
            tracing::info!(topic = %self.topic, "Creating audit topic");
            client
                .controller_client()
                .map_err(topic_error)?
                .create_topic(self.topic.clone(), 1, 1, CREATE_TOPIC_TIMEOUT_MS)
                .await
                .map_err(topic_error)?;
            ids.push(0);
        }

        let mut partitions = Vec::with_capacity(ids.len());
        for id in ids {
            let partition = client
                .partition_client(self.topic.clone(), id, UnknownTopicHandling::Retry)
                .await
                .map_err(topic_error)?;
            partitions.push(partition);
        }

        if partitions.is_empty() {
            return Err(PublishError::NoPartitions(self.topic.clone()));
        }

        tracing::info!(
            brokers = ?self.brokers,
            topic = %self.topic,
            partitions = partitions.len(),
            "Connected to kafka"
        );

        Ok(TopicProducer { partitions })
    }
}

/// Partition ids of `name`, empty when the topic does not exist.
fn partition_ids(topics: &[Topic], name: &str) -> Vec<i32> {
    topics
        .iter()
        .find(|t| t.name == name)
        .map(|t| t.partitions.iter().copied().collect())
        .unwrap_or_default()
}

#[async_trait]
impl AuditSink for KafkaSink {
    async fn deliver(&self, key: String, payload: Vec<u8>) -> Result<(), PublishError> {
        let producer = self.producer().await?;
        let partition = producer.pick(&key);

        let record = Record {
            key: Some(key.into_bytes()),
            value: Some(payload),
            headers: BTreeMap::new(),
            timestamp: Utc::now(),
        };

        tokio::time::timeout(
            PRODUCE_TIMEOUT,
            partition.produce(vec![record], Compression::NoCompression),
        )
        .await
        .map_err(|_| PublishError::Timeout(PRODUCE_TIMEOUT))?
        .map_err(|source| PublishError::Produce {
            topic: self.topic.clone(),
            source,
        })?;

        Ok(())
    }
}

/// A delivered message, as seen by [`ChannelSink`] consumers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub key: String,
    pub payload: Vec<u8>,
}

/// Sink that forwards deliveries into an unbounded channel.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<Delivery>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Delivery>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl AuditSink for ChannelSink {
    async fn deliver(&self, key: String, payload: Vec<u8>) -> Result<(), PublishError> {
        self.tx
            .send(Delivery { key, payload })
            .map_err(|_| PublishError::Closed)
    }
}
