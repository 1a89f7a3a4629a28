//! Bootstrap topic-ensure helper
//!
//! Creates the topic if it does not exist and waits until its partitions are
//! visible in broker metadata. Idempotent; a concurrent create by another
//! instance is treated as success.

use std::time::{Duration, Instant};

use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::config::ClientConfig;
use rdkafka::error::KafkaError;
use rdkafka::types::RDKafkaErrorCode;
use thiserror::Error;

const METADATA_TIMEOUT: Duration = Duration::from_secs(10);
const VISIBILITY_DEADLINE: Duration = Duration::from_secs(10);
const VISIBILITY_POLL: Duration = Duration::from_millis(500);

#[derive(Debug, Error)]
pub enum TopicError {
    #[error(transparent)]
    Kafka(#[from] KafkaError),
    #[error("create topic {topic}: {code}")]
    Create {
        topic: String,
        code: RDKafkaErrorCode,
    },
    #[error("topic {topic} not visible after creation")]
    NotVisible { topic: String },
}

/// Guarantee the topic exists with at least `partitions` partitions
pub async fn ensure_topic(
    brokers: &[String],
    topic: &str,
    partitions: i32,
    replication: i32,
) -> Result<(), TopicError> {
    let admin: AdminClient<DefaultClientContext> = ClientConfig::new()
        .set("bootstrap.servers", brokers.join(","))
        .create()?;

    if let Some(found) = partition_count(&admin, topic)? {
        tracing::info!(topic, partitions = found, "kafka topic exists");
        return Ok(());
    }

    tracing::info!(topic, partitions, replication, "creating kafka topic");
    let results = admin
        .create_topics(
            &[NewTopic::new(
                topic,
                partitions,
                TopicReplication::Fixed(replication),
            )],
            &AdminOptions::new(),
        )
        .await?;
    for result in results {
        match result {
            Ok(_) => {}
            Err((_, RDKafkaErrorCode::TopicAlreadyExists)) => {}
            Err((name, code)) => return Err(TopicError::Create { topic: name, code }),
        }
    }

    // Wait for the partitions to land in metadata before consumers start.
    let deadline = Instant::now() + VISIBILITY_DEADLINE;
    loop {
        if let Some(found) = partition_count(&admin, topic)? {
            if found >= partitions as usize {
                tracing::info!(topic, partitions = found, "kafka topic is ready");
                return Ok(());
            }
        }
        if Instant::now() >= deadline {
            return Err(TopicError::NotVisible {
                topic: topic.to_string(),
            });
        }
        tokio::time::sleep(VISIBILITY_POLL).await;
    }
}

fn partition_count(
    admin: &AdminClient<DefaultClientContext>,
    topic: &str,
) -> Result<Option<usize>, TopicError> {
    let metadata = admin.inner().fetch_metadata(Some(topic), METADATA_TIMEOUT)?;
    let count = metadata
        .topics()
        .iter()
        .find(|t| t.name() == topic)
        .map(|t| t.partitions().len())
        .filter(|count| *count > 0);
    Ok(count)
}
