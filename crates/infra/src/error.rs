use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("redis {op}: {source}")]
    Redis {
        op: &'static str,
        #[source]
        source: ::redis::RedisError,
    },

    #[error("redis {op}: timed out")]
    RedisTimeout { op: &'static str },

    #[error("kafka {topic}: {source}")]
    Kafka {
        topic: String,
        #[source]
        source: rdkafka::error::KafkaError,
    },

    #[error("{context}: {source}")]
    Cassandra {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl Error {
    #[must_use]
    pub fn cassandra(
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Cassandra {
            context: context.into(),
            source: Box::new(source),
        }
    }
}

impl From<Error> for chatr_common::Error {
    fn from(error: Error) -> Self {
        Self::Unavailable {
            context: "downstream".into(),
            source: Box::new(error),
        }
    }
}
