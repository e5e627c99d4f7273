use std::sync::Arc;

use scylla::{
    client::{
        execution_profile::ExecutionProfile, session::Session, session_builder::SessionBuilder,
    },
    policies::retry::DefaultRetryPolicy,
    statement::Consistency,
};
use tracing::info;

use chatr_config::CassandraConfig;

use crate::error::{Error, Result};

/// Build the process-wide wide-column session.
///
/// One session per process; the driver pools connections per node
/// internally. All statements run at QUORUM with the default retry policy,
/// which retries idempotent reads on `Unavailable`-class failures.
pub async fn connect(config: &CassandraConfig) -> Result<Arc<Session>> {
    let profile = ExecutionProfile::builder()
        .consistency(Consistency::Quorum)
        .retry_policy(Arc::new(DefaultRetryPolicy::new()))
        .build();

    let mut builder = SessionBuilder::new()
        .known_nodes(config.known_nodes())
        .use_keyspace(&config.keyspace, false)
        .default_execution_profile_handle(profile.into_handle());
    if !config.user.is_empty() {
        builder = builder.user(&config.user, &config.password);
    }

    let session = builder
        .build()
        .await
        .map_err(|source| Error::cassandra("cassandra connect", source))?;
    info!(keyspace = %config.keyspace, "cassandra session ready");
    Ok(Arc::new(session))
}
