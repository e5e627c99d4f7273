//! Forwarder instance wiring: the gRPC registry surface and the shared
//! consumer-group routing loop.

use std::{net::SocketAddr, sync::Arc};

use tokio_util::sync::CancellationToken;
use tracing::info;

use chatr_common::keys;
use chatr_config::ChatrConfig;
use chatr_infra::{BrokerPublisher, Publisher, RedisPool, Subscriber};
use chatr_proto::forwarder::forwarder_service_server::ForwarderServiceServer;

use crate::{
    grpc::ForwarderGrpcService,
    repo::RedisSubscriberRepo,
    service::{ForwarderService, LiveForwarderService},
    subscriber::ForwardHandler,
};

/// All forwarder instances share one consumer group, so each global
/// message is routed by exactly one of them.
const CONSUMER_GROUP: &str = "chatr.forwarder";

/// Run a forwarder instance until `shutdown` fires.
pub async fn run(config: ChatrConfig, shutdown: CancellationToken) -> anyhow::Result<()> {
    let redis = Arc::new(RedisPool::connect(&config.redis).await?);
    let publisher = Arc::new(Publisher::connect(&config.kafka)?);
    // Manual ack: a message is committed only after the whole fan-out
    // succeeded.
    let subscriber = Subscriber::connect(
        &config.kafka,
        CONSUMER_GROUP,
        keys::MESSAGE_PUB_TOPIC,
        false,
    )?;

    let repo = Arc::new(RedisSubscriberRepo::new(redis));
    let broker: Arc<dyn BrokerPublisher> = publisher as Arc<dyn BrokerPublisher>;
    let service: Arc<dyn ForwarderService> = Arc::new(LiveForwarderService::new(repo, broker));

    let grpc_addr = SocketAddr::from(([0, 0, 0, 0], config.forwarder.grpc.server.port));
    info!(addr = %grpc_addr, "forwarder grpc server listening");

    let grpc_service = ForwarderGrpcService::new(Arc::clone(&service));
    let grpc_shutdown = shutdown.clone();
    let grpc_task: tokio::task::JoinHandle<anyhow::Result<()>> = tokio::spawn(async move {
        chatr_transport::server_builder()
            .add_service(ForwarderServiceServer::new(grpc_service))
            .serve_with_shutdown(grpc_addr, async move { grpc_shutdown.cancelled().await })
            .await?;
        Ok(())
    });

    let handler = Arc::new(ForwardHandler::new(service));
    let subscriber_shutdown = shutdown.clone();
    let subscriber_task: tokio::task::JoinHandle<anyhow::Result<()>> =
        tokio::spawn(async move {
            subscriber.run(handler, subscriber_shutdown).await?;
            Ok(())
        });

    let (first, _, remaining) =
        futures::future::select_all([grpc_task, subscriber_task]).await;
    shutdown.cancel();
    for task in remaining {
        let _ = task.await;
    }
    info!("forwarder server stopped");
    first?
}
