//! Match instance wiring: Redis wait-list, Kafka result fan-out, gRPC
//! clients, and the match websocket server.

use std::{net::SocketAddr, sync::Arc};

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

use chatr_common::keys;
use chatr_config::ChatrConfig;
use chatr_infra::{BrokerPublisher, Publisher, RedisPool, Subscriber};
use chatr_transport::CircuitBreaker;

use crate::{
    clients::{ChannelGateway, GrpcChannelGateway, GrpcUserGateway, UserGateway},
    http::{MatchSessionRegistry, MatchState, router},
    repo::RedisWaitList,
    service::{LiveMatchService, MatchService},
    subscriber::MatchResultHandler,
};

/// Run a match instance until `shutdown` fires.
pub async fn run(config: ChatrConfig, shutdown: CancellationToken) -> anyhow::Result<()> {
    let redis = Arc::new(RedisPool::connect(&config.redis).await?);
    let publisher = Arc::new(Publisher::connect(&config.kafka)?);
    // Every match instance consumes the full result stream.
    let subscriber = Subscriber::connect(
        &config.kafka,
        &format!("chatr.match.{}", Uuid::new_v4()),
        keys::MATCH_TOPIC,
        true,
    )?;

    let breaker = Arc::new(CircuitBreaker::new());
    let channels: Arc<dyn ChannelGateway> = Arc::new(GrpcChannelGateway::new(
        chatr_transport::connect(&config.match_.grpc.client.chat.endpoint)?,
        Arc::clone(&breaker),
    ));
    let users: Arc<dyn UserGateway> = Arc::new(GrpcUserGateway::new(
        chatr_transport::connect(&config.match_.grpc.client.user.endpoint)?,
        breaker,
    ));

    let wait_list = Arc::new(RedisWaitList::new(redis));
    let broker: Arc<dyn BrokerPublisher> = publisher as Arc<dyn BrokerPublisher>;
    let service: Arc<dyn MatchService> =
        Arc::new(LiveMatchService::new(wait_list, Arc::clone(&channels), broker));

    let registry = Arc::new(MatchSessionRegistry::new());
    let state = Arc::new(MatchState {
        users,
        service,
        registry: Arc::clone(&registry),
    });

    let app = chatr_common::http::apply_middleware(
        router(state),
        config.match_.http.server.max_conn,
    );
    let http_addr = SocketAddr::from(([0, 0, 0, 0], config.match_.http.server.port));
    let listener = TcpListener::bind(http_addr).await?;
    info!(addr = %http_addr, "match http server listening");

    let http_shutdown = shutdown.clone();
    let http_task: tokio::task::JoinHandle<anyhow::Result<()>> = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { http_shutdown.cancelled().await })
            .await?;
        Ok(())
    });

    let handler = Arc::new(MatchResultHandler::new(registry, channels));
    let subscriber_shutdown = shutdown.clone();
    let subscriber_task: tokio::task::JoinHandle<anyhow::Result<()>> =
        tokio::spawn(async move {
            subscriber.run(handler, subscriber_shutdown).await?;
            Ok(())
        });

    let (first, _, remaining) =
        futures::future::select_all([http_task, subscriber_task]).await;
    shutdown.cancel();
    for task in remaining {
        let _ = task.await;
    }
    info!("match server stopped");
    first?
}
