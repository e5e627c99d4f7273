//! Chat instance wiring: infrastructure clients, service graph, HTTP,
//! gRPC, and the per-instance subscriber, torn down together on shutdown.

use std::{net::SocketAddr, sync::Arc};

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

use chatr_common::IdGenerator;
use chatr_config::ChatrConfig;
use chatr_infra::{BrokerPublisher, Publisher, RedisPool, Subscriber};
use chatr_proto::chat::{
    channel_service_server::ChannelServiceServer, user_service_server::UserServiceServer,
};
use chatr_token::AccessTokens;
use chatr_transport::CircuitBreaker;

use crate::{
    cache::{CachedMembershipRepo, OnlineUsersRepo, RedisOnlineUsers},
    clients::{ForwarderGateway, GrpcForwarderGateway, GrpcUserGateway, UserGateway},
    grpc::ChatGrpcService,
    http::{ChatState, router},
    service::{
        ChannelService, ChatService, LiveChannelService, LiveChatService, LiveUserService,
        UserService,
    },
    storage::{MembershipRepo, ScyllaChannelRepo, ScyllaMembershipRepo, ScyllaMessageRepo},
    subscriber::BroadcastHandler,
    ws::SessionRegistry,
};

const GRPC_MAX_RECV_BYTES: usize = 8 * 1024 * 1024;

/// Run a chat instance until `shutdown` fires. Any startup failure (bind,
/// broker connect, store connect) is returned immediately.
pub async fn run(config: ChatrConfig, shutdown: CancellationToken) -> anyhow::Result<()> {
    // ── Infrastructure ───────────────────────────────────────────────────
    let redis = Arc::new(RedisPool::connect(&config.redis).await?);
    let session = chatr_infra::cassandra::connect(&config.cassandra).await?;
    let publisher = Arc::new(Publisher::connect(&config.kafka)?);

    let subscriber_id = config.chat.subscriber.id.clone();
    // Per-instance consumer group: every instance sees its own topic fully.
    let subscriber = Subscriber::connect(
        &config.kafka,
        &format!("chatr.chat.{}", Uuid::new_v4()),
        &subscriber_id,
        true,
    )?;

    // ── Service graph ────────────────────────────────────────────────────
    let ids = Arc::new(IdGenerator::new());
    let tokens = Arc::new(AccessTokens::new(
        &config.chat.jwt.secret,
        config.chat.jwt.expiration_second,
    ));

    let message_repo = Arc::new(ScyllaMessageRepo::new(Arc::clone(&session), &config.chat.message).await?);
    let channel_repo = Arc::new(ScyllaChannelRepo::new(Arc::clone(&session)).await?);
    let membership_store: Arc<dyn MembershipRepo> =
        Arc::new(ScyllaMembershipRepo::new(Arc::clone(&session)).await?);
    let membership: Arc<dyn MembershipRepo> = Arc::new(CachedMembershipRepo::new(
        membership_store,
        Arc::clone(&redis),
    ));
    let online: Arc<dyn OnlineUsersRepo> = Arc::new(RedisOnlineUsers::new(Arc::clone(&redis)));

    let breaker = Arc::new(CircuitBreaker::new());
    let user_gateway: Arc<dyn UserGateway> = Arc::new(GrpcUserGateway::new(
        chatr_transport::connect(&config.chat.grpc.client.user.endpoint)?,
        Arc::clone(&breaker),
    ));
    let forwarder_gateway: Arc<dyn ForwarderGateway> = Arc::new(GrpcForwarderGateway::new(
        chatr_transport::connect(&config.chat.grpc.client.forwarder.endpoint)?,
        Arc::clone(&breaker),
    ));

    let broker: Arc<dyn BrokerPublisher> = Arc::clone(&publisher) as Arc<dyn BrokerPublisher>;
    let chat_service: Arc<dyn ChatService> = Arc::new(LiveChatService::new(
        message_repo,
        Arc::clone(&online),
        broker,
        Arc::clone(&ids),
    ));
    let channel_service: Arc<dyn ChannelService> = Arc::new(LiveChannelService::new(
        channel_repo,
        Arc::clone(&online),
        Arc::clone(&tokens),
        ids,
    ));
    let user_service: Arc<dyn UserService> = Arc::new(LiveUserService::new(
        user_gateway,
        membership,
        Arc::clone(&online),
    ));

    let registry = Arc::new(SessionRegistry::new());
    let state = Arc::new(ChatState {
        tokens,
        users: Arc::clone(&user_service),
        chat: Arc::clone(&chat_service),
        channels: Arc::clone(&channel_service),
        forwarder: forwarder_gateway,
        registry: Arc::clone(&registry),
        subscriber_id,
        max_frame_bytes: config.chat.message.max_size_byte,
    });

    // ── HTTP server ──────────────────────────────────────────────────────
    let app = chatr_common::http::apply_middleware(router(state), config.chat.http.server.max_conn);
    let http_addr = SocketAddr::from(([0, 0, 0, 0], config.chat.http.server.port));
    let listener = TcpListener::bind(http_addr).await?;
    info!(addr = %http_addr, "chat http server listening");

    let http_shutdown = shutdown.clone();
    let http_task: tokio::task::JoinHandle<anyhow::Result<()>> = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { http_shutdown.cancelled().await })
            .await?;
        Ok(())
    });

    // ── gRPC server ──────────────────────────────────────────────────────
    let grpc_addr = SocketAddr::from(([0, 0, 0, 0], config.chat.grpc.server.port));
    let grpc_service = Arc::new(ChatGrpcService::new(channel_service, user_service));
    info!(addr = %grpc_addr, "chat grpc server listening");

    let grpc_shutdown = shutdown.clone();
    let grpc_task: tokio::task::JoinHandle<anyhow::Result<()>> = tokio::spawn(async move {
        chatr_transport::server_builder()
            .add_service(
                ChannelServiceServer::from_arc(Arc::clone(&grpc_service))
                    .max_decoding_message_size(GRPC_MAX_RECV_BYTES),
            )
            .add_service(
                UserServiceServer::from_arc(grpc_service)
                    .max_decoding_message_size(GRPC_MAX_RECV_BYTES),
            )
            .serve_with_shutdown(grpc_addr, async move { grpc_shutdown.cancelled().await })
            .await?;
        Ok(())
    });

    // ── Inbound message subscriber ───────────────────────────────────────
    let handler = Arc::new(BroadcastHandler::new(registry));
    let subscriber_shutdown = shutdown.clone();
    let subscriber_task: tokio::task::JoinHandle<anyhow::Result<()>> =
        tokio::spawn(async move {
            subscriber.run(handler, subscriber_shutdown).await?;
            Ok(())
        });

    // First task to finish (error or shutdown) takes the rest down.
    let (first, _, remaining) =
        futures::future::select_all([http_task, grpc_task, subscriber_task]).await;
    shutdown.cancel();
    for task in remaining {
        let _ = task.await;
    }
    info!("chat server stopped");
    first?
}
