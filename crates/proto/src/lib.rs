//! Generated gRPC contracts for the chat, forwarder, and user services.

#[allow(unused_qualifications)]
pub mod chat {
    tonic::include_proto!("chat");
}

#[allow(unused_qualifications)]
pub mod forwarder {
    tonic::include_proto!("forwarder");
}

#[allow(unused_qualifications)]
pub mod user {
    tonic::include_proto!("user");
}
