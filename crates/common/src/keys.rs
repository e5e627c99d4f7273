//! Key-value namespaces and broker topic names shared across services.
//! Keys are colon-delimited, topics dot-delimited.

/// User records owned by the external user service.
pub const USER_KEY: &str = "rc:user";
/// Session-cookie records owned by the external user service.
pub const SESSION_KEY: &str = "rc:session";
/// Wait-list sorted set: member = user id, score = enqueue time (ms).
pub const USER_WAIT_LIST_KEY: &str = "rc:userwait";
/// Per-channel subscriber hash: field = user id, value = subscriber id.
pub const FORWARD_KEY: &str = "rc:forward";
/// Per-channel membership hash: field = user id.
pub const CHANNEL_USERS_KEY: &str = "rc:chanusers";
/// Per-channel online-user hash: field = user id.
pub const ONLINE_USERS_KEY: &str = "rc:onlineusers";
/// Token-bucket state for the upload gateway.
pub const RATE_LIMIT_KEY: &str = "rc:ratelimit";

/// Global topic every chat instance publishes outgoing messages to.
pub const MESSAGE_PUB_TOPIC: &str = "rc.msg.pub";
/// Match-result fan-out topic.
pub const MATCH_TOPIC: &str = "rc.match";
/// Prefix of per-chat-instance subscriber topics (`rc.msg.<suffix>`).
pub const MESSAGE_SUB_TOPIC_PREFIX: &str = "rc.msg.";

/// Header carrying the channel id on forward-auth responses.
pub const CHANNEL_ID_HEADER: &str = "x-channel-id";

/// Build a per-channel key under `prefix`.
#[must_use]
pub fn channel_key(prefix: &str, channel_id: u64) -> String {
    format!("{prefix}:{channel_id}")
}
