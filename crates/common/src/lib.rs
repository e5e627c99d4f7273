pub mod error;
pub mod http;
pub mod id;
pub mod keys;

pub use error::{Error, Result};
pub use id::IdGenerator;

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// This machine's hostname, or `"unknown"` when it cannot be resolved.
pub fn local_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".into())
}
