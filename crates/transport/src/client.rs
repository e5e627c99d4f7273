use std::time::Duration;

use tonic::transport::{Channel, Endpoint};
use tracing::info;

/// Build a shared lazy channel to an upstream service.
///
/// One channel per upstream is enough: tonic channels multiplex requests
/// over a single HTTP/2 connection and reconnect on demand. Keep-alive
/// pings every 10 s detect dead peers even without active streams.
pub fn connect(endpoint: &str) -> Result<Channel, tonic::transport::Error> {
    let uri = if endpoint.contains("://") {
        endpoint.to_string()
    } else {
        format!("http://{endpoint}")
    };
    info!(endpoint = %uri, "connecting grpc channel");
    let endpoint = Endpoint::from_shared(uri)?
        .connect_timeout(Duration::from_secs(15))
        .timeout(Duration::from_secs(15))
        .http2_keep_alive_interval(Duration::from_secs(10))
        .keep_alive_timeout(Duration::from_secs(1))
        .keep_alive_while_idle(true);
    Ok(endpoint.connect_lazy())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_bare_host_port() {
        assert!(connect("reverse-proxy:80").is_ok());
    }

    #[test]
    fn rejects_malformed_endpoint() {
        assert!(connect("http://exa mple").is_err());
    }
}
