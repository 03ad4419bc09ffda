//! Channel over turmoil's simulated TCP.
//!
//! WebSocket framing is real (`tokio-tungstenite`); only the socket is
//! simulated, so partitions, latency and host crashes all surface through the
//! same [`ChannelEvent`](mup_core::transport::ChannelEvent)s the production
//! channel produces.

use std::io;

use async_trait::async_trait;
use mup_client::WebSocketConnection;
use mup_core::transport::Channel;
use tracing::debug;

/// [`Channel`] that dials turmoil hosts.
///
/// URLs use the turmoil host name: `ws://server:8080/`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimChannel;

impl SimChannel {
    /// Create a simulated channel.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Channel for SimChannel {
    type Connection = WebSocketConnection<turmoil::net::TcpStream>;

    async fn open(&self, url: &str) -> io::Result<Self::Connection> {
        let authority = authority(url)?;
        let stream = turmoil::net::TcpStream::connect(authority).await?;
        let (socket, _response) =
            tokio_tungstenite::client_async(url, stream).await.map_err(io::Error::other)?;
        debug!(url, "simulated channel open");
        Ok(WebSocketConnection::new(socket))
    }
}

/// `host:port` of a `ws://` URL.
fn authority(url: &str) -> io::Result<&str> {
    let rest = url
        .strip_prefix("ws://")
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "expected a ws:// url"))?;
    let authority = rest.split('/').next().unwrap_or(rest);
    if authority.contains(':') {
        Ok(authority)
    } else {
        Err(io::Error::new(io::ErrorKind::InvalidInput, "url must name a port"))
    }
}
