//! Push socket transport
//!
//! Single responsibility: open a duplex text connection. No knowledge of
//! envelopes, dedup or reconnection.

use std::pin::Pin;

use async_trait::async_trait;
use futures::{future, Sink, SinkExt, Stream, StreamExt};
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tracing::debug;

use crate::error::{ClientError, Result};

/// Text frames from the server. The stream ending means the socket closed.
pub type InboundFrames = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Text frames to the server.
pub type OutboundFrames = Pin<Box<dyn Sink<String, Error = ClientError> + Send>>;

/// An open push connection, already split into its two halves.
pub struct PushConnection {
    pub outbound: OutboundFrames,
    pub inbound: InboundFrames,
}

/// Opens push connections.
#[async_trait]
pub trait PushConnector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<PushConnection>;
}

/// WebSocket connector over `tokio-tungstenite`.
#[derive(Debug, Default, Clone, Copy)]
pub struct WebSocketConnector;

#[async_trait]
impl PushConnector for WebSocketConnector {
    async fn connect(&self, url: &str) -> Result<PushConnection> {
        debug!("Opening push socket");
        let (ws, _) = connect_async(url).await?;
        let (sink, stream) = ws.split();

        let outbound = sink
            .sink_map_err(ClientError::from)
            .with(|text: String| future::ready(Ok::<_, ClientError>(Message::Text(text))));

        // Ping/pong are answered by tungstenite; close frames end the stream.
        let inbound = stream.filter_map(|frame| {
            future::ready(match frame {
                Ok(Message::Text(text)) => Some(Ok(text)),
                Ok(Message::Binary(data)) => String::from_utf8(data).ok().map(Ok),
                Ok(_) => None,
                Err(e) => Some(Err(ClientError::from(e))),
            })
        });

        Ok(PushConnection {
            outbound: Box::pin(outbound),
            inbound: Box::pin(inbound),
        })
    }
}
