//! Realtime WebSocket Feed - Change Feed over a JSON Socket Protocol
//!
//! Implements the `ChangeFeedTransport` port. Each `open` dials one
//! socket, sends a subscribe frame for the product's order rows and
//! waits for the server's acknowledgement before handing the socket back
//! as a `FeedStream`.
//!
//! Frames (JSON text, tagged by `type`):
//! - out: `subscribe { topic, table, filter }`
//! - in: `subscribed`, `error`, `heartbeat`, `row`, `aggregate`
//!
//! Reconnects are not handled here. A closed or failed socket ends the
//! stream and the owning channel decides what happens next.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, instrument};

use crate::domain::feed::{FeedEvent, FeedFilter, MutationKind};
use crate::ports::change_feed::{ChangeFeedTransport, FeedStream};

/// Subscribe frame sent right after the socket opens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename = "subscribe")]
struct SubscribeFrame {
    topic: String,
    table: String,
    /// Row filter in `column=eq.value` form.
    filter: String,
}

impl SubscribeFrame {
    fn for_filter(filter: &FeedFilter) -> Self {
        Self {
            topic: format!("{}:{}", filter.table, filter.product_id),
            table: filter.table.clone(),
            filter: format!("product_id=eq.{}", filter.product_id),
        }
    }
}

/// Frames the server sends.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ServerFrame {
    Subscribed {
        #[serde(default)]
        topic: String,
    },
    Error {
        message: String,
    },
    Heartbeat,
    Row {
        product_id: String,
        op: MutationKind,
    },
    Aggregate {
        product_id: String,
        total_orders: u64,
    },
}

impl ServerFrame {
    fn into_event(self) -> Option<FeedEvent> {
        match self {
            Self::Row { product_id, op } => Some(FeedEvent::RowMutation { product_id, op }),
            Self::Aggregate {
                product_id,
                total_orders,
            } => Some(FeedEvent::AggregateUpdate {
                product_id,
                total_orders,
            }),
            Self::Subscribed { .. } | Self::Error { .. } | Self::Heartbeat => None,
        }
    }
}

/// Configuration for the realtime socket.
#[derive(Debug, Clone)]
pub struct RealtimeFeedConfig {
    /// Socket endpoint (`ws://` or `wss://`).
    pub url: String,
    /// Sent as the `apikey` header when present.
    pub api_key: Option<String>,
    /// Maximum wait for connect plus acknowledgement.
    pub handshake_timeout: Duration,
}

impl Default for RealtimeFeedConfig {
    fn default() -> Self {
        Self {
            url: "ws://localhost:54321/realtime/v1/websocket".to_string(),
            api_key: None,
            handshake_timeout: Duration::from_secs(10),
        }
    }
}

/// WebSocket change-feed adapter.
pub struct RealtimeFeed {
    config: RealtimeFeedConfig,
}

impl RealtimeFeed {
    pub const fn new(config: RealtimeFeedConfig) -> Self {
        Self { config }
    }

    /// Connect, subscribe and wait for the acknowledgement.
    async fn handshake(&self, filter: &FeedFilter) -> Result<FeedStream> {
        let mut request = self
            .config
            .url
            .as_str()
            .into_client_request()
            .context("Invalid realtime URL")?;
        if let Some(key) = &self.config.api_key {
            let value = HeaderValue::from_str(key).context("Invalid realtime API key")?;
            request.headers_mut().insert("apikey", value);
        }

        let (mut socket, _) = connect_async(request)
            .await
            .context("Realtime WebSocket connection failed")?;

        let frame = SubscribeFrame::for_filter(filter);
        let payload = serde_json::to_string(&frame).context("Failed to encode subscribe frame")?;
        socket
            .send(Message::Text(payload))
            .await
            .context("Failed to send subscribe frame")?;

        loop {
            let Some(message) = socket.next().await else {
                bail!("Realtime socket closed before acknowledgement");
            };
            match message.context("Realtime socket error during handshake")? {
                Message::Text(text) => match serde_json::from_str::<ServerFrame>(text.as_ref()) {
                    Ok(ServerFrame::Subscribed { topic }) => {
                        info!(topic = %topic, "Realtime subscription acknowledged");
                        break;
                    }
                    Ok(ServerFrame::Error { message }) => {
                        bail!("Realtime subscription rejected: {message}");
                    }
                    Ok(other) => debug!(frame = ?other, "Frame before acknowledgement ignored"),
                    Err(e) => debug!(error = %e, "Unparseable frame during handshake"),
                },
                Message::Close(_) => bail!("Realtime socket closed during handshake"),
                _ => {}
            }
        }

        let stream = socket.filter_map(|message| async move { decode_message(message) });
        Ok(stream.boxed())
    }
}

/// Map one socket message to a stream item. `None` skips the message.
fn decode_message(
    message: Result<Message, tokio_tungstenite::tungstenite::Error>,
) -> Option<Result<FeedEvent>> {
    match message {
        Ok(Message::Text(text)) => match serde_json::from_str::<ServerFrame>(text.as_ref()) {
            Ok(ServerFrame::Error { message }) => {
                Some(Err(anyhow::anyhow!("Realtime server error: {message}")))
            }
            Ok(frame) => frame.into_event().map(Ok),
            Err(e) => {
                debug!(error = %e, "Failed to parse realtime frame");
                None
            }
        },
        Ok(Message::Close(frame)) => Some(Err(anyhow::anyhow!("Realtime socket closed: {frame:?}"))),
        Ok(_) => None,
        Err(e) => Some(Err(anyhow::anyhow!("Realtime WS error: {e}"))),
    }
}

#[async_trait]
impl ChangeFeedTransport for RealtimeFeed {
    #[instrument(skip(self), fields(url = %self.config.url))]
    async fn open(&self, filter: &FeedFilter) -> Result<FeedStream> {
        tokio::time::timeout(self.config.handshake_timeout, self.handshake(filter))
            .await
            .context("Realtime handshake timed out")?
    }
}
