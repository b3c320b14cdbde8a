//! Socket transport behind the connection state machine.
//!
//! [`Connector`] is the seam between the reconnect loop and the network: the
//! production [`WsConnector`] speaks WebSocket via `tokio-tungstenite`, tests
//! plug in channel-backed fakes.

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;

use crate::errors::RealtimeError;

/// Frame delivered by the server side of a transport.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    Text(String),
    /// Server-initiated close.
    Close,
}

pub type FrameSink = Pin<Box<dyn Sink<String, Error = RealtimeError> + Send>>;
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<InboundFrame, RealtimeError>> + Send>>;

/// One established duplex link.
pub struct Transport {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

/// Opens authenticated transports.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, token: &str) -> Result<Transport, RealtimeError>;
}

/// WebSocket connector. The token goes out as `Authorization: Bearer` on the
/// upgrade request.
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
    timeout: Duration,
}

impl WsConnector {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            timeout,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, token: &str) -> Result<Transport, RealtimeError> {
        let mut request = self.url.as_str().into_client_request()?;
        let auth = HeaderValue::from_str(&format!("Bearer {}", token))
            .map_err(|_| RealtimeError::InvalidToken)?;
        request.headers_mut().insert(AUTHORIZATION, auth);

        let (ws, _response) =
            tokio::time::timeout(self.timeout, tokio_tungstenite::connect_async(request))
                .await
                .map_err(|_| RealtimeError::Timeout(self.timeout))?
                .map_err(|e| RealtimeError::Connect {
                    url: self.url.clone(),
                    message: e.to_string(),
                })?;

        let (write, read) = ws.split();
        let sink = write
            .with(|text: String| async move {
                Ok::<_, tokio_tungstenite::tungstenite::Error>(Message::Text(text.into()))
            })
            .sink_map_err(RealtimeError::from);
        let stream = read.filter_map(|msg| async move {
            match msg {
                Ok(Message::Text(text)) => Some(Ok(InboundFrame::Text(text.as_str().to_owned()))),
                Ok(Message::Close(_)) => Some(Ok(InboundFrame::Close)),
                // Pings are answered by tungstenite; binary frames are not part of the protocol.
                Ok(_) => None,
                Err(e) => Some(Err(RealtimeError::from(e))),
            }
        });

        Ok(Transport {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        })
    }
}
