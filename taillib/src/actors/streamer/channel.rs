//! Transport for a job's live log subscription.

use crate::errors::Result;
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header, HeaderValue};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

/// Opens connections to a live log endpoint.
#[async_trait]
pub trait LogChannel: Send + Sync + 'static {
    async fn connect(&self, url: &str) -> Result<Box<dyn LogConnection>>;
}

#[async_trait]
pub trait LogConnection: Send {
    async fn send(&mut self, payload: &str) -> Result<()>;
    /// The next text frame, or `None` once the server closed the connection cleanly.
    async fn next_frame(&mut self) -> Result<Option<String>>;
}

/// Websocket connections that look like they come from a github.com tab.
pub struct WsChannel {
    user_agent: String,
}

impl WsChannel {
    pub fn new(user_agent: impl Into<String>) -> Self {
        Self {
            user_agent: user_agent.into(),
        }
    }
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value).map_err(|err| tungstenite::Error::HttpFormat(err.into()).into())
}

#[async_trait]
impl LogChannel for WsChannel {
    async fn connect(&self, url: &str) -> Result<Box<dyn LogConnection>> {
        let mut request = url.into_client_request()?;
        let headers = request.headers_mut();
        headers.insert(header::USER_AGENT, header_value(&self.user_agent)?);
        headers.insert(header::ORIGIN, HeaderValue::from_static("https://github.com"));
        headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        headers.insert("sec-fetch-dest", HeaderValue::from_static("empty"));
        headers.insert("sec-fetch-mode", HeaderValue::from_static("websocket"));
        headers.insert("sec-fetch-site", HeaderValue::from_static("same-site"));

        let (stream, _) = connect_async(request).await?;
        Ok(Box::new(WsConnection { stream }))
    }
}

struct WsConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl LogConnection for WsConnection {
    async fn send(&mut self, payload: &str) -> Result<()> {
        self.stream.send(Message::Text(payload.to_string())).await?;
        Ok(())
    }

    async fn next_frame(&mut self) -> Result<Option<String>> {
        while let Some(msg) = self.stream.next().await {
            match msg {
                Ok(Message::Text(text)) => return Ok(Some(text)),
                Ok(Message::Binary(bytes)) => {
                    return Ok(Some(String::from_utf8_lossy(&bytes).into_owned()))
                }
                Ok(Message::Close(_)) | Err(tungstenite::Error::ConnectionClosed) => return Ok(None),
                Err(err) => return Err(err.into()),
                // pings are answered by tungstenite itself
                Ok(_) => {}
            }
        }
        Ok(None)
    }
}
