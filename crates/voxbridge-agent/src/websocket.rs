//! WebSocket transport for agent streams.
//!
//! Each [`StreamingRequest`] is sent as one JSON text message. Half-closing
//! the sink sends a `{"halfClose":true}` marker; the agent keeps streaming
//! responses until it finishes the turn. Closing the sink sends a close
//! frame and ends the response stream.

use anyhow::Context;
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use voxbridge_core::config::AgentConfig;

use crate::sink::request_channel;
use crate::wire::{StreamingRequest, StreamingResponse};
use crate::{AgentConnector, AgentStream};

/// Marker message that ends the send side on the wire.
pub const HALF_CLOSE_MESSAGE: &str = r#"{"halfClose":true}"#;

#[derive(Debug, Clone)]
pub struct WsAgentConnector {
    endpoint: String,
    api_key: Option<String>,
}

impl WsAgentConnector {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key,
        }
    }

    pub fn from_config(config: &AgentConfig) -> anyhow::Result<Self> {
        let endpoint = config
            .endpoint
            .clone()
            .filter(|e| !e.is_empty())
            .context("No agent endpoint configured")?;
        Ok(Self::new(endpoint, config.resolve_api_key()))
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl AgentConnector for WsAgentConnector {
    fn id(&self) -> &str {
        "websocket"
    }

    async fn open(&self, setup: StreamingRequest, buffer: usize) -> anyhow::Result<AgentStream> {
        let mut request = self
            .endpoint
            .as_str()
            .into_client_request()
            .with_context(|| format!("invalid agent endpoint {}", self.endpoint))?;
        if let Some(key) = &self.api_key {
            let value = HeaderValue::from_str(&format!("Bearer {key}"))
                .context("agent API key is not a valid header value")?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        let (ws, _resp) = connect_async(request)
            .await
            .with_context(|| format!("connecting to agent at {}", self.endpoint))?;
        debug!(endpoint = %self.endpoint, session = %setup.session, "Agent stream connected");

        let (mut write, read) = ws.split();
        let (sink, mut requests) = request_channel(setup, buffer);

        let cancel = sink.cancellation();
        // Cancelled once the response stream is dropped.
        let reader_gone = CancellationToken::new();
        let reader_guard = reader_gone.clone().drop_guard();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = reader_gone.cancelled() => break,
                    next = requests.recv() => match next {
                        Some(req) => {
                            let text = match serde_json::to_string(&req) {
                                Ok(text) => text,
                                Err(e) => {
                                    warn!(error = %e, "Failed to serialize agent request");
                                    continue;
                                }
                            };
                            if write.send(Message::text(text)).await.is_err() {
                                debug!("Agent socket closed while sending");
                                return;
                            }
                        }
                        None => {
                            if write.send(Message::text(HALF_CLOSE_MESSAGE)).await.is_err() {
                                return;
                            }
                            tokio::select! {
                                _ = cancel.cancelled() => {}
                                _ = reader_gone.cancelled() => {}
                            }
                            break;
                        }
                    },
                }
            }
            let _ = write.send(Message::Close(None)).await;
        });

        let responses = read
            .filter_map(|msg| async move {
                match msg {
                    Ok(Message::Text(text)) => {
                        match serde_json::from_str::<StreamingResponse>(text.as_str()) {
                            Ok(resp) => Some(Ok(resp)),
                            Err(e) => {
                                warn!(error = %e, "Dropping malformed agent response");
                                None
                            }
                        }
                    }
                    Ok(_) => None,
                    Err(e) => Some(Err(anyhow::Error::new(e).context("agent stream transport error"))),
                }
            })
            .take_until(sink.cancellation().cancelled_owned())
            .map(move |item| {
                let _held = &reader_guard;
                item
            });

        Ok(AgentStream {
            sink,
            responses: Box::pin(responses),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    /// Agent double: records requests until the half-close marker, then
    /// replies with one interim and one final response and closes.
    async fn spawn_agent() -> (String, tokio::task::JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            let mut seen = Vec::new();
            while let Some(Ok(msg)) = ws.next().await {
                if let Message::Text(text) = msg {
                    let text = text.as_str().to_string();
                    let done = text == HALF_CLOSE_MESSAGE;
                    seen.push(text);
                    if done {
                        break;
                    }
                }
            }
            ws.send(Message::text("not json")).await.unwrap();
            ws.send(Message::text(r#"{"recognitionResult":{"transcript":"hi"}}"#))
                .await
                .unwrap();
            ws.send(Message::text(
                r#"{"queryResult":{"fulfillmentText":"Bye","intent":{"name":"i","displayName":"End","endInteraction":true}},"outputAudio":"AAA="}"#,
            ))
            .await
            .unwrap();
            ws.close(None).await.unwrap();
            seen
        });
        (format!("ws://{addr}/stream"), handle)
    }

    #[tokio::test]
    async fn test_round_trip_against_local_agent() {
        let (url, agent) = spawn_agent().await;
        let connector = WsAgentConnector::new(url, Some("secret".into()));

        let setup = StreamingRequest::first_turn("projects/p/agent/sessions/s", "Welcome", "en-US", 16000);
        let mut stream = connector.open(setup, 8).await.unwrap();
        stream.sink.send_audio(&[0xff, 0xfe]).await.unwrap();
        assert!(stream.sink.half_close());

        let first = stream.responses.next().await.unwrap().unwrap();
        assert_eq!(first.interim_transcript(), Some("hi"));
        let second = stream.responses.next().await.unwrap().unwrap();
        assert!(second.ending_result().is_some());
        assert_eq!(second.output_audio, vec![0, 0]);
        assert!(stream.responses.next().await.is_none());
        stream.sink.close();

        let seen = agent.await.unwrap();
        assert_eq!(seen.len(), 3);
        let setup: serde_json::Value = serde_json::from_str(&seen[0]).unwrap();
        assert_eq!(setup["queryInput"]["event"]["name"], "Welcome");
        let audio: serde_json::Value = serde_json::from_str(&seen[1]).unwrap();
        assert_eq!(audio["inputAudio"], "//4=");
        assert_eq!(seen[2], HALF_CLOSE_MESSAGE);
    }

    #[tokio::test]
    async fn test_close_ends_response_stream() {
        let (url, _agent) = spawn_agent().await;
        let connector = WsAgentConnector::new(url, None);
        let mut stream = connector
            .open(StreamingRequest::continuation("s", "en-US", 16000), 8)
            .await
            .unwrap();
        stream.sink.close();
        assert!(stream.responses.next().await.is_none());
    }

    #[tokio::test]
    async fn test_dropped_stream_closes_socket_after_half_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let agent = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            while let Some(Ok(msg)) = ws.next().await {
                if matches!(msg, Message::Text(ref t) if t.as_str() == HALF_CLOSE_MESSAGE) {
                    break;
                }
            }
            // Keep the turn open; the client has to be the one to leave.
            loop {
                match ws.next().await {
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return true,
                    Some(Ok(_)) => {}
                }
            }
        });

        let connector = WsAgentConnector::new(format!("ws://{addr}/"), None);
        let stream = connector
            .open(StreamingRequest::continuation("s", "en-US", 16000), 4)
            .await
            .unwrap();
        assert!(stream.sink.half_close());
        drop(stream);

        let closed = tokio::time::timeout(std::time::Duration::from_secs(5), agent)
            .await
            .expect("socket left open after the stream was dropped")
            .unwrap();
        assert!(closed);
    }

    #[tokio::test]
    async fn test_connect_failure_is_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let connector = WsAgentConnector::new(format!("ws://{addr}/"), None);
        assert!(
            connector
                .open(StreamingRequest::default(), 1)
                .await
                .is_err()
        );
    }

    #[test]
    fn test_from_config_requires_endpoint() {
        assert!(WsAgentConnector::from_config(&AgentConfig::default()).is_err());
        let config = AgentConfig {
            endpoint: Some("ws://agent.local/stream".into()),
            ..AgentConfig::default()
        };
        let connector = WsAgentConnector::from_config(&config).unwrap();
        assert_eq!(connector.endpoint(), "ws://agent.local/stream");
    }
}
