//! Gateway integration tests: start a real gateway and drive it over HTTP
//! and the media WebSocket.
//!
//! Run with: `cargo test -p voxbridge-gateway --test integration`

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use voxbridge_agent::StreamingResponse;
use voxbridge_agent::scripted::ScriptedAgent;
use voxbridge_agent::wire::RecognitionResult;
use voxbridge_bridge::BridgeSettings;
use voxbridge_core::config::{Config, TelephonyConfig};
use voxbridge_core::types::{Intent, InteractionSummary, QueryResult};
use voxbridge_gateway::{CallControl, GatewayState, TwilioCallControl};

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

const START: &str = r#"{"event":"start","start":{"callSid":"CA1","streamSid":"MZ1"}}"#;
const END_MARK: &str = r#"{"event":"mark","mark":{"name":"endOfInteraction"}}"#;

/// Find an available port.
fn find_free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

/// Call control double that records every completed call.
struct RecordingControl {
    tx: mpsc::UnboundedSender<(String, InteractionSummary)>,
}

#[async_trait]
impl CallControl for RecordingControl {
    async fn complete(&self, call_sid: &str, summary: &InteractionSummary) -> anyhow::Result<()> {
        let _ = self.tx.send((call_sid.to_string(), summary.clone()));
        Ok(())
    }
}

struct TestGateway {
    port: u16,
    agent: Arc<ScriptedAgent>,
    completed: mpsc::UnboundedReceiver<(String, InteractionSummary)>,
}

/// Start a gateway backed by the scripted agent and wait until it answers.
async fn start_test_gateway() -> TestGateway {
    let port = find_free_port();
    let agent = Arc::new(ScriptedAgent::new());
    let (tx, completed) = mpsc::unbounded_channel();

    let settings = BridgeSettings {
        shutdown_grace: Duration::from_millis(500),
        ..BridgeSettings::new("proj", "Welcome")
    };
    let state = Arc::new(GatewayState::new(
        Arc::new(Config::default()),
        settings,
        agent.clone(),
        Arc::new(RecordingControl { tx }),
    ));

    tokio::spawn(async move {
        let _ = voxbridge_gateway::start_gateway(state, port).await;
    });

    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        if reqwest::get(format!("http://127.0.0.1:{port}/health"))
            .await
            .is_ok()
        {
            break;
        }
    }

    TestGateway {
        port,
        agent,
        completed,
    }
}

async fn health(port: u16) -> Value {
    reqwest::get(format!("http://127.0.0.1:{port}/health"))
        .await
        .expect("Health request failed")
        .json()
        .await
        .unwrap()
}

async fn next_json(ws: &mut WsStream) -> Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for a carrier frame")
            .expect("socket closed")
            .unwrap();
        if let Message::Text(text) = msg {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

fn goodbye() -> StreamingResponse {
    let mut parameters = serde_json::Map::new();
    parameters.insert("account".into(), json!("12345"));
    StreamingResponse {
        query_result: Some(QueryResult {
            query_text: "that's all".into(),
            intent: Some(Intent {
                name: "projects/proj/agent/intents/bye".into(),
                display_name: "Goodbye".into(),
                end_interaction: true,
            }),
            parameters,
            fulfillment_text: "Bye".into(),
        }),
        // 20 ms of headerless 16 kHz silence.
        output_audio: vec![0u8; 640],
        ..StreamingResponse::default()
    }
}

#[tokio::test]
async fn test_health_endpoint() {
    let gw = start_test_gateway().await;

    let body = health(gw.port).await;
    assert_eq!(body["status"], "ok");
    assert!(body["version"].is_string());
    assert_eq!(body["calls"], 0);
}

#[tokio::test]
async fn test_twiml_over_http() {
    let gw = start_test_gateway().await;

    let resp = reqwest::Client::new()
        .post(format!("http://127.0.0.1:{}/twiml", gw.port))
        .header("x-original-host", "abc.ngrok.io")
        .send()
        .await
        .unwrap();

    assert!(resp.status().is_success());
    assert_eq!(resp.headers()["content-type"], "application/xml");
    let body = resp.text().await.unwrap();
    assert!(body.contains(r#"<Stream url="wss://abc.ngrok.io/media"/>"#));
}

#[tokio::test]
async fn test_full_call_over_media_socket() {
    let mut gw = start_test_gateway().await;

    let url = format!("ws://127.0.0.1:{}/media", gw.port);
    let (mut ws, _) = connect_async(&url).await.expect("WS connect failed");

    ws.send(Message::text(START)).await.unwrap();
    let mut stream = gw.agent.next_stream().await;
    let setup = stream.next_request().await.unwrap();
    assert_eq!(setup.query_input.unwrap().event.unwrap().name, "Welcome");

    let media = json!({"event": "media", "media": {"payload": "AQID"}}).to_string();
    ws.send(Message::text(media)).await.unwrap();
    assert_eq!(stream.next_request().await.unwrap().input_audio, vec![1, 2, 3]);
    assert_eq!(health(gw.port).await["calls"], 1);

    // Caller talks over the agent: the carrier is told to drop queued audio.
    stream
        .respond(StreamingResponse {
            recognition_result: Some(RecognitionResult {
                transcript: "wait".into(),
                is_final: false,
            }),
            ..StreamingResponse::default()
        })
        .await;
    let clear = next_json(&mut ws).await;
    assert_eq!(clear, json!({"event": "clear", "streamSid": "MZ1"}));

    // Final result: last audio, then the terminal mark.
    stream.respond(goodbye()).await;
    let audio = next_json(&mut ws).await;
    assert_eq!(audio["event"], "media");
    assert_eq!(audio["streamSid"], "MZ1");
    assert!(!audio["media"]["payload"].as_str().unwrap().is_empty());

    let mark = next_json(&mut ws).await;
    assert_eq!(
        mark,
        json!({"event": "mark", "streamSid": "MZ1", "mark": {"name": "endOfInteraction"}})
    );

    // Playback reached the mark: the call is handed to call control.
    ws.send(Message::text(END_MARK)).await.unwrap();
    let (call_sid, summary) = tokio::time::timeout(Duration::from_secs(5), gw.completed.recv())
        .await
        .expect("call control was not invoked")
        .unwrap();
    assert_eq!(call_sid, "CA1");
    assert_eq!(summary.intent.display_name, "Goodbye");
    assert_eq!(summary.parameters["account"], "12345");

    ws.close(None).await.unwrap();
    for _ in 0..50 {
        if health(gw.port).await["calls"] == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(health(gw.port).await["calls"], 0);
    assert!(gw.completed.try_recv().is_err());
}

#[tokio::test]
async fn test_socket_close_tears_down_agent_stream() {
    let gw = start_test_gateway().await;

    let url = format!("ws://127.0.0.1:{}/media", gw.port);
    let (mut ws, _) = connect_async(&url).await.expect("WS connect failed");
    ws.send(Message::text(START)).await.unwrap();
    let stream = gw.agent.next_stream().await;

    drop(ws);
    stream.closed().await;
    assert_eq!(gw.agent.active_streams(), 0);
}

/// Stand-in for the carrier's REST API, recording call updates.
async fn start_fake_carrier_api() -> (String, mpsc::UnboundedReceiver<(String, String, HashMap<String, String>)>) {
    use axum::extract::{Form, Path, State};
    use axum::http::HeaderMap;
    use axum::routing::post;

    type Recorded = mpsc::UnboundedSender<(String, String, HashMap<String, String>)>;

    async fn update_call(
        State(tx): State<Recorded>,
        Path((_account, call)): Path<(String, String)>,
        headers: HeaderMap,
        Form(form): Form<HashMap<String, String>>,
    ) -> &'static str {
        let auth = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let _ = tx.send((call, auth, form));
        "{}"
    }

    let (tx, rx) = mpsc::unbounded_channel();
    let app = axum::Router::new()
        .route("/2010-04-01/Accounts/{account}/Calls/{call}", post(update_call))
        .with_state(tx);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (format!("http://{addr}"), rx)
}

#[tokio::test]
async fn test_twilio_call_control_posts_redirect() {
    let (base, mut updates) = start_fake_carrier_api().await;
    let control = TwilioCallControl::from_config(&TelephonyConfig {
        account_sid: Some("AC123".into()),
        auth_token: Some("secret".into()),
        api_base_url: base,
        end_of_interaction_url: Some("https://example.com/after".into()),
        end_of_interaction_url_env: None,
        ..TelephonyConfig::default()
    });

    control
        .complete("CA9", &InteractionSummary::default())
        .await
        .unwrap();

    let (call, auth, form) = updates.recv().await.unwrap();
    assert_eq!(call, "CA9.json");
    assert!(auth.starts_with("Basic "));
    assert!(form["Twiml"].contains("<Redirect>https://example.com/after?dialogflowJSON="));
}
