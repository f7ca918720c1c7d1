//! Gateway shared state.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use voxbridge_agent::{AgentConnector, WsAgentConnector};
use voxbridge_bridge::BridgeSettings;
use voxbridge_core::config::Config;

use crate::call_control::{CallControl, TwilioCallControl};

/// Shared gateway state accessible from all handlers and media sockets.
pub struct GatewayState {
    pub config: Arc<Config>,
    pub settings: BridgeSettings,
    pub connector: Arc<dyn AgentConnector>,
    pub call_control: Arc<dyn CallControl>,
    /// Live media sockets keyed by session id.
    pub calls: RwLock<HashMap<String, CallState>>,
    #[cfg(feature = "metrics")]
    pub metrics: Option<metrics_exporter_prometheus::PrometheusHandle>,
}

/// Per-socket call state.
#[derive(Debug, Clone, Default)]
pub struct CallState {
    pub call_sid: Option<String>,
    pub stream_sid: Option<String>,
}

impl GatewayState {
    pub fn new(
        config: Arc<Config>,
        settings: BridgeSettings,
        connector: Arc<dyn AgentConnector>,
        call_control: Arc<dyn CallControl>,
    ) -> Self {
        Self {
            config,
            settings,
            connector,
            call_control,
            calls: RwLock::new(HashMap::new()),
            #[cfg(feature = "metrics")]
            metrics: None,
        }
    }

    /// Build the production collaborators from config: the WebSocket agent
    /// connector and Twilio call control.
    pub fn from_config(config: Config) -> anyhow::Result<Self> {
        let settings = BridgeSettings::from_config(&config)?;
        let connector = WsAgentConnector::from_config(&config.agent())?;
        let call_control = TwilioCallControl::from_config(&config.telephony());
        Ok(Self::new(
            Arc::new(config),
            settings,
            Arc::new(connector),
            Arc::new(call_control),
        ))
    }

    #[cfg(feature = "metrics")]
    pub fn with_metrics(mut self, handle: metrics_exporter_prometheus::PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    pub async fn register_call(&self, session_id: &str) {
        self.calls
            .write()
            .await
            .insert(session_id.to_string(), CallState::default());
    }

    pub async fn set_call(&self, session_id: &str, call_sid: &str, stream_sid: &str) {
        if let Some(call) = self.calls.write().await.get_mut(session_id) {
            call.call_sid = Some(call_sid.to_string());
            call.stream_sid = Some(stream_sid.to_string());
        }
    }

    pub async fn remove_call(&self, session_id: &str) {
        self.calls.write().await.remove(session_id);
    }

    pub async fn call_count(&self) -> usize {
        self.calls.read().await.len()
    }
}
