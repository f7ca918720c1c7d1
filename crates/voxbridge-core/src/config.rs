//! Configuration loading and validation.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Top-level VoxBridge configuration.
///
/// Every section is optional; absent sections fall back to their defaults
/// and to the conventional environment variables of a Twilio + Dialogflow
/// deployment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway: Option<GatewayConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent: Option<AgentConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub telephony: Option<TelephonyConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub bridge: Option<BridgeConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind: Option<String>,

    /// Host placed in the call-setup document. When unset the request's
    /// `x-original-host` or `Host` header is used.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_host: Option<String>,
}

fn default_port() -> u16 {
    3000
}

/// Conversational agent service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// WebSocket URL of the agent streaming endpoint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,

    #[serde(default = "default_project_id_env")]
    pub project_id_env: Option<String>,

    /// Event that opens the conversation on the first turn.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub starting_event: Option<String>,

    #[serde(default = "default_starting_event_env")]
    pub starting_event_env: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub language_code: Option<String>,

    #[serde(default = "default_language_code_env")]
    pub language_code_env: Option<String>,

    /// Requested response audio rate, also assumed for headerless audio.
    #[serde(default = "default_output_sample_rate")]
    pub output_sample_rate: u32,
}

fn default_project_id_env() -> Option<String> {
    Some("DIALOGFLOW_PROJECT_ID".into())
}

fn default_starting_event_env() -> Option<String> {
    Some("DIALOGFLOW_STARTING_EVENT_NAME".into())
}

fn default_language_code_env() -> Option<String> {
    Some("GOOGLE_LANGUAGE_CODE".into())
}

fn default_output_sample_rate() -> u32 {
    16_000
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key: None,
            api_key_env: None,
            project_id: None,
            project_id_env: default_project_id_env(),
            starting_event: None,
            starting_event_env: default_starting_event_env(),
            language_code: None,
            language_code_env: default_language_code_env(),
            output_sample_rate: default_output_sample_rate(),
        }
    }
}

impl AgentConfig {
    pub fn resolve_api_key(&self) -> Option<String> {
        resolve_secret_field(&self.api_key, &self.api_key_env)
    }

    pub fn resolve_project_id(&self) -> Option<String> {
        resolve_secret_field(&self.project_id, &self.project_id_env)
    }

    pub fn resolve_starting_event(&self) -> Option<String> {
        resolve_secret_field(&self.starting_event, &self.starting_event_env)
    }

    /// Language code for both the trigger event and audio recognition.
    pub fn resolve_language_code(&self) -> String {
        resolve_secret_field(&self.language_code, &self.language_code_env)
            .unwrap_or_else(|| "en-US".into())
    }
}

/// Telephony carrier (Twilio) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelephonyConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_sid: Option<String>,

    #[serde(default = "default_account_sid_env")]
    pub account_sid_env: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,

    #[serde(default = "default_auth_token_env")]
    pub auth_token_env: Option<String>,

    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// Where the call is redirected once the agent ends the interaction.
    /// The call is hung up when no URL resolves.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_of_interaction_url: Option<String>,

    #[serde(default = "default_end_of_interaction_url_env")]
    pub end_of_interaction_url_env: Option<String>,

    /// Query parameter carrying the JSON query-result summary.
    #[serde(default = "default_redirect_param")]
    pub redirect_param: String,
}

fn default_account_sid_env() -> Option<String> {
    Some("TWILIO_ACCOUNT_SID".into())
}

fn default_auth_token_env() -> Option<String> {
    Some("TWILIO_AUTH_TOKEN".into())
}

fn default_api_base_url() -> String {
    "https://api.twilio.com".into()
}

fn default_end_of_interaction_url_env() -> Option<String> {
    Some("END_OF_INTERACTION_URL".into())
}

fn default_redirect_param() -> String {
    "dialogflowJSON".into()
}

impl Default for TelephonyConfig {
    fn default() -> Self {
        Self {
            account_sid: None,
            account_sid_env: default_account_sid_env(),
            auth_token: None,
            auth_token_env: default_auth_token_env(),
            api_base_url: default_api_base_url(),
            end_of_interaction_url: None,
            end_of_interaction_url_env: default_end_of_interaction_url_env(),
            redirect_param: default_redirect_param(),
        }
    }
}

impl TelephonyConfig {
    pub fn resolve_account_sid(&self) -> Option<String> {
        resolve_secret_field(&self.account_sid, &self.account_sid_env)
    }

    pub fn resolve_auth_token(&self) -> Option<String> {
        resolve_secret_field(&self.auth_token, &self.auth_token_env)
    }

    pub fn resolve_end_of_interaction_url(&self) -> Option<String> {
        resolve_secret_field(
            &self.end_of_interaction_url,
            &self.end_of_interaction_url_env,
        )
    }
}

/// Per-session channel sizing. Every queue is bounded so a slow consumer
/// throttles its producer instead of growing latency.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Inbound audio chunks buffered ahead of the agent send side.
    #[serde(default = "default_inbound_buffer")]
    pub inbound_buffer: usize,

    /// Requests buffered ahead of the agent transport.
    #[serde(default = "default_agent_buffer")]
    pub agent_buffer: usize,

    /// Bridge events buffered ahead of the telephony writer.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,

    /// How long `finish()` waits for a pipeline to wind down before aborting it.
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

fn default_inbound_buffer() -> usize {
    32
}

fn default_agent_buffer() -> usize {
    32
}

fn default_event_buffer() -> usize {
    64
}

fn default_shutdown_grace_ms() -> u64 {
    2_000
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            inbound_buffer: default_inbound_buffer(),
            agent_buffer: default_agent_buffer(),
            event_buffer: default_event_buffer(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log format: "plain" (default) or "json".
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Log level override (trace/debug/info/warn/error).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,

    /// Per-crate log level overrides (e.g. "voxbridge_bridge=debug").
    #[serde(default)]
    pub filters: Vec<String>,

    /// Output target: "stderr" (default) or "stdout".
    #[serde(default = "default_log_output")]
    pub output: String,
}

fn default_log_format() -> String {
    "plain".into()
}

fn default_log_output() -> String {
    "stderr".into()
}

/// Resolve a secret: check the direct value first, then the env-var reference.
pub fn resolve_secret_field(direct: &Option<String>, env_var: &Option<String>) -> Option<String> {
    if let Some(val) = direct {
        if !val.is_empty() {
            return Some(val.clone());
        }
    }
    if let Some(env) = env_var {
        if let Ok(val) = std::env::var(env) {
            if !val.is_empty() {
                return Some(val);
            }
        }
    }
    None
}

/// Substitute `${ENV_VAR}` patterns in a string with their environment variable values.
fn substitute_env_vars(input: &str) -> String {
    let re = regex::Regex::new(r"\$\{([^}]+)\}").expect("static regex");
    re.replace_all(input, |caps: &regex::Captures| {
        let var_name = &caps[1];
        std::env::var(var_name).unwrap_or_default()
    })
    .into_owned()
}

impl Config {
    /// Load config from a JSON5 file, substituting `${ENV_VAR}` references.
    pub fn load(path: &Path) -> crate::error::Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path).map_err(crate::error::VoxBridgeError::Io)?;

        let substituted = substitute_env_vars(&raw);

        let config: Config = json5::from_str(&substituted)
            .map_err(|e| crate::error::VoxBridgeError::Config(e.to_string()))?;

        Ok(config)
    }

    /// Resolve the default config file path.
    pub fn config_dir() -> PathBuf {
        data_dir().join("config.json")
    }

    /// Gateway port: configured value, then `PORT`, then 3000.
    pub fn gateway_port(&self) -> u16 {
        if let Some(gw) = &self.gateway {
            return gw.port;
        }
        std::env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or_else(default_port)
    }

    pub fn gateway_bind(&self) -> String {
        self.gateway
            .as_ref()
            .and_then(|g| g.bind.clone())
            .unwrap_or_else(|| "0.0.0.0".to_string())
    }

    pub fn agent(&self) -> AgentConfig {
        self.agent.clone().unwrap_or_default()
    }

    pub fn telephony(&self) -> TelephonyConfig {
        self.telephony.clone().unwrap_or_default()
    }

    pub fn bridge(&self) -> BridgeConfig {
        self.bridge.clone().unwrap_or_default()
    }

    /// Get a config value by dotted path (e.g. "gateway.port", "agent.endpoint").
    pub fn get_path(&self, path: &str) -> Option<serde_json::Value> {
        let json = serde_json::to_value(self).ok()?;
        let mut current = &json;
        for segment in path.split('.') {
            current = current.get(segment)?;
        }
        Some(current.clone())
    }

    /// Validate config, returning (warnings, errors).
    pub fn validate(&self) -> (Vec<String>, Vec<String>) {
        let mut warnings = Vec::new();
        let mut errors = Vec::new();

        let agent = self.agent();
        if agent.endpoint.as_deref().is_none_or(str::is_empty) {
            errors.push("Agent endpoint is not configured (agent.endpoint)".to_string());
        }
        if agent.resolve_project_id().is_none() {
            errors.push("Agent project id is not configured (agent.project_id)".to_string());
        }
        if agent.resolve_starting_event().is_none() {
            errors.push(
                "Starting event name is not configured (agent.starting_event)".to_string(),
            );
        }
        if agent.output_sample_rate == 0 {
            errors.push("agent.output_sample_rate cannot be 0".to_string());
        }

        let telephony = self.telephony();
        if telephony.resolve_account_sid().is_none() || telephony.resolve_auth_token().is_none() {
            warnings.push(
                "Telephony credentials missing; calls cannot be redirected or hung up".to_string(),
            );
        }
        match telephony.resolve_end_of_interaction_url() {
            None => warnings.push(
                "No end-of-interaction URL; calls will be hung up when the agent ends".to_string(),
            ),
            Some(url) if !url.starts_with("http") => errors.push(format!(
                "End-of-interaction URL must be http(s): {url}"
            )),
            Some(_) => {}
        }

        if let Some(gw) = &self.gateway {
            if gw.port == 0 {
                errors.push("Gateway port cannot be 0".to_string());
            }
        }

        let bridge = self.bridge();
        if bridge.inbound_buffer == 0 || bridge.agent_buffer == 0 || bridge.event_buffer == 0 {
            errors.push("Bridge buffer sizes must be greater than 0".to_string());
        }

        (warnings, errors)
    }
}

/// Base directory for VoxBridge data: `~/.voxbridge/`
pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".voxbridge")
}
