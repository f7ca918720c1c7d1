//! Call control: what happens to the phone call once the agent is done.

use anyhow::{Context, bail};
use async_trait::async_trait;
use tracing::info;

use voxbridge_core::config::TelephonyConfig;
use voxbridge_core::types::InteractionSummary;

use crate::twiml;

/// Out-of-band control of a live call.
#[async_trait]
pub trait CallControl: Send + Sync {
    /// Hand the call off after the interaction ended, either by
    /// redirecting it or by hanging up.
    async fn complete(&self, call_sid: &str, summary: &InteractionSummary) -> anyhow::Result<()>;
}

/// Updates calls through the Twilio REST API.
pub struct TwilioCallControl {
    client: reqwest::Client,
    api_base_url: String,
    account_sid: Option<String>,
    auth_token: Option<String>,
    redirect_url: Option<String>,
    redirect_param: String,
}

impl TwilioCallControl {
    pub fn from_config(config: &TelephonyConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base_url: config.api_base_url.trim_end_matches('/').to_string(),
            account_sid: config.resolve_account_sid(),
            auth_token: config.resolve_auth_token(),
            redirect_url: config.resolve_end_of_interaction_url(),
            redirect_param: config.redirect_param.clone(),
        }
    }

    /// TwiML for the call update: a redirect when a URL is configured,
    /// otherwise a hangup.
    pub fn twiml_for(&self, summary: &InteractionSummary) -> anyhow::Result<String> {
        match &self.redirect_url {
            Some(url) => twiml::redirect_document(url, &self.redirect_param, summary),
            None => twiml::hangup_document(),
        }
    }
}

#[async_trait]
impl CallControl for TwilioCallControl {
    async fn complete(&self, call_sid: &str, summary: &InteractionSummary) -> anyhow::Result<()> {
        let (Some(sid), Some(token)) = (&self.account_sid, &self.auth_token) else {
            bail!("Telephony credentials not configured");
        };

        let body = self.twiml_for(summary)?;
        let url = format!(
            "{}/2010-04-01/Accounts/{sid}/Calls/{call_sid}.json",
            self.api_base_url
        );

        let resp = self
            .client
            .post(&url)
            .basic_auth(sid, Some(token))
            .form(&[("Twiml", body.as_str())])
            .send()
            .await
            .with_context(|| format!("Call update request failed for {call_sid}"))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            bail!("Twilio API error ({status}): {body}");
        }

        info!(
            call_sid,
            redirect = self.redirect_url.is_some(),
            "Call handed off"
        );
        Ok(())
    }
}
