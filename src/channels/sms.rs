//! SMS transport over the Termii or Twilio HTTP APIs.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::{info, warn};

use crate::channels::MessageSink;
use crate::error::SendError;

const TERMII_BASE_URL: &str = "https://api.ng.termii.com";
const TWILIO_BASE_URL: &str = "https://api.twilio.com";

/// Credentials for the selected SMS provider.
#[derive(Debug)]
pub enum SmsProvider {
    Termii {
        api_key: SecretString,
        sender_id: String,
    },
    Twilio {
        account_sid: String,
        auth_token: SecretString,
        from_number: String,
    },
}

impl SmsProvider {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Termii { .. } => "termii",
            Self::Twilio { .. } => "twilio",
        }
    }

    fn has_credentials(&self) -> bool {
        match self {
            Self::Termii { api_key, .. } => !api_key.expose_secret().is_empty(),
            Self::Twilio {
                account_sid,
                auth_token,
                from_number,
            } => {
                !account_sid.is_empty()
                    && !auth_token.expose_secret().is_empty()
                    && !from_number.is_empty()
            }
        }
    }

    fn default_base_url(&self) -> &'static str {
        match self {
            Self::Termii { .. } => TERMII_BASE_URL,
            Self::Twilio { .. } => TWILIO_BASE_URL,
        }
    }
}

/// SMS transport configuration.
#[derive(Debug)]
pub struct SmsConfig {
    pub provider: SmsProvider,
    /// API root; overridable for staging or local stubs.
    pub base_url: String,
}

impl SmsConfig {
    pub fn new(provider: SmsProvider) -> Self {
        let base_url = provider.default_base_url().to_string();
        Self { provider, base_url }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Build from environment variables. Returns `None` if the selected
    /// provider has no credentials configured.
    pub fn from_env() -> Option<Self> {
        let provider = std::env::var("SMS_PROVIDER").unwrap_or_else(|_| "termii".to_string());

        let provider = match provider.trim().to_lowercase().as_str() {
            "termii" => {
                let api_key = std::env::var("TERMII_API_KEY").ok()?;
                let sender_id =
                    std::env::var("TERMII_SENDER_ID").unwrap_or_else(|_| "Ministry".to_string());
                SmsProvider::Termii {
                    api_key: SecretString::from(api_key),
                    sender_id,
                }
            }
            "twilio" => SmsProvider::Twilio {
                account_sid: std::env::var("TWILIO_ACCOUNT_SID").ok()?,
                auth_token: SecretString::from(std::env::var("TWILIO_AUTH_TOKEN").ok()?),
                from_number: std::env::var("TWILIO_PHONE_NUMBER").ok()?,
            },
            other => {
                warn!(provider = other, "Unknown SMS_PROVIDER, SMS transport disabled");
                return None;
            }
        };

        let config = Self::new(provider);
        Some(match std::env::var("SMS_BASE_URL") {
            Ok(url) => config.with_base_url(url),
            Err(_) => config,
        })
    }
}

#[derive(Debug, Deserialize)]
struct TermiiResponse {
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TwilioResponse {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// HTTP SMS transport.
pub struct SmsSink {
    config: SmsConfig,
    client: reqwest::Client,
}

impl SmsSink {
    pub fn new(config: SmsConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    fn transport_error(&self, reason: impl Into<String>) -> SendError {
        SendError::Transport {
            channel: format!("sms:{}", self.config.provider.name()),
            reason: reason.into(),
        }
    }

    async fn send_via_termii(
        &self,
        api_key: &SecretString,
        sender_id: &str,
        phone: &str,
        text: &str,
    ) -> Result<(), SendError> {
        let body = serde_json::json!({
            "to": international(phone),
            "from": sender_id,
            "sms": text,
            "type": "plain",
            "channel": "generic",
            "api_key": api_key.expose_secret(),
        });

        let resp = self
            .client
            .post(format!("{}/api/sms/send", self.config.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| self.transport_error(e.to_string()))?;

        let status = resp.status();
        let parsed: TermiiResponse = resp
            .json()
            .await
            .map_err(|e| self.transport_error(format!("HTTP {status}: {e}")))?;

        match parsed.message.as_deref() {
            Some("Successfully Sent") => Ok(()),
            Some(other) => Err(self.transport_error(other.to_string())),
            None => Err(self.transport_error(format!("HTTP {status}: Failed to send SMS"))),
        }
    }

    async fn send_via_twilio(
        &self,
        account_sid: &str,
        auth_token: &SecretString,
        from_number: &str,
        phone: &str,
        text: &str,
    ) -> Result<(), SendError> {
        let to = international(phone);
        let form = [("To", to.as_str()), ("From", from_number), ("Body", text)];

        let resp = self
            .client
            .post(format!(
                "{}/2010-04-01/Accounts/{account_sid}/Messages.json",
                self.config.base_url
            ))
            .basic_auth(account_sid, Some(auth_token.expose_secret()))
            .form(&form)
            .send()
            .await
            .map_err(|e| self.transport_error(e.to_string()))?;

        let status = resp.status();
        let parsed: TwilioResponse = resp
            .json()
            .await
            .map_err(|e| self.transport_error(format!("HTTP {status}: {e}")))?;

        match parsed.status.as_deref() {
            Some("queued") | Some("sent") => Ok(()),
            _ => Err(self.transport_error(
                parsed
                    .message
                    .unwrap_or_else(|| format!("HTTP {status}: Failed to send SMS via Twilio")),
            )),
        }
    }
}

#[async_trait]
impl MessageSink for SmsSink {
    fn name(&self) -> &str {
        self.config.provider.name()
    }

    async fn send(&self, phone: &str, text: &str) -> Result<(), SendError> {
        if !self.config.provider.has_credentials() {
            return Err(SendError::NotReady {
                channel: format!("sms:{}", self.name()),
                reason: "provider credentials are not configured".to_string(),
            });
        }

        let result = match &self.config.provider {
            SmsProvider::Termii { api_key, sender_id } => {
                self.send_via_termii(api_key, sender_id, phone, text).await
            }
            SmsProvider::Twilio {
                account_sid,
                auth_token,
                from_number,
            } => {
                self.send_via_twilio(account_sid, auth_token, from_number, phone, text)
                    .await
            }
        };

        match &result {
            Ok(()) => info!(phone = %phone, provider = self.name(), "SMS sent"),
            Err(e) => warn!(phone = %phone, provider = self.name(), error = %e, "SMS failed"),
        }
        result
    }
}

/// `+` followed by the digits of `phone`.
fn international(phone: &str) -> String {
    let digits: String = phone.chars().filter(|c| c.is_ascii_digit()).collect();
    format!("+{digits}")
}
