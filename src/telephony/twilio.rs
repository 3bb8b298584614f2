//! Twilio REST implementation of [`TelephonyProvider`]

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info};

use super::{PlaceCallRequest, TelephonyProvider};
use crate::http::HttpClient;
use crate::models::CallId;

pub const TWILIO_API_URL: &str = "https://api.twilio.com";

/// Account credentials and the tester's phone number
#[derive(Clone, Debug, Default)]
pub struct TwilioCredentials {
    pub account_sid: String,
    pub auth_token: String,
    /// Tester's number in E.164 form, used as caller id
    pub phone_number: String,
    /// Incoming-number resource id of `phone_number`
    pub phone_number_sid: Option<String>,
}

pub struct TwilioProvider {
    client: HttpClient,
    credentials: TwilioCredentials,
}

#[derive(Debug, Deserialize)]
struct CallResource {
    sid: String,
    #[serde(default)]
    status: Option<String>,
}

impl TwilioProvider {
    pub fn new(credentials: TwilioCredentials) -> Result<Self> {
        Self::with_api_url(credentials, TWILIO_API_URL)
    }

    pub fn with_api_url(credentials: TwilioCredentials, api_url: &str) -> Result<Self> {
        let client = HttpClient::new()?
            .base_url(api_url)
            .default_header("Accept", "application/json")?
            .basic_auth(&credentials.account_sid, &credentials.auth_token);
        Ok(Self {
            client,
            credentials,
        })
    }

    fn account_path(&self, resource: &str) -> String {
        format!(
            "/2010-04-01/Accounts/{}/{}",
            self.credentials.account_sid, resource
        )
    }
}

fn field(key: &str, value: impl Into<String>) -> (String, String) {
    (key.to_string(), value.into())
}

/// Fields asking for the finished recording to be posted to `callback_url`
fn recording_callback_fields(callback_url: &str) -> Vec<(String, String)> {
    vec![
        field("RecordingStatusCallback", callback_url),
        field("RecordingStatusCallbackMethod", "POST"),
        field("RecordingStatusCallbackEvent", "completed"),
    ]
}

#[async_trait]
impl TelephonyProvider for TwilioProvider {
    async fn place_call(&self, request: &PlaceCallRequest) -> Result<CallId> {
        info!(
            "Calling {} from {} (time limit {}s)",
            request.to, self.credentials.phone_number, request.time_limit_secs
        );

        let mut fields = vec![
            field("To", &request.to),
            field("From", &self.credentials.phone_number),
            field("Url", &request.voice_url),
            field("Method", "POST"),
            field("StatusCallback", &request.status_callback_url),
            field("StatusCallbackMethod", "POST"),
            field("TimeLimit", request.time_limit_secs.to_string()),
        ];
        if let Some(callback_url) = &request.recording_callback_url {
            fields.push(field("Record", "true"));
            fields.extend(recording_callback_fields(callback_url));
        }

        let resp = self
            .client
            .post_form(&self.account_path("Calls.json"), fields)
            .await?
            .error_for_status()
            .context("Twilio rejected the call request")?;
        let call: CallResource = resp.json()?;

        debug!("Twilio call {} created with status {:?}", call.sid, call.status);
        Ok(CallId::new(call.sid))
    }

    async fn configure_number(&self, voice_url: &str, status_callback_url: &str) -> Result<()> {
        let number_sid = self
            .credentials
            .phone_number_sid
            .as_deref()
            .context("Twilio phone number SID is not configured")?;

        info!("Pointing {} at {}", self.credentials.phone_number, voice_url);
        self.client
            .post_form(
                &self.account_path(&format!("IncomingPhoneNumbers/{number_sid}.json")),
                vec![
                    field("VoiceUrl", voice_url),
                    field("VoiceMethod", "POST"),
                    field("StatusCallback", status_callback_url),
                    field("StatusCallbackMethod", "POST"),
                ],
            )
            .await?
            .error_for_status()
            .context("Twilio rejected the number update")?;
        Ok(())
    }

    async fn start_recording(&self, call_id: &CallId, callback_url: &str) -> Result<()> {
        self.client
            .post_form(
                &self.account_path(&format!("Calls/{call_id}/Recordings.json")),
                recording_callback_fields(callback_url),
            )
            .await?
            .error_for_status()
            .with_context(|| format!("Twilio refused to record {call_id}"))?;
        debug!("Recording call {}", call_id);
        Ok(())
    }

    async fn hang_up(&self, call_id: &CallId) -> Result<()> {
        self.client
            .post_form(
                &self.account_path(&format!("Calls/{call_id}.json")),
                vec![field("Status", "completed")],
            )
            .await?
            .error_for_status()
            .with_context(|| format!("Twilio rejected hang-up of {call_id}"))?;
        debug!("Hung up call {}", call_id);
        Ok(())
    }
}
