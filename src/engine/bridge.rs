//! WebSocket bridge to an external conversational engine
//!
//! Each call opens one engine session. Provider audio is relayed to the
//! engine; engine audio, transcript fragments and control messages come
//! back over the same socket.

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use super::{ConversationEngine, Speaker, Transcript};
use crate::gateway::{MediaCall, MediaEvent, OutboundFrame};
use crate::models::CallId;
use crate::telephony::TelephonyProvider;

/// How long to keep reading engine output after the call's media ends
const DRAIN_AFTER_STOP: Duration = Duration::from_secs(5);

#[derive(Debug, Serialize)]
#[serde(tag = "type")]
enum EngineCommand<'a> {
    #[serde(rename = "session.start")]
    SessionStart {
        call_id: &'a str,
        stream_sid: &'a str,
        persona: &'a str,
        scenario: &'a str,
        parameters: &'a HashMap<String, String>,
    },
    #[serde(rename = "audio")]
    Audio {
        payload: &'a str,
        #[serde(skip_serializing_if = "Option::is_none")]
        timestamp_ms: Option<u64>,
    },
    #[serde(rename = "mark")]
    Mark { name: &'a str },
    #[serde(rename = "dtmf")]
    Dtmf { digit: &'a str },
    #[serde(rename = "session.stop")]
    SessionStop,
}

fn encode(command: &EngineCommand<'_>) -> Result<Message> {
    let text = serde_json::to_string(command).context("Failed to encode engine command")?;
    Ok(Message::Text(text))
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum EngineEvent {
    Audio { payload: String },
    Transcript { role: Speaker, content: String },
    Clear,
    Mark { name: String },
    Hangup,
    #[serde(other)]
    Unknown,
}

/// [`ConversationEngine`] backed by a remote engine service
pub struct WsBridgeEngine {
    url: String,
    connect_timeout: Duration,
    telephony: Option<Arc<dyn TelephonyProvider>>,
    transcripts: Mutex<HashMap<CallId, Transcript>>,
}

impl WsBridgeEngine {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connect_timeout: Duration::from_secs(10),
            telephony: None,
            transcripts: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Provider used to end the call when the engine asks to hang up
    pub fn with_hangup(mut self, telephony: Arc<dyn TelephonyProvider>) -> Self {
        self.telephony = Some(telephony);
        self
    }

    fn transcripts(&self) -> MutexGuard<'_, HashMap<CallId, Transcript>> {
        self.transcripts.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, call_id: &CallId, speaker: Speaker, content: &str) {
        self.transcripts()
            .entry(call_id.clone())
            .or_default()
            .push(speaker, content);
    }
}

#[async_trait]
impl ConversationEngine for WsBridgeEngine {
    async fn reset(&self) -> Result<()> {
        self.transcripts().clear();
        Ok(())
    }

    async fn run(
        &self,
        call: MediaCall,
        persona_prompt: &str,
        scenario_prompt: &str,
    ) -> Result<()> {
        let MediaCall {
            call_id,
            stream_sid,
            parameters,
            mut events,
            frames,
        } = call;

        let (socket, _) = tokio::time::timeout(self.connect_timeout, connect_async(self.url.as_str()))
            .await
            .context("Timed out connecting to conversational engine")?
            .with_context(|| format!("Failed to connect to conversational engine at {}", self.url))?;
        let (mut sink, mut stream) = socket.split();

        let start = encode(&EngineCommand::SessionStart {
            call_id: call_id.as_str(),
            stream_sid: &stream_sid,
            persona: persona_prompt,
            scenario: scenario_prompt,
            parameters: &parameters,
        })?;
        sink.send(start).await.context("Failed to start engine session")?;
        info!("Engine session started for call {}", call_id);

        let mut drain_deadline: Option<Instant> = None;

        loop {
            let drain = async move {
                match drain_deadline {
                    Some(deadline) => tokio::time::sleep_until(deadline).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                event = events.recv(), if drain_deadline.is_none() => {
                    let command = match &event {
                        Some(MediaEvent::Audio { payload, timestamp_ms }) => EngineCommand::Audio {
                            payload,
                            timestamp_ms: *timestamp_ms,
                        },
                        Some(MediaEvent::Mark(name)) => EngineCommand::Mark { name },
                        Some(MediaEvent::Dtmf(digit)) => EngineCommand::Dtmf { digit },
                        Some(MediaEvent::Stopped) | None => {
                            debug!("Media for call {} ended; stopping engine session", call_id);
                            drain_deadline = Some(Instant::now() + DRAIN_AFTER_STOP);
                            EngineCommand::SessionStop
                        }
                    };
                    let message = encode(&command)?;
                    if sink.send(message).await.is_err() {
                        debug!("Engine socket closed while relaying media");
                        break;
                    }
                }
                message = stream.next() => {
                    let Some(message) = message else { break };
                    let text = match message.context("Engine socket error")? {
                        Message::Text(text) => text,
                        Message::Close(_) => break,
                        _ => continue,
                    };
                    match serde_json::from_str::<EngineEvent>(&text) {
                        Ok(EngineEvent::Audio { payload }) => {
                            let _ = frames.send(OutboundFrame::Audio(payload)).await;
                        }
                        Ok(EngineEvent::Transcript { role, content }) => {
                            self.record(&call_id, role, &content)
                        }
                        Ok(EngineEvent::Clear) => {
                            let _ = frames.send(OutboundFrame::Clear).await;
                        }
                        Ok(EngineEvent::Mark { name }) => {
                            let _ = frames.send(OutboundFrame::Mark(name)).await;
                        }
                        Ok(EngineEvent::Hangup) => {
                            info!("Engine ended the conversation on call {}", call_id);
                            if let Some(telephony) = &self.telephony {
                                if let Err(e) = telephony.hang_up(&call_id).await {
                                    warn!("Failed to hang up call {}: {:#}", call_id, e);
                                }
                            }
                            break;
                        }
                        Ok(EngineEvent::Unknown) => {}
                        Err(e) => warn!("Malformed engine message: {}", e),
                    }
                }
                _ = drain => {
                    debug!("Engine did not close its session in time");
                    break;
                }
            }
        }

        let _ = sink.close().await;
        info!("Engine session finished for call {}", call_id);
        Ok(())
    }

    async fn transcript(&self, call_id: &CallId) -> Result<Transcript> {
        Ok(self.transcripts().get(call_id).cloned().unwrap_or_default())
    }
}
