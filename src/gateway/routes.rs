//! Gateway HTTP and WebSocket handlers
//!
//! Handlers never wait on the runner: webhooks enqueue a control event and
//! answer immediately, and correlation happens in [`dispatch_completions`].

use axum::{
    extract::{ws::WebSocketUpgrade, Form, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::session::MediaSessions;
use super::stream::{open_media_call, MediaCall, MediaPump};
use crate::correlation::{
    CompletionPayload, ControlReceiver, ControlSender, CorrelationTable, RecordingLedger,
};
use crate::engine::{ConversationEngine, ConversationScript};
use crate::models::CallId;

pub const CONNECT_PATH: &str = "/twilio_connect";
pub const CALLBACK_PATH: &str = "/callback";
pub const RECORDING_PATH: &str = "/recording";
pub const STREAM_PATH: &str = "/ws";
pub const HEALTH_PATH: &str = "/health";

/// Provider statuses sent while a call is still in progress
const NON_TERMINAL_STATUSES: &[&str] = &["queued", "initiated", "ringing", "in-progress"];

/// Time allowed for the engine's last frames to reach the provider
const MEDIA_FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

/// Recording statuses that carry a finished recording
const RECORDING_READY_STATUSES: &[&str] = &["completed"];

/// A status callback, keyed by call
#[derive(Clone, Debug, PartialEq)]
pub struct CompletionEvent {
    pub call_id: CallId,
    pub payload: CompletionPayload,
}

impl CompletionEvent {
    /// Build from the provider's form fields; `None` without a `CallSid`
    pub fn from_form(mut fields: HashMap<String, String>) -> Option<Self> {
        let call_id = fields.remove("CallSid").filter(|s| !s.is_empty())?;
        let status = fields.remove("CallStatus");
        let recording_reference = fields.remove("RecordingUrl").filter(|s| !s.is_empty());
        let duration_secs = fields
            .remove("CallDuration")
            .and_then(|d| d.parse().ok());

        Some(Self {
            call_id: CallId::new(call_id),
            payload: CompletionPayload {
                status,
                recording_reference,
                duration_secs,
                fields: fields.into_iter().collect::<BTreeMap<_, _>>(),
            },
        })
    }

    /// Whether the provider considers the call over
    pub fn is_terminal(&self) -> bool {
        match self.payload.status.as_deref() {
            Some(status) => !NON_TERMINAL_STATUSES.contains(&status),
            None => true,
        }
    }
}

#[derive(Clone)]
pub(crate) struct GatewayState {
    pub public_url: String,
    pub new_calls: ControlSender<CallId>,
    pub completions: ControlSender<CompletionEvent>,
    pub engine: Arc<dyn ConversationEngine>,
    pub script: Arc<ConversationScript>,
    pub sessions: Arc<MediaSessions>,
    pub recordings: Arc<RecordingLedger>,
}

pub(crate) fn router(state: GatewayState) -> Router {
    Router::new()
        .route(CONNECT_PATH, post(connect_handler))
        .route(CALLBACK_PATH, post(callback_handler))
        .route(RECORDING_PATH, post(recording_handler))
        .route(STREAM_PATH, get(stream_handler))
        .route(HEALTH_PATH, get(health_handler))
        .with_state(state)
}

async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Answer the provider's voice webhook with stream instructions
async fn connect_handler(
    State(state): State<GatewayState>,
    Form(fields): Form<HashMap<String, String>>,
) -> Response {
    let Some(call_sid) = fields.get("CallSid").filter(|s| !s.is_empty()) else {
        warn!("Connect webhook without CallSid");
        return (StatusCode::BAD_REQUEST, "missing CallSid").into_response();
    };

    let call_id = CallId::from(call_sid.as_str());
    info!("Call {} connecting", call_id);
    if !state.new_calls.send(call_id) {
        debug!("No runner listening for new calls");
    }

    (
        [(header::CONTENT_TYPE, "text/xml")],
        connect_twiml(&state.public_url),
    )
        .into_response()
}

async fn callback_handler(
    State(state): State<GatewayState>,
    Form(fields): Form<HashMap<String, String>>,
) -> Response {
    let Some(event) = CompletionEvent::from_form(fields) else {
        warn!("Status callback without CallSid");
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "status": "error", "message": "missing CallSid" })),
        )
            .into_response();
    };

    debug!(
        "Status callback for {}: {:?}",
        event.call_id, event.payload.status
    );
    state.completions.send(event);
    Json(serde_json::json!({ "status": "queued" })).into_response()
}

/// File a finished recording against its call
async fn recording_handler(
    State(state): State<GatewayState>,
    Form(fields): Form<HashMap<String, String>>,
) -> Response {
    let call_id = fields.get("CallSid").filter(|s| !s.is_empty());
    let reference = fields.get("RecordingUrl").filter(|s| !s.is_empty());
    let (Some(call_id), Some(reference)) = (call_id, reference) else {
        warn!("Recording callback without CallSid or RecordingUrl");
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "status": "error", "message": "missing CallSid or RecordingUrl" })),
        )
            .into_response();
    };

    match fields.get("RecordingStatus").map(String::as_str) {
        Some(status) if !RECORDING_READY_STATUSES.contains(&status) => {
            debug!("Ignoring recording status {} for {}", status, call_id);
        }
        _ => state
            .recordings
            .record(CallId::from(call_id.as_str()), reference.as_str()),
    }
    Json(serde_json::json!({ "status": "queued" })).into_response()
}

async fn stream_handler(ws: WebSocketUpgrade, State(state): State<GatewayState>) -> Response {
    ws.on_upgrade(move |socket| async move {
        let Some((call, pump)) = open_media_call(socket).await else {
            debug!("Media socket closed before stream start");
            return;
        };

        let call_id = call.call_id.clone();
        let session = state.sessions.spawn(
            call_id.clone(),
            serve_media(
                Arc::clone(&state.engine),
                Arc::clone(&state.script),
                call,
                pump,
            ),
        );
        match session.await {
            Ok(()) => state.sessions.forget(&call_id),
            Err(e) if e.is_cancelled() => info!("Media session for call {} was cut off", call_id),
            Err(e) => warn!("Media session for call {} panicked: {}", call_id, e),
        }
    })
}

/// Run the active test case's conversation over one call's media stream
async fn serve_media(
    engine: Arc<dyn ConversationEngine>,
    script: Arc<ConversationScript>,
    call: MediaCall,
    pump: MediaPump,
) {
    let call_id = call.call_id.clone();
    match script.current() {
        Some(prompts) => {
            if let Err(e) = engine.run(call, &prompts.persona, &prompts.scenario).await {
                warn!("Conversation on call {} failed: {:#}", call_id, e);
            }
        }
        None => {
            warn!("No test case active for call {}; closing media stream", call_id);
            drop(call);
        }
    }

    pump.finish(MEDIA_FLUSH_TIMEOUT).await;
    info!("Media stream for call {} closed", call_id);
}

/// Feed status callbacks into the correlation table
pub(crate) async fn dispatch_completions(
    mut completions: ControlReceiver<CompletionEvent>,
    table: Arc<CorrelationTable>,
) {
    while let Some(event) = completions.recv().await {
        if !event.is_terminal() {
            debug!(
                "Ignoring non-terminal status {:?} for {}",
                event.payload.status, event.call_id
            );
            continue;
        }
        table.resolve(&event.call_id, event.payload);
    }
    debug!("Completion dispatcher stopped");
}

/// TwiML pointing the provider's media stream at this gateway
pub fn connect_twiml(public_url: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?><Response><Connect><Stream url="{}" /></Connect></Response>"#,
        xml_escape(&stream_url(public_url))
    )
}

/// WebSocket URL of the stream endpoint for `public_url`
pub fn stream_url(public_url: &str) -> String {
    let base = public_url.trim_end_matches('/');
    let base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        format!("wss://{base}")
    };
    format!("{base}{STREAM_PATH}")
}

fn xml_escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            c => escaped.push(c),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correlation::{control_channel, ResolveOutcome};

    fn form(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_stream_url() {
        assert_eq!(stream_url("https://abc.ngrok.app"), "wss://abc.ngrok.app/ws");
        assert_eq!(stream_url("http://127.0.0.1:8765/"), "ws://127.0.0.1:8765/ws");
    }

    #[test]
    fn test_connect_twiml() {
        let twiml = connect_twiml("https://abc.ngrok.app");
        assert!(twiml.starts_with("<?xml"));
        assert!(twiml.contains(r#"<Connect><Stream url="wss://abc.ngrok.app/ws" /></Connect>"#));

        let escaped = connect_twiml("https://host/a?b=1&c=2");
        assert!(escaped.contains("&amp;c=2"));
    }

    #[test]
    fn test_completion_event_from_form() {
        let event = CompletionEvent::from_form(form(&[
            ("CallSid", "CA123"),
            ("CallStatus", "completed"),
            ("RecordingUrl", "r1.wav"),
            ("CallDuration", "42"),
            ("From", "+15550001"),
        ]))
        .unwrap();

        assert_eq!(event.call_id.as_str(), "CA123");
        assert_eq!(event.payload.recording_reference.as_deref(), Some("r1.wav"));
        assert_eq!(event.payload.duration_secs, Some(42));
        assert_eq!(event.payload.fields["From"], "+15550001");
        assert!(event.is_terminal());

        assert!(CompletionEvent::from_form(form(&[("CallStatus", "completed")])).is_none());
    }

    #[test]
    fn test_non_terminal_status() {
        let ringing =
            CompletionEvent::from_form(form(&[("CallSid", "CA1"), ("CallStatus", "ringing")]))
                .unwrap();
        assert!(!ringing.is_terminal());

        let busy = CompletionEvent::from_form(form(&[("CallSid", "CA1"), ("CallStatus", "busy")]))
            .unwrap();
        assert!(busy.is_terminal());
    }

    #[tokio::test]
    async fn test_dispatcher_skips_non_terminal() {
        let table = Arc::new(CorrelationTable::new());
        let signal = table.register(CallId::from("CA5")).unwrap();
        let (tx, rx) = control_channel();
        let dispatcher = tokio::spawn(dispatch_completions(rx, Arc::clone(&table)));

        tx.send(
            CompletionEvent::from_form(form(&[("CallSid", "CA5"), ("CallStatus", "ringing")]))
                .unwrap(),
        );
        tx.send(
            CompletionEvent::from_form(form(&[
                ("CallSid", "CA5"),
                ("CallStatus", "completed"),
                ("RecordingUrl", "five.wav"),
            ]))
            .unwrap(),
        );

        let payload = table
            .await_completion(signal, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(payload.status.as_deref(), Some("completed"));
        assert_eq!(payload.recording_reference.as_deref(), Some("five.wav"));

        drop(tx);
        dispatcher.await.unwrap();
        assert_eq!(
            table.resolve(&CallId::from("CA5"), CompletionPayload::completed()),
            ResolveOutcome::Duplicate
        );
    }
}
