//! Provider media stream codec and socket pump
//!
//! The provider opens one WebSocket per live call and exchanges JSON
//! frames tagged by `event`. [`open_media_call`] waits for the `start`
//! frame, then splits the socket into a reader task and a writer task so
//! the conversational engine only ever sees channels.

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::models::CallId;

/// Frames buffered between the socket and the engine in each direction
const MEDIA_BUFFER: usize = 256;

/// Inbound frame from the provider
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum StreamEvent {
    Connected {
        #[serde(default)]
        protocol: Option<String>,
        #[serde(default)]
        version: Option<String>,
    },
    Start {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        start: StartMeta,
    },
    Media {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        media: MediaChunk,
    },
    Mark {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        mark: MarkLabel,
    },
    Dtmf {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        dtmf: DtmfDigit,
    },
    Stop {
        #[serde(rename = "streamSid")]
        stream_sid: String,
    },
    #[serde(other)]
    Unknown,
}

impl StreamEvent {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartMeta {
    pub call_sid: String,
    #[serde(default)]
    pub account_sid: Option<String>,
    #[serde(default)]
    pub custom_parameters: HashMap<String, String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MediaChunk {
    /// Base64 audio exactly as the provider sent it
    pub payload: String,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub track: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MarkLabel {
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DtmfDigit {
    pub digit: String,
}

/// What the engine receives from the call
#[derive(Clone, Debug, PartialEq)]
pub enum MediaEvent {
    Audio {
        payload: String,
        timestamp_ms: Option<u64>,
    },
    /// Playback reached a mark the engine sent earlier
    Mark(String),
    Dtmf(String),
    /// The provider ended the stream
    Stopped,
}

/// What the engine sends back into the call
#[derive(Clone, Debug, PartialEq)]
pub enum OutboundFrame {
    /// Base64 audio in the call's negotiated format
    Audio(String),
    Mark(String),
    /// Drop audio queued on the provider side (barge-in)
    Clear,
}

#[derive(Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
enum OutboundMessage<'a> {
    Media {
        #[serde(rename = "streamSid")]
        stream_sid: &'a str,
        media: OutboundPayload<'a>,
    },
    Mark {
        #[serde(rename = "streamSid")]
        stream_sid: &'a str,
        mark: OutboundMark<'a>,
    },
    Clear {
        #[serde(rename = "streamSid")]
        stream_sid: &'a str,
    },
}

#[derive(Serialize)]
struct OutboundPayload<'a> {
    payload: &'a str,
}

#[derive(Serialize)]
struct OutboundMark<'a> {
    name: &'a str,
}

impl OutboundFrame {
    /// Encode as the provider's JSON frame for `stream_sid`
    pub fn encode(&self, stream_sid: &str) -> Result<String, serde_json::Error> {
        let message = match self {
            OutboundFrame::Audio(payload) => OutboundMessage::Media {
                stream_sid,
                media: OutboundPayload { payload },
            },
            OutboundFrame::Mark(name) => OutboundMessage::Mark {
                stream_sid,
                mark: OutboundMark { name },
            },
            OutboundFrame::Clear => OutboundMessage::Clear { stream_sid },
        };
        serde_json::to_string(&message)
    }
}

/// A live call as seen by the conversational engine
#[derive(Debug)]
pub struct MediaCall {
    pub call_id: CallId,
    pub stream_sid: String,
    pub parameters: HashMap<String, String>,
    pub events: mpsc::Receiver<MediaEvent>,
    pub frames: mpsc::Sender<OutboundFrame>,
}

/// Tasks moving frames between the socket and a [`MediaCall`].
///
/// Both tasks are aborted when the pump is dropped, so a cancelled media
/// session releases the socket along with the engine.
pub struct MediaPump {
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl MediaPump {
    /// Wait for queued outbound frames to flush, then stop reading.
    ///
    /// Call after the engine has dropped its [`MediaCall`].
    pub async fn finish(mut self, flush_timeout: Duration) {
        if tokio::time::timeout(flush_timeout, &mut self.writer).await.is_err() {
            debug!("Media writer did not flush in time; aborting");
        }
    }
}

impl Drop for MediaPump {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
    }
}

/// Read frames until the provider's `start`, then hand back a [`MediaCall`].
///
/// Returns `None` if the socket closes before the stream starts.
pub async fn open_media_call(socket: WebSocket) -> Option<(MediaCall, MediaPump)> {
    let (mut sink, mut stream) = socket.split();

    let (stream_sid, start) = loop {
        let text = match stream.next().await? {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) | Err(_) => return None,
            Ok(_) => continue,
        };
        match StreamEvent::parse(text.as_str()) {
            Ok(StreamEvent::Start { stream_sid, start }) => break (stream_sid, start),
            Ok(StreamEvent::Connected { protocol, .. }) => {
                debug!("Media stream connected (protocol {:?})", protocol);
            }
            Ok(other) => debug!("Ignoring media frame before start: {:?}", other),
            Err(e) => warn!("Malformed media frame: {}", e),
        }
    };

    let call_id = CallId::new(start.call_sid);
    info!("Media stream {} started for call {}", stream_sid, call_id);

    let (event_tx, event_rx) = mpsc::channel(MEDIA_BUFFER);
    let (frame_tx, mut frame_rx) = mpsc::channel::<OutboundFrame>(MEDIA_BUFFER);

    let reader = tokio::spawn(async move {
        while let Some(message) = stream.next().await {
            let text = match message {
                Ok(Message::Text(text)) => text,
                Ok(Message::Close(_)) | Err(_) => break,
                Ok(_) => continue,
            };
            let event = match StreamEvent::parse(text.as_str()) {
                Ok(event) => event,
                Err(e) => {
                    warn!("Malformed media frame: {}", e);
                    continue;
                }
            };
            let forwarded = match event {
                StreamEvent::Media { media, .. } => MediaEvent::Audio {
                    timestamp_ms: media.timestamp.as_deref().and_then(|t| t.parse().ok()),
                    payload: media.payload,
                },
                StreamEvent::Mark { mark, .. } => MediaEvent::Mark(mark.name),
                StreamEvent::Dtmf { dtmf, .. } => MediaEvent::Dtmf(dtmf.digit),
                StreamEvent::Stop { .. } => {
                    let _ = event_tx.send(MediaEvent::Stopped).await;
                    break;
                }
                _ => continue,
            };
            if event_tx.send(forwarded).await.is_err() {
                break;
            }
        }
        debug!("Media reader finished");
    });

    let sid = stream_sid.clone();
    let writer = tokio::spawn(async move {
        while let Some(frame) = frame_rx.recv().await {
            let text = match frame.encode(&sid) {
                Ok(text) => text,
                Err(e) => {
                    warn!("Failed to encode media frame: {}", e);
                    continue;
                }
            };
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
        debug!("Media writer finished");
    });

    let call = MediaCall {
        call_id,
        stream_sid,
        parameters: start.custom_parameters,
        events: event_rx,
        frames: frame_tx,
    };

    Some((call, MediaPump { reader, writer }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_start() {
        let text = r#"{
            "event": "start",
            "sequenceNumber": "1",
            "streamSid": "MZ1",
            "start": {
                "streamSid": "MZ1",
                "accountSid": "AC1",
                "callSid": "CA123",
                "tracks": ["inbound"],
                "customParameters": {"test": "booking"}
            }
        }"#;

        match StreamEvent::parse(text).unwrap() {
            StreamEvent::Start { stream_sid, start } => {
                assert_eq!(stream_sid, "MZ1");
                assert_eq!(start.call_sid, "CA123");
                assert_eq!(start.custom_parameters["test"], "booking");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_parse_media_and_unknown() {
        let media = r#"{"event":"media","streamSid":"MZ1","media":{"track":"inbound","chunk":"2","timestamp":"40","payload":"AAAA"}}"#;
        let StreamEvent::Media { media, .. } = StreamEvent::parse(media).unwrap() else {
            panic!("expected media");
        };
        assert_eq!(media.payload, "AAAA");
        assert_eq!(media.timestamp.as_deref(), Some("40"));

        let unknown = r#"{"event":"transcription","streamSid":"MZ1"}"#;
        assert_eq!(StreamEvent::parse(unknown).unwrap(), StreamEvent::Unknown);
    }

    #[test]
    fn test_encode_outbound() {
        let audio: serde_json::Value =
            serde_json::from_str(&OutboundFrame::Audio("AAAA".into()).encode("MZ1").unwrap())
                .unwrap();
        assert_eq!(audio["event"], "media");
        assert_eq!(audio["streamSid"], "MZ1");
        assert_eq!(audio["media"]["payload"], "AAAA");

        let mark: serde_json::Value =
            serde_json::from_str(&OutboundFrame::Mark("turn-1".into()).encode("MZ1").unwrap())
                .unwrap();
        assert_eq!(mark["mark"]["name"], "turn-1");

        assert_eq!(
            OutboundFrame::Clear.encode("MZ1").unwrap(),
            r#"{"event":"clear","streamSid":"MZ1"}"#
        );
    }
}
