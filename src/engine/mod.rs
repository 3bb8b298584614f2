//! Conversational engine seam
//!
//! The engine plays the scripted caller on a live call. The runner sets the
//! persona and scenario on a shared [`ConversationScript`] before each call;
//! the gateway reads it when the provider's media stream arrives.

mod bridge;

pub use bridge::WsBridgeEngine;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{PoisonError, RwLock};

use crate::gateway::MediaCall;
use crate::models::CallId;

/// Real-time speech pipeline that conducts the conversation
#[async_trait]
pub trait ConversationEngine: Send + Sync {
    /// Discard transcripts of earlier calls
    async fn reset(&self) -> Result<()>;

    /// Conduct the conversation until the call ends
    async fn run(&self, call: MediaCall, persona_prompt: &str, scenario_prompt: &str)
        -> Result<()>;

    /// Transcript of `call_id`'s conversation; empty if it never had one
    async fn transcript(&self, call_id: &CallId) -> Result<Transcript>;
}

/// Prompts for the call currently under test
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScriptPrompts {
    pub persona: String,
    pub scenario: String,
}

/// Persona and scenario shared between the runner and the gateway
#[derive(Debug, Default)]
pub struct ConversationScript {
    current: RwLock<Option<ScriptPrompts>>,
}

impl ConversationScript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, persona: impl Into<String>, scenario: impl Into<String>) {
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        *current = Some(ScriptPrompts {
            persona: persona.into(),
            scenario: scenario.into(),
        });
    }

    pub fn clear(&self) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    pub fn current(&self) -> Option<ScriptPrompts> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Who spoke a transcript turn
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    /// The simulated caller played by the engine
    Caller,
    /// The voice agent under test
    Agent,
}

impl Speaker {
    /// Role label used when rendering for the evaluator
    pub fn label(&self) -> &'static str {
        match self {
            Speaker::Caller => "user",
            Speaker::Agent => "assistant",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptTurn {
    pub speaker: Speaker,
    pub content: String,
}

/// Ordered conversation turns
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transcript {
    pub turns: Vec<TranscriptTurn>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a turn; consecutive fragments from one speaker are merged
    pub fn push(&mut self, speaker: Speaker, content: impl Into<String>) {
        let content = content.into();
        let content = content.trim();
        if content.is_empty() {
            return;
        }
        match self.turns.last_mut() {
            Some(last) if last.speaker == speaker => {
                last.content.push(' ');
                last.content.push_str(content);
            }
            _ => self.turns.push(TranscriptTurn {
                speaker,
                content: content.to_string(),
            }),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

impl fmt::Display for Transcript {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, turn) in self.turns.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{}: {}", turn.speaker.label(), turn.content)?;
        }
        Ok(())
    }
}
