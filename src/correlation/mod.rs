//! Cross-context correlation between provider callbacks and waiting tests
//!
//! The gateway's handlers and the runner live on different tasks. They
//! meet only here: control events flow over [`ControlSender`] /
//! [`ControlReceiver`], call completions are matched to waiters by the
//! [`CorrelationTable`], and late recording reports land in the
//! [`RecordingLedger`].

mod channel;
mod recordings;
mod table;

pub use channel::{control_channel, ControlReceiver, ControlSender, RecvTimeoutError};
pub use recordings::RecordingLedger;
pub use table::{
    CompletionPayload, CompletionSignal, CorrelationTable, ResolveOutcome,
};
