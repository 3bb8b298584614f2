//! HTTP client module
//!
//! Shared REST client used by the telephony, agent and evaluator
//! collaborators.

mod client;

pub use client::{HttpClient, HttpError, HttpResponse};
