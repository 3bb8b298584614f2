//! Test result models for call tests
//!
//! Defines evaluation verdicts and per-test outcome status.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Verdict for a single metric
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Pass,
    Fail,
}

impl Verdict {
    pub fn symbol(&self) -> &'static str {
        match self {
            Verdict::Pass => "✓",
            Verdict::Fail => "✗",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Pass => write!(f, "pass"),
            Verdict::Fail => write!(f, "fail"),
        }
    }
}

/// Evaluation of one metric against a transcript
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationResult {
    #[serde(rename = "metric_name", alias = "name")]
    pub name: String,
    #[serde(rename = "result", alias = "verdict")]
    pub verdict: Verdict,
    pub reason: String,
}

impl EvaluationResult {
    pub fn pass(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            verdict: Verdict::Pass,
            reason: reason.into(),
        }
    }

    pub fn fail(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            verdict: Verdict::Fail,
            reason: reason.into(),
        }
    }
}

/// Final status of one test case
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestStatus {
    Completed,
    Failed,
    TimedOut,
}

impl TestStatus {
    /// Serialized form, e.g. `timed_out`
    pub fn as_str(&self) -> &'static str {
        match self {
            TestStatus::Completed => "completed",
            TestStatus::Failed => "failed",
            TestStatus::TimedOut => "timed_out",
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            TestStatus::Completed => "✓",
            TestStatus::Failed => "✗",
            TestStatus::TimedOut => "⏱",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, TestStatus::Completed)
    }
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestStatus::Completed => write!(f, "COMPLETED"),
            TestStatus::Failed => write!(f, "FAILED"),
            TestStatus::TimedOut => write!(f, "TIMED OUT"),
        }
    }
}

/// Pass/fail tally over a set of evaluations
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Tally {
    pub pass_count: usize,
    pub fail_count: usize,
}

impl Tally {
    pub fn from_evaluations(evaluations: &[EvaluationResult]) -> Self {
        let pass_count = evaluations
            .iter()
            .filter(|e| e.verdict == Verdict::Pass)
            .count();
        Self {
            pass_count,
            fail_count: evaluations.len() - pass_count,
        }
    }

    pub fn total(&self) -> usize {
        self.pass_count + self.fail_count
    }

    /// Pass rate as a percentage; 0 when nothing was evaluated
    pub fn pass_rate(&self) -> f64 {
        if self.total() == 0 {
            0.0
        } else {
            (self.pass_count as f64 / self.total() as f64) * 100.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tally() {
        let evaluations = vec![
            EvaluationResult::pass("Conversation Flow", "natural turn-taking"),
            EvaluationResult::fail("Task Completion", "no booking made"),
            EvaluationResult::pass("Personality", "friendly"),
        ];
        let tally = Tally::from_evaluations(&evaluations);
        assert_eq!(tally.pass_count, 2);
        assert_eq!(tally.fail_count, 1);
        assert_eq!(tally.total(), 3);
        assert!((tally.pass_rate() - 66.666).abs() < 0.01);
    }

    #[test]
    fn test_empty_tally() {
        let tally = Tally::from_evaluations(&[]);
        assert_eq!(tally.pass_rate(), 0.0);
    }

    #[test]
    fn test_evaluation_serde_names() {
        let json = r#"{"name":"Flow","result":"pass","reason":"ok"}"#;
        let parsed: EvaluationResult = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.verdict, Verdict::Pass);

        let out = serde_json::to_value(&parsed).unwrap();
        assert_eq!(out["metric_name"], "Flow");
        assert_eq!(out["result"], "pass");
    }

    #[test]
    fn test_status_serde() {
        assert_eq!(
            serde_json::to_string(&TestStatus::TimedOut).unwrap(),
            "\"timed_out\""
        );
        assert!(TestStatus::Completed.is_success());
    }
}
