//! Test case models
//!
//! Scenarios, personas and metrics that make up one scripted call test.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Conversational goal driving the simulated caller
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scenario {
    pub id: String,
    pub name: String,
    pub description: String,
}

/// Behaviour of the simulated caller
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserPersona {
    pub id: String,
    pub name: String,
    pub description: String,
    /// Optional language or accent hint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

impl UserPersona {
    /// Persona prompt handed to the conversational engine
    pub fn prompt(&self) -> String {
        match &self.language {
            Some(language) => format!(
                "{}\n\nSpeak {} throughout the call.",
                self.description, language
            ),
            None => self.description.clone(),
        }
    }
}

/// Evaluation metric applied to a transcript
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metric {
    pub id: String,
    pub name: String,
    pub prompt: String,
}

/// A fully resolved test case; immutable once a run starts
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TestCase {
    pub id: String,
    pub name: String,
    pub scenario: Scenario,
    pub persona: UserPersona,
    #[serde(default)]
    pub metrics: Vec<Metric>,
}

impl TestCase {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        scenario: Scenario,
        persona: UserPersona,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            scenario,
            persona,
            metrics: Vec::new(),
        }
    }

    pub fn with_metric(mut self, metric: Metric) -> Self {
        self.metrics.push(metric);
        self
    }

    /// Check that the test case is complete enough to run
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("test case name is empty".to_string());
        }
        if self.scenario.description.trim().is_empty() {
            return Err(format!("scenario '{}' has no description", self.scenario.name));
        }
        if self.persona.description.trim().is_empty() {
            return Err(format!("persona '{}' has no description", self.persona.name));
        }
        Ok(())
    }
}

impl fmt::Display for TestCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} / {})", self.name, self.scenario.name, self.persona.name)
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn test_persona_prompt_with_language() {
        let mut case = test_case("t1", "Booking");
        assert_eq!(case.persona.prompt(), case.persona.description);

        case.persona.language = Some("with a Scottish accent".to_string());
        assert!(case.persona.prompt().ends_with("Speak with a Scottish accent throughout the call."));
    }

    #[test]
    fn test_validate() {
        let case = test_case("t1", "Booking");
        assert!(case.validate().is_ok());

        let mut empty = case.clone();
        empty.name = "  ".to_string();
        assert!(empty.validate().is_err());

        let mut no_scenario = case;
        no_scenario.scenario.description.clear();
        assert!(no_scenario.validate().unwrap_err().contains("scenario"));
    }

    #[test]
    fn test_display() {
        let case = test_case("t1", "Booking").with_metric(metric("task-completion"));
        assert_eq!(case.metrics.len(), 1);
        assert_eq!(case.to_string(), "Booking (Booking scenario / Busy parent)");
    }
}
