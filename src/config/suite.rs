//! Test suite files
//!
//! A suite declares scenarios, personas and metrics once and composes them
//! into test cases by id. Loading validates every reference, and
//! [`TestSuite::resolve`] turns the suite into immutable [`TestCase`]s.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

use crate::models::{Metric, Scenario, TestCase, UserPersona};

/// Test case as written in a suite file
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SuiteTestCase {
    pub id: String,
    pub name: String,
    /// Scenario id
    pub scenario: String,
    /// Persona id
    pub persona: String,
    /// Metric ids
    #[serde(default)]
    pub metrics: Vec<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TestSuite {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub scenarios: Vec<Scenario>,
    #[serde(default)]
    pub personas: Vec<UserPersona>,
    #[serde(default)]
    pub metrics: Vec<Metric>,
    #[serde(default)]
    pub test_cases: Vec<SuiteTestCase>,
}

impl TestSuite {
    /// Load a YAML or JSON suite and validate it
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read test suite: {}", path.display()))?;

        let yaml = path
            .extension()
            .map(|e| e == "yaml" || e == "yml")
            .unwrap_or(false);
        let suite: Self = if yaml {
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse YAML suite: {}", path.display()))?
        } else {
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse JSON suite: {}", path.display()))?
        };

        suite
            .validate()
            .with_context(|| format!("Invalid test suite: {}", path.display()))?;
        Ok(suite)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = serde_yaml::to_string(self).context("Failed to serialize test suite")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write test suite: {}", path.display()))
    }

    /// Unique ids and no dangling references
    pub fn validate(&self) -> Result<()> {
        check_unique("scenario", self.scenarios.iter().map(|s| s.id.as_str()))?;
        check_unique("persona", self.personas.iter().map(|p| p.id.as_str()))?;
        check_unique("metric", self.metrics.iter().map(|m| m.id.as_str()))?;
        check_unique("test case", self.test_cases.iter().map(|t| t.id.as_str()))?;

        for case in &self.test_cases {
            if self.scenario(&case.scenario).is_none() {
                bail!("Test case '{}' references unknown scenario '{}'", case.id, case.scenario);
            }
            if self.persona(&case.persona).is_none() {
                bail!("Test case '{}' references unknown persona '{}'", case.id, case.persona);
            }
            for metric in &case.metrics {
                if self.metric(metric).is_none() {
                    bail!("Test case '{}' references unknown metric '{}'", case.id, metric);
                }
            }
        }
        Ok(())
    }

    pub fn scenario(&self, id: &str) -> Option<&Scenario> {
        self.scenarios.iter().find(|s| s.id == id)
    }

    pub fn persona(&self, id: &str) -> Option<&UserPersona> {
        self.personas.iter().find(|p| p.id == id)
    }

    pub fn metric(&self, id: &str) -> Option<&Metric> {
        self.metrics.iter().find(|m| m.id == id)
    }

    /// Every test case, in file order
    pub fn resolve(&self) -> Result<Vec<TestCase>> {
        self.test_cases.iter().map(|case| self.resolve_one(case)).collect()
    }

    /// The named test cases, in the order given
    pub fn select(&self, ids: &[String]) -> Result<Vec<TestCase>> {
        ids.iter()
            .map(|id| {
                let case = self
                    .test_cases
                    .iter()
                    .find(|c| &c.id == id)
                    .with_context(|| format!("No test case with id '{id}'"))?;
                self.resolve_one(case)
            })
            .collect()
    }

    fn resolve_one(&self, case: &SuiteTestCase) -> Result<TestCase> {
        let scenario = self
            .scenario(&case.scenario)
            .with_context(|| format!("Unknown scenario '{}'", case.scenario))?;
        let persona = self
            .persona(&case.persona)
            .with_context(|| format!("Unknown persona '{}'", case.persona))?;

        let mut resolved = TestCase::new(&case.id, &case.name, scenario.clone(), persona.clone());
        for id in &case.metrics {
            let metric = self
                .metric(id)
                .with_context(|| format!("Unknown metric '{id}'"))?;
            resolved = resolved.with_metric(metric.clone());
        }
        Ok(resolved)
    }

    /// Starter suite for a dental office booking agent
    pub fn example() -> Self {
        let metric = |id: &str, name: &str, prompt: &str| Metric {
            id: id.to_string(),
            name: name.to_string(),
            prompt: prompt.to_string(),
        };

        Self {
            name: "dental-office".to_string(),
            scenarios: vec![
                Scenario {
                    id: "booking".to_string(),
                    name: "Initial Appointment Booking".to_string(),
                    description: "You're calling to schedule a routine cleaning appointment. \
                        Give your name when asked, request this Friday at 10:30 AM and \
                        confirm the appointment details."
                        .to_string(),
                },
                Scenario {
                    id: "reschedule".to_string(),
                    name: "Appointment Rescheduling".to_string(),
                    description: "You're calling to move your Friday 10:30 AM appointment to \
                        Tuesday at 12:30 PM. Confirm the new details and thank them."
                        .to_string(),
                },
            ],
            personas: vec![UserPersona {
                id: "michael".to_string(),
                name: "Michael Chen".to_string(),
                description: "You are Michael, a busy professional who is direct and to the \
                    point. You have been to a dentist before but are new to this office."
                    .to_string(),
                language: None,
            }],
            metrics: vec![
                metric(
                    "flow",
                    "Conversation Flow",
                    "Evaluate if the conversation flows naturally and the agent maintains appropriate turn-taking",
                ),
                metric(
                    "task",
                    "Task Completion",
                    "Assess if the agent successfully completes the booking with all necessary information",
                ),
            ],
            test_cases: vec![
                SuiteTestCase {
                    id: "booking".to_string(),
                    name: "Booking".to_string(),
                    scenario: "booking".to_string(),
                    persona: "michael".to_string(),
                    metrics: vec!["flow".to_string(), "task".to_string()],
                },
                SuiteTestCase {
                    id: "reschedule".to_string(),
                    name: "Reschedule".to_string(),
                    scenario: "reschedule".to_string(),
                    persona: "michael".to_string(),
                    metrics: Vec::new(),
                },
            ],
        }
    }
}

fn check_unique<'a>(kind: &str, ids: impl Iterator<Item = &'a str>) -> Result<()> {
    let mut seen = HashSet::new();
    for id in ids {
        if id.trim().is_empty() {
            bail!("Empty {kind} id");
        }
        if !seen.insert(id) {
            bail!("Duplicate {kind} id '{id}'");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_example_resolves() {
        let suite = TestSuite::example();
        suite.validate().unwrap();

        let cases = suite.resolve().unwrap();
        assert_eq!(cases.len(), 2);
        assert_eq!(cases[0].name, "Booking");
        assert_eq!(cases[0].metrics.len(), 2);
        assert_eq!(cases[0].persona.name, "Michael Chen");
        assert!(cases[1].metrics.is_empty());
    }

    #[test]
    fn test_select_keeps_given_order() {
        let suite = TestSuite::example();
        let cases = suite
            .select(&["reschedule".to_string(), "booking".to_string()])
            .unwrap();
        assert_eq!(cases[0].id, "reschedule");
        assert_eq!(cases[1].id, "booking");

        assert!(suite.select(&["missing".to_string()]).is_err());
    }

    #[test]
    fn test_dangling_reference_rejected() {
        let mut suite = TestSuite::example();
        suite.test_cases[0].metrics.push("empathy".to_string());
        let err = suite.validate().unwrap_err();
        assert!(err.to_string().contains("unknown metric 'empathy'"));
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let mut suite = TestSuite::example();
        let copy = suite.scenarios[0].clone();
        suite.scenarios.push(copy);
        assert!(suite.validate().is_err());
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("suite.yaml");
        TestSuite::example().save(&path).unwrap();

        let loaded = TestSuite::load(&path).unwrap();
        assert_eq!(loaded.name, "dental-office");
        assert_eq!(loaded.test_cases.len(), 2);
    }

    #[test]
    fn test_load_json_suite() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("suite.json");
        std::fs::write(
            &path,
            r#"{
                "scenarios": [{"id": "s", "name": "S", "description": "Ask for hours"}],
                "personas": [{"id": "p", "name": "P", "description": "Polite", "language": "Spanish"}],
                "test_cases": [{"id": "t", "name": "Hours", "scenario": "s", "persona": "p"}]
            }"#,
        )
        .unwrap();

        let cases = TestSuite::load(&path).unwrap().resolve().unwrap();
        assert_eq!(cases.len(), 1);
        assert!(cases[0].persona.prompt().contains("Speak Spanish"));
    }
}
