//! Test run orchestrator
//!
//! Drives test cases strictly one at a time through the call lifecycle:
//! request a call, wait for the gateway to report its completion, fetch the
//! transcript, evaluate, and clean up before the next test case starts.
//! Cleanup includes the call's media session: nothing from one call's
//! conversation may still be running when the next call is requested.

use anyhow::{bail, Result};
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::correlation::{
    control_channel, ControlReceiver, CorrelationTable, RecordingLedger, RecvTimeoutError,
};
use crate::engine::{ConversationEngine, ConversationScript};
use crate::error::HarnessError;
use crate::evaluator::Evaluator;
use crate::gateway::{
    GatewayConfig, GatewayShared, InboundGateway, MediaSessions, TunnelProvisioner,
    CALLBACK_PATH, CONNECT_PATH, RECORDING_PATH,
};
use crate::models::{
    CallDirection, CallId, CallLifecycle, CallPhase, CallSession, CallStatus, TestCase, TestStatus,
};
use crate::results::{ReportEntry, RunSummary, TestRunReport};
use crate::telephony::{AgentApi, PlaceCallRequest, TelephonyProvider};
use crate::utils::PhaseTimer;

/// Per-run call settings
#[derive(Clone, Debug)]
pub struct RunConfig {
    pub direction: CallDirection,
    /// Number the provider dials for tester-initiated calls
    pub agent_phone_number: String,
    /// Body sent to the agent API for agent-initiated calls
    pub originate_params: serde_json::Value,
    /// How long to wait for an agent-initiated call to reach the gateway
    pub call_id_timeout: Duration,
    /// Extra wait on top of the time limit before a call counts as timed out
    pub completion_grace: Duration,
    /// How long a call's media session may outlive the call before it is aborted
    pub session_drain: Duration,
    /// Ask the provider to record each call
    pub record_calls: bool,
    /// How long to wait for a recording the completion callback did not carry
    pub recording_wait: Duration,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            direction: CallDirection::TesterInitiated,
            agent_phone_number: String::new(),
            originate_params: serde_json::Value::Object(Default::default()),
            call_id_timeout: Duration::from_secs(60),
            completion_grace: Duration::ZERO,
            session_drain: Duration::from_secs(10),
            record_calls: true,
            recording_wait: Duration::from_secs(10),
        }
    }
}

/// External systems a run talks to
pub struct Collaborators {
    pub telephony: Arc<dyn TelephonyProvider>,
    /// Required for agent-initiated calls
    pub agent: Option<Arc<dyn AgentApi>>,
    pub engine: Arc<dyn ConversationEngine>,
    pub evaluator: Arc<dyn Evaluator>,
    pub tunnel: Box<dyn TunnelProvisioner>,
}

/// Call state of one test case, consulted by teardown
struct Attempt {
    lifecycle: CallLifecycle,
    session: Option<CallSession>,
}

impl Attempt {
    fn new() -> Self {
        Self {
            lifecycle: CallLifecycle::new(),
            session: None,
        }
    }

    fn enter(&mut self, phase: CallPhase) {
        if let Err(e) = self.lifecycle.advance(phase) {
            warn!("{}", e);
        }
    }

    fn finish_call(&mut self, status: CallStatus) {
        if let Some(session) = self.session.as_mut() {
            session.finish(status);
        }
    }

    /// A call that never delivered its completion may still be live
    fn needs_hang_up(&self) -> Option<&CallId> {
        self.session
            .as_ref()
            .filter(|s| !s.status.is_terminal() || s.status == CallStatus::TimedOut)
            .map(|s| &s.call_id)
    }
}

/// Sequential runner for call test cases
pub struct TestRunner {
    config: RunConfig,
    telephony: Arc<dyn TelephonyProvider>,
    agent: Option<Arc<dyn AgentApi>>,
    engine: Arc<dyn ConversationEngine>,
    evaluator: Arc<dyn Evaluator>,
    gateway: InboundGateway,
    table: Arc<CorrelationTable>,
    recordings: Arc<RecordingLedger>,
    sessions: Arc<MediaSessions>,
    script: Arc<ConversationScript>,
    new_calls: ControlReceiver<CallId>,
    test_cases: Vec<TestCase>,
    report: Option<TestRunReport>,
}

impl TestRunner {
    pub fn new(config: RunConfig, gateway_config: GatewayConfig, collaborators: Collaborators) -> Self {
        let table = Arc::new(CorrelationTable::new());
        let recordings = Arc::new(RecordingLedger::new());
        let sessions = Arc::new(MediaSessions::new());
        let script = Arc::new(ConversationScript::new());
        let (new_calls_tx, new_calls) = control_channel();

        let gateway = InboundGateway::new(
            gateway_config,
            collaborators.tunnel,
            GatewayShared {
                table: Arc::clone(&table),
                recordings: Arc::clone(&recordings),
                sessions: Arc::clone(&sessions),
                engine: Arc::clone(&collaborators.engine),
                script: Arc::clone(&script),
                new_calls: new_calls_tx,
            },
        );

        Self {
            config,
            telephony: collaborators.telephony,
            agent: collaborators.agent,
            engine: collaborators.engine,
            evaluator: collaborators.evaluator,
            gateway,
            table,
            recordings,
            sessions,
            script,
            new_calls,
            test_cases: Vec::new(),
            report: None,
        }
    }

    /// Queue a test case; cases run in the order they were added
    pub fn add_test_case(&mut self, test_case: TestCase) -> Result<(), HarnessError> {
        test_case
            .validate()
            .map_err(|reason| HarnessError::InvalidTestCase(format!("{}: {}", test_case.id, reason)))?;
        debug!("Added test case {}", test_case);
        self.test_cases.push(test_case);
        Ok(())
    }

    pub fn test_cases(&self) -> &[TestCase] {
        &self.test_cases
    }

    /// Report of the last run, if one has started
    pub fn report(&self) -> Option<&TestRunReport> {
        self.report.as_ref()
    }

    /// Run every queued test case. Only a setup failure returns an error;
    /// per-test failures end up in the report.
    pub async fn run_all(&mut self, time_limit_secs: u64) -> Result<RunSummary, HarnessError> {
        let mut report = TestRunReport::new(time_limit_secs);
        info!(
            "Starting run {} with {} test cases ({})",
            report.id,
            self.test_cases.len(),
            self.config.direction
        );

        let public_url = match self.gateway.start().await {
            Ok(url) => url,
            Err(e) => {
                error!("{}", e);
                report.fail_run(e.to_string());
                self.report = Some(report);
                self.cleanup().await;
                return Err(e);
            }
        };
        report.public_url = Some(public_url.clone());

        let time_limit = Duration::from_secs(time_limit_secs);
        let test_cases = self.test_cases.clone();
        for (index, test_case) in test_cases.iter().enumerate() {
            info!("=== Test {}/{}: {} ===", index + 1, test_cases.len(), test_case);
            let entry = self.run_test_case(test_case, &public_url, time_limit).await;
            info!(
                "  {} {} [{}ms]",
                entry.status.symbol(),
                entry.test_name,
                entry.duration_ms
            );
            report.record(entry);
        }

        report.finish();
        self.cleanup().await;

        info!(
            "Run {} finished: {}/{} completed, {}/{} evaluations passed ({:.1}%)",
            report.id,
            report.summary.completed,
            report.summary.total_tests,
            report.summary.passed_evaluations,
            report.summary.total_evaluations,
            report.summary.evaluation_pass_rate
        );

        let summary = report.summary.clone();
        self.report = Some(report);
        Ok(summary)
    }

    /// Write the last run's report as JSON
    pub fn save_report(&self, path: &Path) -> Result<PathBuf> {
        match &self.report {
            Some(report) => report.save(path),
            None => bail!("No test run to save"),
        }
    }

    /// Stop the gateway and tunnel. Safe to call repeatedly.
    pub async fn cleanup(&mut self) {
        self.gateway.stop().await;
        self.script.clear();
        if !self.table.is_empty() {
            warn!("{} correlation entries outstanding at cleanup", self.table.len());
        }
    }

    async fn run_test_case(
        &mut self,
        test_case: &TestCase,
        public_url: &str,
        time_limit: Duration,
    ) -> ReportEntry {
        let mut phases = PhaseTimer::start(&test_case.id);
        let mut attempt = Attempt::new();
        let mut entry = ReportEntry::new(
            &test_case.id,
            &test_case.name,
            &test_case.scenario.description,
            self.config.direction,
        );

        let result = self
            .drive_call(test_case, public_url, time_limit, &mut attempt, &mut entry, &mut phases)
            .await;

        match result {
            Ok(()) => {
                attempt.enter(CallPhase::Completed);
                entry.status = TestStatus::Completed;
            }
            Err(e) if e.is_completion_timeout() => {
                warn!("Test {} timed out: {}", test_case.name, e);
                attempt.finish_call(CallStatus::TimedOut);
                attempt.enter(CallPhase::TimedOut);
                entry.status = TestStatus::TimedOut;
                entry.error = Some(e.to_string());
            }
            Err(e) => {
                error!("Test {} failed: {}", test_case.name, e);
                attempt.enter(CallPhase::Failed);
                entry.status = TestStatus::Failed;
                entry.error = Some(e.to_string());
            }
        }

        self.teardown(&attempt).await;
        phases.mark("teardown");

        entry.call_requested_at = attempt.lifecycle.entered_at(CallPhase::CallRequested);
        entry.cleaned_up_at = Some(Utc::now());
        entry.duration_ms = phases.finish().as_millis() as u64;
        entry
    }

    async fn drive_call(
        &mut self,
        test_case: &TestCase,
        public_url: &str,
        time_limit: Duration,
        attempt: &mut Attempt,
        entry: &mut ReportEntry,
        phases: &mut PhaseTimer,
    ) -> Result<(), HarnessError> {
        attempt.enter(CallPhase::CallRequested);
        self.engine
            .reset()
            .await
            .map_err(|e| HarnessError::TranscriptUnavailable(format!("engine reset failed: {e:#}")))?;
        self.script
            .set(test_case.persona.prompt(), &test_case.scenario.description);

        let call_id = self.request_call(public_url, time_limit).await?;
        entry.call_id = Some(call_id.clone());
        attempt.session = Some(CallSession::new(call_id.clone(), self.config.direction));
        phases.mark("call requested");

        let signal = self.table.register(call_id.clone())?;
        attempt.enter(CallPhase::CallConnected);
        if let Some(session) = attempt.session.as_mut() {
            session.connect();
        }

        let wait = time_limit + self.config.completion_grace;
        info!("Call {} in progress, waiting up to {}s", call_id, wait.as_secs());
        let payload = self.table.await_completion(signal, wait).await?;
        phases.mark("call completed");

        entry.recording_reference = payload.recording_reference.clone();
        if let Some(status) = payload.failure_status() {
            attempt.finish_call(CallStatus::Failed);
            return Err(HarnessError::CallFailed {
                call_id,
                status: status.to_string(),
            });
        }
        attempt.finish_call(CallStatus::Completed);

        // The engine may still be flushing the call's last turns
        if !self
            .sessions
            .wait_ended(&call_id, self.config.session_drain)
            .await
        {
            warn!(
                "Media session for call {} still running after {}s; reading transcript so far",
                call_id,
                self.config.session_drain.as_secs()
            );
        }
        let transcript = self
            .engine
            .transcript(&call_id)
            .await
            .map_err(|e| HarnessError::TranscriptUnavailable(format!("{e:#}")))?;
        entry.transcript = transcript.to_string();
        phases.mark("transcript");

        if entry.recording_reference.is_none() && self.config.record_calls {
            entry.recording_reference = self
                .recordings
                .wait_for(&call_id, self.config.recording_wait)
                .await;
            if entry.recording_reference.is_none() {
                warn!(
                    "No recording for call {} within {}s",
                    call_id,
                    self.config.recording_wait.as_secs()
                );
            }
        }

        let evaluations = self
            .evaluator
            .evaluate(&entry.transcript, &test_case.metrics)
            .await
            .map_err(|e| HarnessError::EvaluationFailure(format!("{e:#}")))?;
        entry.set_evaluations(evaluations);
        phases.mark("evaluated");

        Ok(())
    }

    async fn request_call(
        &mut self,
        public_url: &str,
        time_limit: Duration,
    ) -> Result<CallId, HarnessError> {
        let voice_url = format!("{public_url}{CONNECT_PATH}");
        let status_callback_url = format!("{public_url}{CALLBACK_PATH}");
        let recording_callback_url = self
            .config
            .record_calls
            .then(|| format!("{public_url}{RECORDING_PATH}"));

        match self.config.direction {
            CallDirection::TesterInitiated => {
                let request = PlaceCallRequest {
                    to: self.config.agent_phone_number.clone(),
                    voice_url,
                    status_callback_url,
                    time_limit_secs: time_limit.as_secs(),
                    recording_callback_url,
                };
                let call_id = self
                    .telephony
                    .place_call(&request)
                    .await
                    .map_err(|e| HarnessError::Telephony(format!("{e:#}")))?;
                info!("Placed call {} to {}", call_id, request.to);
                Ok(call_id)
            }
            CallDirection::AgentInitiated => {
                let agent = self.agent.clone().ok_or_else(|| {
                    HarnessError::AgentApi("agent-initiated calls need an agent API".to_string())
                })?;

                let stale = self.new_calls.drain();
                if !stale.is_empty() {
                    warn!("Discarding {} stale call ids: {:?}", stale.len(), stale);
                }

                self.telephony
                    .configure_number(&voice_url, &status_callback_url)
                    .await
                    .map_err(|e| HarnessError::Telephony(format!("{e:#}")))?;
                agent
                    .originate_call(&self.config.originate_params)
                    .await
                    .map_err(|e| HarnessError::AgentApi(format!("{e:#}")))?;

                let timeout = self.config.call_id_timeout;
                match self.new_calls.recv_timeout(timeout).await {
                    Ok(call_id) => {
                        info!("Agent called in as {}", call_id);
                        if let Some(callback_url) = &recording_callback_url {
                            if let Err(e) =
                                self.telephony.start_recording(&call_id, callback_url).await
                            {
                                warn!("Failed to start recording call {}: {:#}", call_id, e);
                            }
                        }
                        Ok(call_id)
                    }
                    Err(RecvTimeoutError::Timeout) => {
                        Err(HarnessError::CallIdTimeout(timeout.as_secs()))
                    }
                    Err(RecvTimeoutError::Closed) => Err(HarnessError::SetupFailure(
                        "gateway stopped announcing calls".to_string(),
                    )),
                }
            }
        }
    }

    /// Always runs before the next test case starts
    async fn teardown(&self, attempt: &Attempt) {
        if let Some(call_id) = attempt.needs_hang_up() {
            if let Err(e) = self.telephony.hang_up(call_id).await {
                warn!("Failed to hang up call {}: {:#}", call_id, e);
            }
        }
        if let Some(session) = &attempt.session {
            self.sessions
                .close(&session.call_id, self.config.session_drain)
                .await;
            self.table.release(&session.call_id);
            self.recordings.forget(&session.call_id);
            let ended_at = session.ended_at.unwrap_or_else(Utc::now);
            debug!(
                "Call {} ({}) ended {:?} after {}s",
                session.call_id,
                session.direction,
                session.status,
                (ended_at - session.started_at).num_seconds()
            );
        }
        self.script.clear();
    }
}
