//! Session Controller - bounded, turn-sequential conversations between roles
//!
//! The controller owns one conversation. Each automatic turn picks a speaker,
//! sends the speaker's system prompt plus the transcript so far to the
//! speaker's backend, and appends the reply. The loop ends when the
//! termination predicate fires (`Completed`), when the turn bound is reached
//! or the session is cancelled (`Terminated`), or when a backend call fails
//! for good (`Failed`).
//!
//! ```text
//! Created ──start()──► Running ──predicate──► Completed
//!                         │ ──max_turns / cancel / stop──► Terminated
//!                         └ ──backend error──► Failed
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use super::execution::{extract_code_fragments, CodeExecutor};
use super::human::{HumanInput, HumanInputMode, HumanPrompt, SuspendReason};
use super::termination::{SentinelPredicate, TerminationPredicate};
use super::transcript::{Message, Transcript, EXECUTOR_SENDER, HUMAN_SENDER};
use crate::availability::{ModelAvailabilityManager, ModelStatus};
use crate::backend::{
    BackendClient, BackendError, ChatMessage, FailureCategory, ModelUnavailableError,
};
use crate::config::Settings;
use crate::metrics::{CODE_EXECUTIONS, SESSION_OUTCOMES, SESSION_TURNS};
use crate::roles::Role;

/// Bounds and policies for a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    /// Maximum number of automatic turns
    pub max_turns: usize,
    pub human_input_mode: HumanInputMode,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            max_turns: 10,
            human_input_mode: HumanInputMode::Never,
        }
    }
}

impl From<&Settings> for SessionOptions {
    fn from(settings: &Settings) -> Self {
        Self {
            max_turns: settings.max_turns,
            human_input_mode: settings.human_input_mode,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Running,
    Completed,
    Terminated,
    Failed,
}

/// Why a session ended in `Terminated`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    /// `max_turns` automatic turns were taken
    TurnLimit,
    /// The cancellation token fired
    Cancelled,
    /// A human answered `Stop` at a suspension point
    HumanStop,
}

/// Terminal backend failure of one turn
#[derive(Debug, Clone, thiserror::Error)]
#[error("role {role} failed on backend {backend} (model {model}): {category}: {source}")]
pub struct TurnFailure {
    pub role: String,
    pub backend: String,
    pub model: String,
    pub category: FailureCategory,
    pub source: BackendError,
}

#[derive(Debug, Clone)]
pub enum SessionOutcome {
    Completed,
    Terminated(TerminationReason),
    Failed(TurnFailure),
}

/// What the caller gets back when a session ends
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub trace_id: String,
    pub outcome: SessionOutcome,
    /// Automatic turns taken (human and executor messages do not count)
    pub turn_count: usize,
    pub transcript: Vec<Message>,
}

impl SessionReport {
    pub fn state(&self) -> SessionState {
        match self.outcome {
            SessionOutcome::Completed => SessionState::Completed,
            SessionOutcome::Terminated(_) => SessionState::Terminated,
            SessionOutcome::Failed(_) => SessionState::Failed,
        }
    }
}

/// Progress notifications for observers
#[derive(Debug, Clone)]
pub enum SessionEvent {
    StateChanged(SessionState),
    MessageAppended(Message),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("a session needs at least one participant")]
    NoParticipants,

    #[error("participant {0} appears more than once")]
    DuplicateParticipant(String),

    #[error("participant name {0} is reserved")]
    ReservedName(String),
}

/// Runs one bounded conversation
pub struct SessionController {
    participants: Vec<Role>,
    options: SessionOptions,
    predicate: Box<dyn TerminationPredicate>,
    executor: Option<Arc<dyn CodeExecutor>>,
    http: reqwest::Client,
    cancel: CancellationToken,
    events: Option<mpsc::UnboundedSender<SessionEvent>>,
    human_tx: mpsc::Sender<HumanPrompt>,
    human_rx: Option<mpsc::Receiver<HumanPrompt>>,
    state: SessionState,
    turn_count: usize,
    transcript: Transcript,
}

impl SessionController {
    /// Create a session among `participants`
    ///
    /// With exactly two participants the first one initiates and the second
    /// answers every turn; otherwise speakers rotate round-robin.
    pub fn new(participants: Vec<Role>, options: SessionOptions) -> Result<Self, SessionError> {
        if participants.is_empty() {
            return Err(SessionError::NoParticipants);
        }
        for (i, role) in participants.iter().enumerate() {
            if role.name() == EXECUTOR_SENDER || role.name() == HUMAN_SENDER {
                return Err(SessionError::ReservedName(role.name().to_string()));
            }
            if participants[..i].iter().any(|r| r.name() == role.name()) {
                return Err(SessionError::DuplicateParticipant(role.name().to_string()));
            }
        }

        let (human_tx, human_rx) = mpsc::channel(1);
        Ok(Self {
            participants,
            options,
            predicate: Box::new(SentinelPredicate::default()),
            executor: None,
            http: reqwest::Client::new(),
            cancel: CancellationToken::new(),
            events: None,
            human_tx,
            human_rx: Some(human_rx),
            state: SessionState::Created,
            turn_count: 0,
            transcript: Transcript::new(),
        })
    }

    /// Replace the default `TERMINATE` sentinel predicate
    pub fn with_termination(mut self, predicate: impl TerminationPredicate + 'static) -> Self {
        self.predicate = Box::new(predicate);
        self
    }

    /// Attach the collaborator that runs code fragments
    pub fn with_executor(mut self, executor: Arc<dyn CodeExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Share an existing HTTP connection pool
    pub fn with_http(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    pub fn with_events(mut self, events: mpsc::UnboundedSender<SessionEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Token that cancels the session at its next suspension point
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Receiver for human-input prompts; available once
    ///
    /// If nobody takes it before `start`, every suspension resolves as `Stop`.
    pub fn take_human_prompts(&mut self) -> Option<mpsc::Receiver<HumanPrompt>> {
        self.human_rx.take()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn participants(&self) -> &[Role] {
        &self.participants
    }

    pub fn options(&self) -> SessionOptions {
        self.options
    }

    /// Roles that will generate turns
    pub fn speaking_roles(&self) -> &[Role] {
        if self.participants.len() == 2 {
            &self.participants[1..]
        } else {
            &self.participants
        }
    }

    /// Ensure every speaking role's model is available before starting
    ///
    /// Backends shared by several roles are checked once.
    pub async fn prepare(
        &self,
        manager: &ModelAvailabilityManager,
        max_wait: Duration,
    ) -> Result<Vec<ModelStatus>, ModelUnavailableError> {
        let mut seen: Vec<(&str, &str)> = Vec::new();
        let mut statuses = Vec::new();

        for role in self.speaking_roles() {
            let backend = role.backend();
            let key = (backend.native_root(), backend.model_name());
            if seen.contains(&key) {
                continue;
            }
            seen.push(key);
            statuses.push(
                manager
                    .ensure_available(backend, backend.model_name(), max_wait)
                    .await?,
            );
        }
        Ok(statuses)
    }

    /// Run the conversation on `task` until it ends
    ///
    /// Consumes the controller; the transcript is handed back in the report.
    pub async fn start(mut self, task: impl Into<String>) -> SessionReport {
        let task = task.into();
        let trace_id = Uuid::now_v7().to_string();
        let names: Vec<&str> = self.participants.iter().map(|r| r.name()).collect();

        let root_span = info_span!(
            "session",
            trace_id = %trace_id,
            participants = ?names,
            max_turns = self.options.max_turns,
            otel.name = "session"
        );

        // Nobody can answer prompts once the receiver is gone
        self.human_rx = None;

        let outcome = async {
            info!(trace_id = %trace_id, "Starting session");
            self.set_state(SessionState::Running);
            self.run_loop(&task, &trace_id).await
        }
        .instrument(root_span)
        .await;

        let (final_state, label) = match &outcome {
            SessionOutcome::Completed => (SessionState::Completed, "completed"),
            SessionOutcome::Terminated(TerminationReason::TurnLimit) => {
                (SessionState::Terminated, "turn_limit")
            }
            SessionOutcome::Terminated(TerminationReason::Cancelled) => {
                (SessionState::Terminated, "cancelled")
            }
            SessionOutcome::Terminated(TerminationReason::HumanStop) => {
                (SessionState::Terminated, "human_stop")
            }
            SessionOutcome::Failed(failure) => {
                warn!(trace_id = %trace_id, error = %failure, "Session failed");
                (SessionState::Failed, "failed")
            }
        };
        self.set_state(final_state);
        SESSION_OUTCOMES.with_label_values(&[label]).inc();
        SESSION_TURNS.observe(self.turn_count as f64);
        info!(
            trace_id = %trace_id,
            outcome = label,
            turns = self.turn_count,
            messages = self.transcript.len(),
            "Session finished"
        );

        SessionReport {
            trace_id,
            outcome,
            turn_count: self.turn_count,
            transcript: self.transcript.into_messages(),
        }
    }

    async fn run_loop(&mut self, task: &str, trace_id: &str) -> SessionOutcome {
        loop {
            if self.turn_count >= self.options.max_turns {
                info!(trace_id = %trace_id, turns = self.turn_count, "Turn limit reached");
                return SessionOutcome::Terminated(TerminationReason::TurnLimit);
            }

            let speaker = self.speaker_for(self.turn_count).clone();

            if self.options.human_input_mode == HumanInputMode::Always {
                let reason = SuspendReason::BeforeTurn {
                    turn: self.turn_count,
                    speaker: speaker.name().to_string(),
                };
                match self.suspend(reason).await {
                    None => return SessionOutcome::Terminated(TerminationReason::Cancelled),
                    Some(HumanInput::Stop) => {
                        return SessionOutcome::Terminated(TerminationReason::HumanStop)
                    }
                    Some(HumanInput::Reply(text)) => {
                        self.append(HUMAN_SENDER, text);
                    }
                    Some(HumanInput::Continue) => {}
                }
            }

            let request = self.build_request(&speaker, task);
            let client = BackendClient::with_http(self.http.clone(), speaker.backend().clone());
            let llm_span = info_span!(
                "llm_call",
                trace_id = %trace_id,
                turn = self.turn_count,
                role = %speaker.name(),
                backend = %speaker.backend().id(),
                model = %speaker.backend().model_name(),
                otel.name = "llm_call"
            );

            let result = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => None,
                r = client.chat(&request, Some(trace_id)).instrument(llm_span) => Some(r),
            };
            let Some(result) = result else {
                info!(trace_id = %trace_id, turn = self.turn_count, "Session cancelled during generation");
                return SessionOutcome::Terminated(TerminationReason::Cancelled);
            };

            let completion = match result {
                Ok(completion) => completion,
                Err(e) => {
                    return SessionOutcome::Failed(TurnFailure {
                        role: speaker.name().to_string(),
                        backend: speaker.backend().id().to_string(),
                        model: speaker.backend().model_name().to_string(),
                        category: e.category(),
                        source: e,
                    })
                }
            };

            info!(
                trace_id = %trace_id,
                turn = self.turn_count,
                role = %speaker.name(),
                attempts = completion.attempts,
                duration_ms = completion.latency.as_secs_f64() * 1000.0,
                "Turn completed"
            );
            self.turn_count += 1;
            let message = self.append(speaker.name(), completion.content);

            if self.predicate.should_terminate(&message) {
                if self.options.human_input_mode != HumanInputMode::Terminate {
                    return SessionOutcome::Completed;
                }
                match self
                    .suspend(SuspendReason::TerminationProposed { message })
                    .await
                {
                    None => return SessionOutcome::Terminated(TerminationReason::Cancelled),
                    Some(HumanInput::Continue) => return SessionOutcome::Completed,
                    Some(HumanInput::Stop) => {
                        return SessionOutcome::Terminated(TerminationReason::HumanStop)
                    }
                    Some(HumanInput::Reply(text)) => {
                        self.append(HUMAN_SENDER, text);
                        continue;
                    }
                }
            }

            if !self.dispatch_fragments(&message, trace_id).await {
                return SessionOutcome::Terminated(TerminationReason::Cancelled);
            }
        }
    }

    fn speaker_for(&self, turn: usize) -> &Role {
        let speakers = self.speaking_roles();
        &speakers[turn % speakers.len()]
    }

    /// System prompt, then the task, then the transcript from the speaker's view
    fn build_request(&self, speaker: &Role, task: &str) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(self.transcript.len() + 2);
        messages.push(ChatMessage::system(speaker.system_prompt()));
        messages.push(ChatMessage::user(task));

        for message in self.transcript.messages() {
            if message.sender == speaker.name() {
                messages.push(ChatMessage::assistant(message.content.clone()));
            } else {
                messages.push(ChatMessage::user(message.content.clone()).with_name(&message.sender));
            }
        }
        messages
    }

    /// Yield to the human; `None` means the session was cancelled meanwhile
    async fn suspend(&self, reason: SuspendReason) -> Option<HumanInput> {
        let (prompt, reply) = HumanPrompt::new(reason);
        if self.human_tx.try_send(prompt).is_err() {
            return Some(HumanInput::Stop);
        }

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            input = reply => Some(input.unwrap_or(HumanInput::Stop)),
        }
    }

    /// Hand code fragments to the executor; `false` if cancelled meanwhile
    async fn dispatch_fragments(&mut self, message: &Message, trace_id: &str) -> bool {
        let Some(executor) = self.executor.clone() else {
            return true;
        };
        let Some(workdir) = self.sandbox_dir() else {
            return true;
        };

        for fragment in extract_code_fragments(&message.content) {
            let exec_span = info_span!(
                "code_execution",
                trace_id = %trace_id,
                language = %fragment.language,
                code_len = fragment.code.len(),
                otel.name = "code_execution"
            );

            let result = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => None,
                r = executor.execute(&fragment, &workdir).instrument(exec_span) => Some(r),
            };
            let Some(result) = result else {
                return false;
            };

            let content = match result {
                Ok(output) => {
                    info!(trace_id = %trace_id, exit_code = output.exit_code, "Code execution finished");
                    CODE_EXECUTIONS
                        .with_label_values(&[fragment.language.as_str(), "ok"])
                        .inc();
                    output.to_message()
                }
                Err(e) => {
                    warn!(trace_id = %trace_id, error = %e, "Code execution failed");
                    CODE_EXECUTIONS
                        .with_label_values(&[fragment.language.as_str(), "error"])
                        .inc();
                    format!("Error: {}", e)
                }
            };
            self.append(EXECUTOR_SENDER, content);
        }
        true
    }

    /// Working directory of the first sandboxed participant
    fn sandbox_dir(&self) -> Option<PathBuf> {
        self.participants
            .iter()
            .find_map(|r| r.execution_policy().workdir())
            .map(|p| p.to_path_buf())
    }

    fn append(&mut self, sender: &str, content: String) -> Message {
        let message = self.transcript.append(sender, content).clone();
        self.emit(SessionEvent::MessageAppended(message.clone()));
        message
    }

    fn set_state(&mut self, state: SessionState) {
        self.state = state;
        self.emit(SessionEvent::StateChanged(state));
    }

    fn emit(&self, event: SessionEvent) {
        if let Some(events) = &self.events {
            // Observers may hang up; the session does not depend on them
            let _ = events.send(event);
        }
    }
}
