//! Conversation loop driver.
//!
//! Runs one orchestration request as an explicit state machine:
//!
//! ```text
//! Initializing → Iterating → (ToolCallsPending → Iterating)* → Terminated
//! ```
//!
//! Every produced message is appended to the history and sent as a frame in
//! the same order. The pool built for the request is shut down on every exit
//! path, including fatal errors and a dropped receiver.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::inference::client::CompletionModel;
use crate::inference::types::{ChatMessage, ToolCallRequest};
use crate::mcp_client::connection::Connector;
use crate::mcp_client::pool::{ServerPool, DEFAULT_CONNECT_TIMEOUT};
use crate::mcp_client::registry::ToolRegistry;

use super::errors::AgentError;
use super::executor::ToolExecutor;
use super::types::{ChatEvent, ChatRequest};

// ─── Budget ──────────────────────────────────────────────────────────────────

/// Default number of model passes per request.
pub const DEFAULT_MAX_ITERATIONS: u32 = 5;

/// Upper bound on model passes for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IterationBudget {
    max_passes: u32,
}

impl IterationBudget {
    /// A budget of `max_passes` passes; zero is raised to one.
    pub fn new(max_passes: u32) -> Self {
        Self {
            max_passes: max_passes.max(1),
        }
    }

    pub fn max_passes(&self) -> u32 {
        self.max_passes
    }

    /// Whether no pass may follow pass number `pass` (1-based).
    pub fn is_exhausted_after(&self, pass: u32) -> bool {
        pass >= self.max_passes
    }
}

impl Default for IterationBudget {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ITERATIONS)
    }
}

/// Text of the synthetic assistant message sent when the budget runs out.
pub fn budget_warning(passes: u32) -> String {
    format!(
        "Stopped after {passes} model passes: the tool-call iteration limit was reached \
         before a final answer was produced. The tool results above may be incomplete."
    )
}

// ─── States ──────────────────────────────────────────────────────────────────

/// How a request ended.
#[derive(Debug)]
pub enum Termination {
    /// The model answered without requesting tools.
    Completed,
    /// The pass budget ran out while the model still requested tools.
    BudgetExhausted { passes: u32 },
    /// A request-fatal error; an `error` frame was sent instead of `done`.
    Fatal(AgentError),
    /// The receiver went away; nothing further was sent.
    Cancelled,
}

enum LoopState {
    Iterating { pass: u32 },
    ToolCallsPending { pass: u32, calls: Vec<ToolCallRequest> },
    Terminated(Termination),
}

// ─── ConversationDriver ──────────────────────────────────────────────────────

/// Drives one request from descriptors and history to a terminal frame.
#[derive(Clone)]
pub struct ConversationDriver {
    model: Arc<dyn CompletionModel>,
    connector: Arc<dyn Connector>,
    budget: IterationBudget,
    connect_timeout: Duration,
}

impl ConversationDriver {
    pub fn new(model: Arc<dyn CompletionModel>, connector: Arc<dyn Connector>) -> Self {
        Self {
            model,
            connector,
            budget: IterationBudget::default(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    pub fn with_budget(mut self, budget: IterationBudget) -> Self {
        self.budget = budget;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Run the request to completion, sending frames to `events`.
    pub async fn run(&self, request: ChatRequest, events: mpsc::Sender<ChatEvent>) -> Termination {
        if request.messages.is_empty() {
            let termination = Termination::Fatal(AgentError::InvalidRequest {
                reason: "at least one message is required".into(),
            });
            finish(&termination, &events).await;
            return termination;
        }

        // Initializing
        let (mut pool, _failures) = ServerPool::initialize_all(
            self.connector.as_ref(),
            &request.servers,
            self.connect_timeout,
        )
        .await;

        let termination = if pool.is_empty() && !request.servers.is_empty() {
            Termination::Fatal(AgentError::NoServersAvailable)
        } else {
            let registry = ToolRegistry::new(&pool);
            self.drive(&pool, &registry, request.messages, &events).await
        };

        // Terminated
        finish(&termination, &events).await;
        pool.shutdown().await;
        termination
    }

    async fn drive(
        &self,
        pool: &ServerPool,
        registry: &ToolRegistry,
        mut history: Vec<ChatMessage>,
        events: &mpsc::Sender<ChatEvent>,
    ) -> Termination {
        let executor = ToolExecutor::new(registry, pool);
        let mut state = LoopState::Iterating { pass: 1 };

        loop {
            state = match state {
                LoopState::Iterating { pass } => {
                    self.iterate(pass, registry, &mut history, events).await
                }
                LoopState::ToolCallsPending { pass, calls } => {
                    self.run_tools(pass, &calls, &executor, &mut history, events)
                        .await
                }
                LoopState::Terminated(termination) => return termination,
            };
        }
    }

    /// One model pass: complete, append, emit, inspect.
    async fn iterate(
        &self,
        pass: u32,
        registry: &ToolRegistry,
        history: &mut Vec<ChatMessage>,
        events: &mpsc::Sender<ChatEvent>,
    ) -> LoopState {
        tracing::debug!(pass, messages = history.len(), tools = registry.len(), "model pass");

        let reply = tokio::select! {
            biased;
            _ = events.closed() => return LoopState::Terminated(Termination::Cancelled),
            reply = self.model.complete(history.as_slice(), registry.catalog()) => reply,
        };

        let reply = match reply {
            Ok(reply) => reply,
            Err(e) => {
                tracing::error!(pass, error = %e, "model request failed");
                return LoopState::Terminated(Termination::Fatal(e.into()));
            }
        };

        let calls = reply.requested_tool_calls().to_vec();
        history.push(reply.clone());
        if !emit(events, ChatEvent::message(reply)).await {
            return LoopState::Terminated(Termination::Cancelled);
        }

        if calls.is_empty() {
            LoopState::Terminated(Termination::Completed)
        } else {
            tracing::info!(pass, tool_calls = calls.len(), "model requested tools");
            LoopState::ToolCallsPending { pass, calls }
        }
    }

    /// Execute one batch, append and emit each result, then check the budget.
    async fn run_tools(
        &self,
        pass: u32,
        calls: &[ToolCallRequest],
        executor: &ToolExecutor<'_>,
        history: &mut Vec<ChatMessage>,
        events: &mpsc::Sender<ChatEvent>,
    ) -> LoopState {
        let results = tokio::select! {
            biased;
            _ = events.closed() => return LoopState::Terminated(Termination::Cancelled),
            results = executor.execute(calls) => results,
        };

        for result in results {
            let message = result.into_message();
            history.push(message.clone());
            if !emit(events, ChatEvent::message(message)).await {
                return LoopState::Terminated(Termination::Cancelled);
            }
        }

        if self.budget.is_exhausted_after(pass) {
            tracing::warn!(passes = pass, "iteration budget exhausted");
            let warning = ChatMessage::assistant(budget_warning(pass));
            history.push(warning.clone());
            if !emit(events, ChatEvent::message(warning)).await {
                return LoopState::Terminated(Termination::Cancelled);
            }
            return LoopState::Terminated(Termination::BudgetExhausted { passes: pass });
        }

        LoopState::Iterating { pass: pass + 1 }
    }
}

/// Send one frame. `false` means the receiver is gone.
async fn emit(events: &mpsc::Sender<ChatEvent>, event: ChatEvent) -> bool {
    events.send(event).await.is_ok()
}

/// Send the terminal frame for `termination`, if any.
async fn finish(termination: &Termination, events: &mpsc::Sender<ChatEvent>) {
    match termination {
        Termination::Completed | Termination::BudgetExhausted { .. } => {
            tracing::info!(?termination, "request finished");
            emit(events, ChatEvent::Done).await;
        }
        Termination::Fatal(err) => {
            tracing::error!(error = %err, "request failed");
            emit(events, ChatEvent::error(err.to_string())).await;
        }
        Termination::Cancelled => {
            tracing::info!("request cancelled by receiver");
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
