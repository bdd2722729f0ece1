//! Agent Loop — the bounded, tool-using reasoning cycle that ties the LLM
//! Client, Safety Oracle, Persistent Shell, and Response Parser together.
//!
//! Everything outside this crate sees only [`AgentLoop::run`] plus the
//! [`Ui`] trait it drives for confirmation prompts and interaction
//! dialogs — terminal rendering itself is the caller's problem.

mod confirm;
mod run;
mod templates;

pub use confirm::ConfirmationDecision;

use async_trait::async_trait;
use msa_llm::{Message, Role};
use msa_parser::InteractionOption;
use thiserror::Error;

pub use run::AgentLoop;

/// One entry in the Conversation, re-exported from `msa-llm` so the loop and
/// the LLM client agree on a single wire shape.
pub type ConversationMessage = Message;

/// Append-only message sequence. The first entry is always `system`;
/// `reset` clears and immediately re-seeds it.
#[derive(Debug, Clone)]
pub struct Conversation {
    messages: Vec<Message>,
}

impl Conversation {
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::system(system_prompt)],
        }
    }

    pub fn reset(&mut self, system_prompt: impl Into<String>) {
        self.messages.clear();
        self.messages.push(Message::system(system_prompt));
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.messages.push(Message::user(content));
    }

    pub fn push_assistant(&mut self, content: impl Into<String>) {
        self.messages.push(Message::assistant(content));
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// `{index, command, success, stdout, stderr}` — one per executed command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepRecord {
    pub index: u32,
    pub command: String,
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

/// Outcome of a full `AgentLoop::run` call.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RunResult {
    pub success: bool,
    pub steps: Vec<StepRecord>,
    pub summary: Option<String>,
    pub error: Option<String>,
}

/// Run mode: AUTO never prompts and never honors Interaction intents;
/// Interactive honors both, with `require_confirm` gating non-risky
/// commands too.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Auto,
    Interactive { require_confirm: bool },
}

/// Errors that escape the loop's own recovery handling and abort the run.
/// Everything recoverable (LLM failures, parse failures, rejected commands,
/// shell failures) is represented as data in [`RunResult`]/[`StepRecord`],
/// never as this type.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("fatal agent error: {0}")]
    Fatal(String),
}

/// Terminal/UI collaborator the loop drives for confirmation prompts and
/// interaction dialogs. The loop itself performs no terminal I/O.
#[async_trait]
pub trait Ui: Send + Sync {
    /// Asks a yes/no confirmation; `default_yes` is the answer assumed when
    /// the collaborator has no better signal (e.g. non-interactive UI).
    async fn ask_confirmation(&self, prompt: &str, default_yes: bool) -> bool;

    /// Presents `message` (and `options`, if any) to the user and returns
    /// their chosen/typed text, or `None` if they provided no input.
    async fn ask_interaction(
        &self,
        message: &str,
        options: &[InteractionOption],
        allow_custom_input: bool,
    ) -> Option<String>;

    fn warn(&self, message: &str);

    fn on_step(&self, step: &StepRecord);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversation_always_starts_with_system() {
        let convo = Conversation::new("you are an agent");
        assert_eq!(convo.messages()[0].role, Role::System);
        assert_eq!(convo.len(), 1);
    }

    #[test]
    fn reset_reseeds_system_message() {
        let mut convo = Conversation::new("first prompt");
        convo.push_user("hi");
        convo.reset("second prompt");
        assert_eq!(convo.len(), 1);
        assert_eq!(convo.messages()[0].content, "second prompt");
    }
}
