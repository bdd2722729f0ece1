use std::fmt;
use std::time::Duration;

use msa_config::AgentLoopConfig;
use msa_llm::LlmClient;
use msa_parser::{parse, ToolCallIntent, TerminalStatus};
use msa_safety::{classify_with_mode, Classification};
use msa_shell::PersistentShell;
use tracing::{info, instrument, warn};

use crate::confirm::{self, ConfirmationDecision};
use crate::templates::{invalid_command_message, observation_message, user_task_message};
use crate::{Conversation, RunMode, RunResult, StepRecord, Ui};

/// Why an iteration produced no Step Record. Carried through so the final
/// idle-budget failure summary names its cause (spec §8 scenario 4 expects
/// the summary to mention empty LLM responses specifically).
#[derive(Debug, Clone)]
enum IdleCause {
    LlmTimeout,
    LlmTransport(String),
    LlmEmptyResponse,
    InvalidCommand(String),
    DangerousCommand,
    Unparseable,
}

impl fmt::Display for IdleCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdleCause::LlmTimeout => write!(f, "the LLM backend timed out"),
            IdleCause::LlmTransport(msg) => write!(f, "an LLM transport error ({msg})"),
            IdleCause::LlmEmptyResponse => write!(f, "empty responses from the LLM"),
            IdleCause::InvalidCommand(reason) => write!(f, "an invalid command ({reason})"),
            IdleCause::DangerousCommand => write!(f, "a dangerous command refused by safe mode"),
            IdleCause::Unparseable => write!(f, "unparseable LLM replies"),
        }
    }
}

pub struct AgentLoop {
    llm: Box<dyn LlmClient>,
    shell: PersistentShell,
    config: AgentLoopConfig,
    shell_command_timeout: Duration,
    mode: RunMode,
    ui: Box<dyn Ui>,
    conversation: Conversation,
}

impl AgentLoop {
    pub fn new(
        llm: Box<dyn LlmClient>,
        shell: PersistentShell,
        config: AgentLoopConfig,
        shell_command_timeout: Duration,
        mode: RunMode,
        ui: Box<dyn Ui>,
        system_prompt: impl Into<String>,
    ) -> Self {
        Self {
            llm,
            shell,
            config,
            shell_command_timeout,
            mode,
            ui,
            conversation: Conversation::new(system_prompt),
        }
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    /// Runs the Agent Loop to completion. `task` seeds a fresh run via the
    /// user-task template; pass `continue_execution = true` with `task =
    /// None` to resume a conversation already populated by a prior call.
    #[instrument(skip(self), fields(mode = ?self.mode))]
    pub async fn run(&mut self, task: Option<String>, continue_execution: bool) -> RunResult {
        match (&task, continue_execution) {
            (Some(task), false) => self.conversation.push_user(user_task_message(task)),
            (None, true) => {}
            _ => {
                return RunResult {
                    success: false,
                    steps: vec![],
                    summary: None,
                    error: Some("No task provided".to_string()),
                }
            }
        }

        let mut steps: Vec<StepRecord> = Vec::new();
        let mut current_step: u32 = 0;
        let mut idle_steps: u32 = 0;

        loop {
            current_step += 1;
            if current_step > self.config.max_steps {
                return RunResult {
                    success: false,
                    steps,
                    summary: None,
                    error: Some("Max steps reached".to_string()),
                };
            }

            let reply = match self
                .llm
                .generate(
                    self.conversation.messages(),
                    0.5,
                    None,
                    Duration::from_secs(self.config.llm_timeout_secs),
                )
                .await
            {
                Ok(reply) => reply,
                Err(err) => {
                    let cause = match err {
                        msa_llm::LlmError::Timeout => IdleCause::LlmTimeout,
                        msa_llm::LlmError::Transport(msg) => IdleCause::LlmTransport(msg),
                        msa_llm::LlmError::EmptyResponse => IdleCause::LlmEmptyResponse,
                    };
                    idle_steps += 1;
                    if let Some(result) = self.check_idle_budget(idle_steps, &steps, &cause) {
                        return result;
                    }
                    continue;
                }
            };

            self.conversation.push_assistant(reply.clone());
            let intent = parse(&reply);
            idle_steps = 0;

            match intent {
                ToolCallIntent::Interaction { message, options, allow_custom_input } => {
                    match self.mode {
                        RunMode::Auto => {
                            self.ui.warn("interaction requested in AUTO mode; ignoring");
                        }
                        RunMode::Interactive { .. } => {
                            let opts = options.unwrap_or_default();
                            let answer = self.ui.ask_interaction(&message, &opts, allow_custom_input).await;
                            match answer {
                                Some(text) => {
                                    self.conversation.push_user(text);
                                    idle_steps = 0;
                                }
                                None => {
                                    return RunResult {
                                        success: false,
                                        steps,
                                        summary: Some("user cancelled interaction".to_string()),
                                        error: None,
                                    }
                                }
                            }
                        }
                    }
                }
                ToolCallIntent::Terminal { status, summary } => {
                    info!(summary, "agent loop terminated by model");
                    return RunResult {
                        success: status == TerminalStatus::Success,
                        steps,
                        summary: Some(summary),
                        error: None,
                    };
                }
                ToolCallIntent::Command { thought: _, command } => {
                    let classification = classify_with_mode(&command, self.config.safe_mode);
                    match classification {
                        Classification::Invalid => {
                            let reason = "command is empty or exceeds the maximum length".to_string();
                            self.conversation.push_user(invalid_command_message(&reason));
                            idle_steps += 1;
                            if let Some(result) =
                                self.check_idle_budget(idle_steps, &steps, &IdleCause::InvalidCommand(reason))
                            {
                                return result;
                            }
                        }
                        Classification::Dangerous => {
                            self.conversation.push_user(invalid_command_message(
                                "refused by safe mode (classified dangerous)",
                            ));
                            idle_steps += 1;
                            if let Some(result) =
                                self.check_idle_budget(idle_steps, &steps, &IdleCause::DangerousCommand)
                            {
                                return result;
                            }
                        }
                        _ => {
                            idle_steps = 0;
                            let step = self.execute_command(&command, classification, steps.len() as u32 + 1).await;
                            self.ui.on_step(&step);
                            let observation = observation_message(&step.command, step.success, &step.stdout, &step.stderr);
                            self.conversation.push_user(observation);
                            steps.push(step);
                        }
                    }
                }
                ToolCallIntent::Unparseable => {
                    idle_steps += 1;
                    if let Some(result) = self.check_idle_budget(idle_steps, &steps, &IdleCause::Unparseable) {
                        return result;
                    }
                }
            }
        }
    }

    async fn execute_command(&mut self, command: &str, classification: Classification, index: u32) -> StepRecord {
        let decision = confirm::decide(classification, self.mode, self.config.safe_mode);
        let confirmed = match decision {
            ConfirmationDecision::NotRequired => true,
            ConfirmationDecision::Required { default_yes } => {
                let prompt = format!("confirm execution of: {command}");
                self.ui.ask_confirmation(&prompt, default_yes).await
            }
        };

        if !confirmed {
            warn!(command, "command execution declined by confirmation policy");
            return StepRecord {
                index,
                command: command.to_string(),
                success: false,
                stdout: String::new(),
                stderr: "User cancelled execution".to_string(),
            };
        }

        let result = self.shell.execute(command, self.shell_command_timeout).await;
        StepRecord {
            index,
            command: command.to_string(),
            success: result.success,
            stdout: result.stdout,
            stderr: result.stderr,
        }
    }

    fn check_idle_budget(&self, idle_steps: u32, steps: &[StepRecord], cause: &IdleCause) -> Option<RunResult> {
        if idle_steps >= self.config.max_idle_steps {
            Some(RunResult {
                success: false,
                steps: steps.to_vec(),
                summary: Some(format!("agent idle: too many unproductive steps in a row ({cause})")),
                error: None,
            })
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use msa_llm::Message;
    use msa_parser::InteractionOption;
    use std::sync::Mutex;

    struct ScriptedLlm {
        replies: Mutex<Vec<Result<String, msa_llm::LlmError>>>,
    }

    impl ScriptedLlm {
        fn new(replies: Vec<Result<String, msa_llm::LlmError>>) -> Self {
            Self { replies: Mutex::new(replies.into_iter().rev().collect()) }
        }
    }

    #[async_trait]
    impl LlmClient for ScriptedLlm {
        async fn generate(
            &self,
            _messages: &[Message],
            _temperature: f32,
            _max_tokens: Option<u32>,
            _timeout: Duration,
        ) -> Result<String, msa_llm::LlmError> {
            self.replies
                .lock()
                .unwrap()
                .pop()
                .unwrap_or(Err(msa_llm::LlmError::EmptyResponse))
        }

        fn token_stats(&self) -> msa_llm::TokenStats {
            msa_llm::TokenStats::default()
        }

        fn reset_token_stats(&self) {}
    }

    struct SilentUi {
        interaction_answer: Option<String>,
        confirm_answer: bool,
    }

    impl Default for SilentUi {
        fn default() -> Self {
            Self { interaction_answer: None, confirm_answer: true }
        }
    }

    #[async_trait]
    impl Ui for SilentUi {
        async fn ask_confirmation(&self, _prompt: &str, _default_yes: bool) -> bool {
            self.confirm_answer
        }

        async fn ask_interaction(
            &self,
            _message: &str,
            _options: &[InteractionOption],
            _allow_custom_input: bool,
        ) -> Option<String> {
            self.interaction_answer.clone()
        }

        fn warn(&self, _message: &str) {}
        fn on_step(&self, _step: &StepRecord) {}
    }

    fn shell() -> PersistentShell {
        PersistentShell::new(Some("/bin/sh".to_string())).unwrap()
    }

    fn config() -> AgentLoopConfig {
        AgentLoopConfig { max_steps: 10, max_idle_steps: 2, llm_timeout_secs: 5, safe_mode: true }
    }

    #[tokio::test]
    async fn simple_success_records_one_step() {
        let llm = Box::new(ScriptedLlm::new(vec![
            Ok(r#"{"command":"echo hi"}"#.to_string()),
            Ok(r#"{"status":"success","summary":"done"}"#.to_string()),
        ]));
        let mut agent = AgentLoop::new(
            llm,
            shell(),
            config(),
            Duration::from_secs(5),
            RunMode::Auto,
            Box::new(SilentUi::default()),
            "system prompt",
        );
        let result = agent.run(Some("print the word hi".to_string()), false).await;
        assert!(result.success);
        assert_eq!(result.summary.as_deref(), Some("done"));
        assert_eq!(result.steps.len(), 1);
        assert_eq!(result.steps[0].command, "echo hi");
        assert!(result.steps[0].success);
        assert_eq!(result.steps[0].stdout.trim(), "hi");
    }

    #[tokio::test]
    async fn dangerous_command_is_refused_and_never_executed() {
        let llm = Box::new(ScriptedLlm::new(vec![
            Ok(r#"{"command":"rm -rf /"}"#.to_string()),
            Ok(r#"{"status":"failed","summary":"blocked"}"#.to_string()),
        ]));
        let mut agent = AgentLoop::new(
            llm,
            shell(),
            config(),
            Duration::from_secs(5),
            RunMode::Auto,
            Box::new(SilentUi::default()),
            "system prompt",
        );
        let result = agent.run(Some("wipe root".to_string()), false).await;
        assert!(!result.success);
        assert!(result.steps.is_empty());
        assert!(agent
            .conversation()
            .messages()
            .iter()
            .any(|m| m.content.contains("命令不合法")));
    }

    #[tokio::test]
    async fn directory_change_persists_across_commands() {
        let tmp = std::env::temp_dir();
        let llm = Box::new(ScriptedLlm::new(vec![
            Ok(format!(r#"{{"command":"cd {}"}}"#, tmp.display())),
            Ok(r#"{"command":"pwd"}"#.to_string()),
            Ok(r#"{"status":"success","summary":"done"}"#.to_string()),
        ]));
        let mut agent = AgentLoop::new(
            llm,
            shell(),
            config(),
            Duration::from_secs(5),
            RunMode::Auto,
            Box::new(SilentUi::default()),
            "system prompt",
        );
        let result = agent.run(Some("cd and pwd".to_string()), false).await;
        assert!(result.success);
        assert_eq!(result.steps.len(), 2);
        assert_eq!(result.steps[1].stdout.trim(), tmp.display().to_string());
    }

    #[tokio::test]
    async fn idle_cap_terminates_after_max_idle_empty_responses() {
        let llm = Box::new(ScriptedLlm::new(vec![
            Err(msa_llm::LlmError::EmptyResponse),
            Err(msa_llm::LlmError::EmptyResponse),
            Err(msa_llm::LlmError::EmptyResponse),
            Err(msa_llm::LlmError::EmptyResponse),
        ]));
        let mut agent = AgentLoop::new(
            llm,
            shell(),
            config(),
            Duration::from_secs(5),
            RunMode::Auto,
            Box::new(SilentUi::default()),
            "system prompt",
        );
        let result = agent.run(Some("anything".to_string()), false).await;
        assert!(!result.success);
        assert!(result.summary.unwrap().contains("empty responses"));
    }

    #[tokio::test]
    async fn idle_steps_reset_on_each_successful_parse() {
        // An invalid command followed by a dangerous command each bump
        // idle_steps by one, but a successful parse in between resets the
        // counter first — with max_idle_steps == 2 neither alone should
        // trip the idle budget.
        let llm = Box::new(ScriptedLlm::new(vec![
            Ok(r#"{"command":""}"#.to_string()),
            Ok(r#"{"command":"rm -rf /"}"#.to_string()),
            Ok(r#"{"status":"success","summary":"done"}"#.to_string()),
        ]));
        let mut agent = AgentLoop::new(
            llm,
            shell(),
            config(),
            Duration::from_secs(5),
            RunMode::Auto,
            Box::new(SilentUi::default()),
            "system prompt",
        );
        let result = agent.run(Some("try a couple of bad commands".to_string()), false).await;
        assert!(result.success);
        assert_eq!(result.summary.as_deref(), Some("done"));
    }

    #[tokio::test]
    async fn interaction_round_trip_in_interactive_mode() {
        let llm = Box::new(ScriptedLlm::new(vec![
            Ok(r#"{"status":"interaction","message":"which dir?","options":[{"text":"/tmp"},{"text":"/var"}],"allow_custom_input":false}"#.to_string()),
            Ok(r#"{"status":"success","summary":"done"}"#.to_string()),
        ]));
        let ui = SilentUi { interaction_answer: Some("/tmp".to_string()), confirm_answer: true };
        let mut agent = AgentLoop::new(
            llm,
            shell(),
            config(),
            Duration::from_secs(5),
            RunMode::Interactive { require_confirm: false },
            Box::new(ui),
            "system prompt",
        );
        let result = agent.run(Some("pick a dir".to_string()), false).await;
        assert!(result.success);
        assert!(agent
            .conversation()
            .messages()
            .iter()
            .any(|m| m.content == "/tmp"));
    }

    #[tokio::test]
    async fn auto_mode_ignores_interaction_and_keeps_conversation_unchanged() {
        let llm = Box::new(ScriptedLlm::new(vec![
            Ok(r#"{"status":"interaction","message":"which dir?","options":[{"text":"/tmp"}],"allow_custom_input":false}"#.to_string()),
            Ok(r#"{"status":"success","summary":"done"}"#.to_string()),
        ]));
        let mut agent = AgentLoop::new(
            llm,
            shell(),
            config(),
            Duration::from_secs(5),
            RunMode::Auto,
            Box::new(SilentUi::default()),
            "system prompt",
        );
        let result = agent.run(Some("pick a dir".to_string()), false).await;
        assert!(result.success);
        let messages = agent.conversation().messages();
        // Only system, task, first assistant reply, second assistant reply —
        // no extra user message from the ignored interaction.
        assert_eq!(messages.len(), 4);
    }
}
