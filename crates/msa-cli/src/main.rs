mod cli;
mod ui;

use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use msa_agent::{AgentLoop, RunMode};
use msa_config::{AppConfig, LlmBackend};
use msa_llm::LlmClient;
use msa_shell::PersistentShell;

use cli::Cli;
use ui::TerminalUi;

const SYSTEM_PROMPT: &str = r#"You are a command-line agent. You plan and execute shell commands to accomplish the user's task.

Reply with exactly one JSON object per turn, either bare or inside a ```json fenced block:

  {"thought": "...", "command": "..."}
  {"status": "interaction", "message": "...", "options": [{"text": "..."}], "allow_custom_input": false}
  {"status": "success"|"failed", "summary": "..."}

Use the command form to run the next shell command. Use the interaction form only when you
genuinely need the user to choose between options or supply missing information. Use the
terminal form once the task is complete or cannot be completed."#;

fn build_llm_client(config: &msa_config::LlmConfig) -> Box<dyn LlmClient> {
    match config.backend {
        LlmBackend::OpenAiCompat => Box::new(msa_llm::OpenAiCompatClient::new(
            config.openai_base_url.clone(),
            config.openai_model.clone(),
            config.openai_api_key.clone(),
        )),
        LlmBackend::Local => Box::new(msa_llm::LocalModelClient::new(
            config.local_base_url.clone(),
            config.local_model.clone(),
        )),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Cli::parse();
    let config_path = args
        .config
        .unwrap_or_else(|| std::path::PathBuf::from("minishellagent.toml"));
    let config = AppConfig::load_from(&config_path)?;

    let mode = if args.auto {
        RunMode::Auto
    } else {
        RunMode::Interactive { require_confirm: args.require_confirm }
    };

    let llm = build_llm_client(&config.llm);
    let shell = PersistentShell::new(config.shell.shell_override.clone())?;
    let shell_timeout = Duration::from_secs(config.shell.default_command_timeout_secs);

    let mut agent = AgentLoop::new(
        llm,
        shell,
        config.agent_loop,
        shell_timeout,
        mode,
        Box::new(TerminalUi),
        SYSTEM_PROMPT,
    );

    let result = agent.run(args.task, false).await;

    if let Some(summary) = &result.summary {
        println!("{summary}");
    }
    if let Some(error) = &result.error {
        eprintln!("error: {error}");
    }

    std::process::exit(if result.success { 0 } else { 1 });
}
