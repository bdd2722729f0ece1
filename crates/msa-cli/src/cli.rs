use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(
    name = "minishellagent",
    version,
    about = "An LLM-driven shell agent that plans, emits, and executes commands"
)]
pub struct Cli {
    /// Task description for the agent to carry out.
    pub task: Option<String>,

    /// Run without any confirmation prompts or interaction dialogs.
    #[arg(long)]
    pub auto: bool,

    /// In interactive mode, also confirm non-risky commands (default: yes).
    #[arg(long)]
    pub require_confirm: bool,

    /// Path to a TOML config file (defaults to `minishellagent.toml` in cwd).
    #[arg(long)]
    pub config: Option<PathBuf>,
}
