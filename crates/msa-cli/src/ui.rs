//! Plain stdin/stdout implementation of `msa_agent::Ui` — no coloring, no
//! TUI framework; rendering is explicitly out of scope for the core.

use std::io::{self, Write};

use async_trait::async_trait;
use msa_agent::{StepRecord, Ui};
use msa_parser::InteractionOption;

pub struct TerminalUi;

#[async_trait]
impl Ui for TerminalUi {
    async fn ask_confirmation(&self, prompt: &str, default_yes: bool) -> bool {
        let suffix = if default_yes { "[Y/n]" } else { "[y/N]" };
        print!("{prompt} {suffix} ");
        let _ = io::stdout().flush();

        let mut line = String::new();
        if io::stdin().read_line(&mut line).is_err() {
            return default_yes;
        }
        let answer = line.trim().to_lowercase();
        match answer.as_str() {
            "" => default_yes,
            "y" | "yes" => true,
            "n" | "no" => false,
            _ => default_yes,
        }
    }

    async fn ask_interaction(
        &self,
        message: &str,
        options: &[InteractionOption],
        allow_custom_input: bool,
    ) -> Option<String> {
        println!("{message}");
        for (idx, option) in options.iter().enumerate() {
            println!("  {}. {}", idx + 1, option.text);
        }
        if allow_custom_input || options.is_empty() {
            println!("(enter free text, or a number above)");
        }
        print!("> ");
        let _ = io::stdout().flush();

        let mut line = String::new();
        if io::stdin().read_line(&mut line).is_err() {
            return None;
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return None;
        }
        if let Ok(choice) = trimmed.parse::<usize>() {
            if choice >= 1 && choice <= options.len() {
                return Some(options[choice - 1].text.clone());
            }
        }
        Some(trimmed.to_string())
    }

    fn warn(&self, message: &str) {
        eprintln!("warning: {message}");
    }

    fn on_step(&self, step: &StepRecord) {
        println!("[step {}] {}", step.index, step.command);
        if !step.stdout.is_empty() {
            println!("{}", step.stdout);
        }
        if !step.success && !step.stderr.is_empty() {
            eprintln!("{}", step.stderr);
        }
    }
}
