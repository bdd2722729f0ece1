//! Response Parser — extracts a single structured Tool-Call Intent out of
//! free-form LLM reply text that may contain prose, code fences, or a bare
//! JSON object.
//!
//! The parser is total: every input maps to exactly one of
//! `{Command, Interaction, Terminal, Unparseable}`. It never partially binds
//! fields from a malformed or mistyped JSON object — a candidate object
//! either yields a complete intent or is skipped in favor of the next `{`.

use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub struct InteractionOption {
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalStatus {
    Success,
    Failed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ToolCallIntent {
    Command {
        thought: Option<String>,
        command: String,
    },
    Interaction {
        message: String,
        options: Option<Vec<InteractionOption>>,
        allow_custom_input: bool,
    },
    Terminal {
        status: TerminalStatus,
        summary: String,
    },
    Unparseable,
}

const TERMINATION_KEYWORDS: &[&str] = &["完成", "完结", "finished", "done", "总结", "summary"];

/// Parse a raw assistant reply into a Tool-Call Intent. Deterministic and
/// idempotent: calling this twice on the same input always yields equal
/// results.
pub fn parse(raw: &str) -> ToolCallIntent {
    if let Some(json_payload) = extract_fenced_json(raw) {
        if let Ok(value) = serde_json::from_str::<Value>(&json_payload) {
            if let Some(intent) = build_intent(&value, raw) {
                return intent;
            }
        }
    }

    if let Some(intent) = scan_braces(raw) {
        return intent;
    }

    if contains_termination_keyword(raw) {
        return ToolCallIntent::Terminal {
            status: TerminalStatus::Success,
            summary: raw.to_string(),
        };
    }

    ToolCallIntent::Unparseable
}

fn extract_fenced_json(raw: &str) -> Option<String> {
    const OPEN: &str = "```json";
    let start = raw.find(OPEN)?;
    let content_start = start + OPEN.len();
    let rel_end = raw[content_start..].find("```")?;
    Some(raw[content_start..content_start + rel_end].trim().to_string())
}

/// Scans `raw` for balanced `{ ... }` spans, respecting string literals and
/// backslash escapes, attempting a JSON parse + intent build on each. The
/// first span that yields a complete intent wins; a span that parses as JSON
/// but doesn't build a complete intent is skipped in favor of the next `{`.
fn scan_braces(raw: &str) -> Option<ToolCallIntent> {
    let mut search_from = 0usize;
    while let Some(rel_start) = raw[search_from..].find('{') {
        let start = search_from + rel_start;
        match find_balanced_end(raw, start) {
            Some(end) => {
                let candidate = &raw[start..=end];
                if let Ok(value) = serde_json::from_str::<Value>(candidate) {
                    if let Some(intent) = build_intent(&value, raw) {
                        return Some(intent);
                    }
                }
                search_from = start + 1;
            }
            None => break,
        }
    }
    None
}

/// Returns the byte index of the `}` that balances the `{` at `start`,
/// tracking string literals and backslash escapes so braces inside strings
/// don't affect depth.
fn find_balanced_end(s: &str, start: usize) -> Option<usize> {
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escaped = false;

    for (idx, c) in s[start..].char_indices() {
        let abs = start + idx;
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(abs);
                }
            }
            _ => {}
        }
    }
    None
}

/// Builds a Tool-Call Intent from a parsed JSON value. Returns `None` when
/// the value isn't an object, or is an object that matches none of the three
/// recognized shapes with well-typed fields — callers should try the next
/// candidate span rather than treat this as a binding match.
fn build_intent(value: &Value, raw: &str) -> Option<ToolCallIntent> {
    let obj = value.as_object()?;
    let status = obj.get("status").and_then(Value::as_str);

    if status == Some("interaction") {
        let message = obj
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| raw.to_string());
        let options = obj.get("options").and_then(Value::as_array).map(|arr| {
            arr.iter()
                .filter_map(|entry| {
                    entry
                        .get("text")
                        .and_then(Value::as_str)
                        .map(|s| InteractionOption { text: s.to_string() })
                })
                .collect::<Vec<_>>()
        });
        let allow_custom_input = obj
            .get("allow_custom_input")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        return Some(ToolCallIntent::Interaction {
            message,
            options,
            allow_custom_input,
        });
    }

    if status == Some("success") || status == Some("failed") {
        let summary = obj
            .get("summary")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_default();
        let status = if status == Some("success") {
            TerminalStatus::Success
        } else {
            TerminalStatus::Failed
        };
        return Some(ToolCallIntent::Terminal { status, summary });
    }

    if let Some(command) = obj.get("command").and_then(Value::as_str) {
        let thought = obj
            .get("thought")
            .and_then(Value::as_str)
            .map(str::to_string);
        return Some(ToolCallIntent::Command {
            thought,
            command: command.to_string(),
        });
    }

    None
}

fn contains_termination_keyword(raw: &str) -> bool {
    let lower = raw.to_lowercase();
    TERMINATION_KEYWORDS
        .iter()
        .any(|kw| lower.contains(&kw.to_lowercase()))
}
