//! Safety Oracle — a pure predicate over candidate shell command strings.
//!
//! `classify` never executes anything and never allocates beyond the regex
//! matches themselves; it is safe to call from any context, including from
//! inside a synchronous hot loop.

use std::sync::OnceLock;

use regex::{Regex, RegexBuilder};

/// Classification returned by the oracle. Variants are ordered the same way
/// `classify` checks them: the first match wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Invalid,
    Dangerous,
    HighRisk,
    Sudo,
    InjectionSuspected,
    Safe,
}

const MAX_COMMAND_BYTES: usize = 10_000;

const DANGEROUS_LITERALS: &[&str] = &[
    "rm -rf /",
    "rm -rf /{bin,usr,etc,var,sys,proc,boot,root}",
    "mkfs",
    "fdisk",
    "parted",
    "dd if=",
    "dd of=",
    ":(){:|:&};:",
    "chmod -R 777 /",
    "chmod -R 000 /",
    "chown -R",
    "systemctl stop",
    "systemctl disable",
    "iptables -F",
    "iptables -X",
    "export PATH=",
    "unset PATH",
];

const HIGH_RISK_SUBSTRINGS: &[&str] = &["rm -rf", "mkfs", "fdisk", "dd if=", "dd of=", "format", "wipe"];

const SUDO_DANGEROUS_TARGETS: &[&str] = &["rm", "mkfs", "fdisk", "dd", "chmod", "chown", "format", "wipe"];

const SYSTEM_ROOT_PATHS: &[&str] = &[
    "/bin", "/usr", "/etc", "/var", "/sys", "/proc", "/boot", "/root", "/sbin", "/lib",
];

const INJECTION_SEPARATORS: &[&str] = &[";", "&&", "||", "`", "$("];

fn dangerous_regexes() -> &'static [Regex] {
    static SET: OnceLock<Vec<Regex>> = OnceLock::new();
    SET.get_or_init(|| {
        [
            r"rm\s+-rf\s+/[^/]",
            r"rm\s+-rf\s+/(bin|usr|etc|var|sys|proc|boot|root)",
            r"mkfs\.?\w*\s+/",
            r"dd\s+if=.*\s+of=/dev/",
            r"chmod\s+[0-7]{3}\s+/",
            r"sudo\s+(rm|mkfs|fdisk|dd|chmod|chown)",
            r":\(\)\{.*:\|.*&.*\};:",
        ]
        .iter()
        .map(|pat| {
            RegexBuilder::new(pat)
                .case_insensitive(true)
                .build()
                .expect("static dangerous pattern is valid regex")
        })
        .collect()
    })
}

/// Normalizes runs of whitespace to a single space for literal comparison,
/// so e.g. `"rm   -rf   /"` is recognized the same as `"rm -rf /"`.
fn normalize_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn contains_literal_tolerant(haystack_normalized: &str, literal: &str) -> bool {
    let literal_normalized = normalize_whitespace(literal).to_lowercase();
    haystack_normalized.contains(&literal_normalized)
}

/// `rm -r[f] <args>` where one argument is (or starts with) a system-root path.
fn rm_targets_system_root(command: &str) -> bool {
    static RM_R: OnceLock<Regex> = OnceLock::new();
    let re = RM_R.get_or_init(|| {
        RegexBuilder::new(r"rm\s+-(r|rf|fr)\b")
            .case_insensitive(true)
            .build()
            .expect("static pattern is valid regex")
    });
    if !re.is_match(command) {
        return false;
    }
    let lower = command.to_lowercase();
    SYSTEM_ROOT_PATHS
        .iter()
        .any(|root| lower.contains(&format!(" {root}")) || lower.contains(&format!("\t{root}")))
}

fn is_dangerous(command: &str, normalized_lower: &str) -> bool {
    if DANGEROUS_LITERALS
        .iter()
        .any(|lit| contains_literal_tolerant(normalized_lower, lit))
    {
        return true;
    }
    if dangerous_regexes().iter().any(|re| re.is_match(command)) {
        return true;
    }
    if rm_targets_system_root(command) {
        return true;
    }
    sudo_target(normalized_lower)
        .map(|target| SUDO_DANGEROUS_TARGETS.contains(&target.as_str()))
        .unwrap_or(false)
}

/// If `normalized_lower` starts with `sudo <word>`, returns `<word>`.
fn sudo_target(normalized_lower: &str) -> Option<String> {
    let rest = normalized_lower.strip_prefix("sudo ")?;
    rest.split_whitespace().next().map(|w| w.to_string())
}

fn is_high_risk(normalized_lower: &str) -> bool {
    HIGH_RISK_SUBSTRINGS
        .iter()
        .any(|s| normalized_lower.contains(&s.to_lowercase()))
}

fn is_sudo(normalized_lower: &str) -> bool {
    normalized_lower.starts_with("sudo ") || normalized_lower == "sudo"
}

fn is_injection_suspected(command: &str) -> bool {
    let lower = command.to_lowercase();
    for sep in INJECTION_SEPARATORS {
        let mut start = 0;
        while let Some(idx) = lower[start..].find(sep) {
            let after = &lower[start + idx + sep.len()..];
            if after.trim_start().starts_with("rm") {
                return true;
            }
            start += idx + sep.len();
        }
    }
    false
}

/// Classify a candidate command. Never executes the command.
pub fn classify(command: &str) -> Classification {
    if command.trim().is_empty() || command.len() > MAX_COMMAND_BYTES {
        return Classification::Invalid;
    }

    let normalized = normalize_whitespace(command);
    let normalized_lower = normalized.to_lowercase();

    if is_dangerous(command, &normalized_lower) {
        return Classification::Dangerous;
    }
    if is_high_risk(&normalized_lower) {
        return Classification::HighRisk;
    }
    if is_sudo(&normalized_lower) {
        return Classification::Sudo;
    }
    if is_injection_suspected(command) {
        return Classification::InjectionSuspected;
    }
    Classification::Safe
}

/// Classify honoring the `safe_mode` toggle: when disabled, everything but
/// `Invalid` is reported `Safe` (the oracle still rejects malformed input).
pub fn classify_with_mode(command: &str, safe_mode: bool) -> Classification {
    if !safe_mode {
        return if command.trim().is_empty() || command.len() > MAX_COMMAND_BYTES {
            Classification::Invalid
        } else {
            Classification::Safe
        };
    }
    classify(command)
}
