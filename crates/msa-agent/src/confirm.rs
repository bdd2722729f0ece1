//! Confirmation Policy (spec §4.6) as a pure function over a command's
//! Safety Oracle classification and the active run mode. `Dangerous` is
//! handled by the caller before this is ever consulted — it is refused
//! outright and never reaches a confirmation prompt.

use msa_safety::Classification;

use crate::RunMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmationDecision {
    NotRequired,
    Required { default_yes: bool },
}

pub fn decide(classification: Classification, mode: RunMode, safe_mode: bool) -> ConfirmationDecision {
    match classification {
        Classification::Sudo => ConfirmationDecision::Required { default_yes: false },
        Classification::HighRisk if safe_mode => ConfirmationDecision::Required { default_yes: false },
        _ => match mode {
            RunMode::Interactive { require_confirm: true } => {
                ConfirmationDecision::Required { default_yes: true }
            }
            _ => ConfirmationDecision::NotRequired,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sudo_always_requires_confirmation_defaulting_no() {
        for mode in [RunMode::Auto, RunMode::Interactive { require_confirm: false }] {
            assert_eq!(
                decide(Classification::Sudo, mode, true),
                ConfirmationDecision::Required { default_yes: false }
            );
        }
    }

    #[test]
    fn high_risk_requires_confirmation_only_in_safe_mode() {
        assert_eq!(
            decide(Classification::HighRisk, RunMode::Auto, true),
            ConfirmationDecision::Required { default_yes: false }
        );
        assert_eq!(
            decide(Classification::HighRisk, RunMode::Auto, false),
            ConfirmationDecision::NotRequired
        );
    }

    #[test]
    fn auto_mode_never_requires_normal_confirmation() {
        assert_eq!(
            decide(Classification::Safe, RunMode::Auto, true),
            ConfirmationDecision::NotRequired
        );
    }

    #[test]
    fn interactive_require_confirm_gates_normal_commands_default_yes() {
        assert_eq!(
            decide(
                Classification::Safe,
                RunMode::Interactive { require_confirm: true },
                true
            ),
            ConfirmationDecision::Required { default_yes: true }
        );
    }

    #[test]
    fn interactive_without_require_confirm_skips_normal_commands() {
        assert_eq!(
            decide(
                Classification::InjectionSuspected,
                RunMode::Interactive { require_confirm: false },
                true
            ),
            ConfirmationDecision::NotRequired
        );
    }
}
