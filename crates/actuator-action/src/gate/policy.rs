//! Auto-execution policy: a pure function of mode, risk and confidence.

use actuator_core::config::GateConfig;
use actuator_core::types::{AutonomyMode, RiskLevel};

use crate::types::GateReason;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyDecision {
    AutoExecute,
    RequireApproval(GateReason),
    /// Autonomy is switched off for this scope.
    Block(GateReason),
}

pub fn evaluate(
    mode: AutonomyMode,
    risk_level: RiskLevel,
    confidence_score: f64,
    config: &GateConfig,
) -> PolicyDecision {
    match mode {
        AutonomyMode::Disabled => PolicyDecision::Block(GateReason::AutonomyDisabled),
        AutonomyMode::ProposeOnly => PolicyDecision::RequireApproval(GateReason::ProposeOnly),
        AutonomyMode::ApprovalRequired => {
            PolicyDecision::RequireApproval(GateReason::ApprovalRequired)
        }
        AutonomyMode::AutoExecute => {
            if !config.auto_risk_levels.contains(&risk_level) {
                PolicyDecision::RequireApproval(GateReason::RiskTooHigh)
            } else if confidence_score.is_nan() || confidence_score < config.min_confidence {
                PolicyDecision::RequireApproval(GateReason::ConfidenceTooLow)
            } else {
                PolicyDecision::AutoExecute
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> GateConfig {
        GateConfig::default()
    }

    #[test]
    fn test_auto_execute_low_risk_confident() {
        assert_eq!(
            evaluate(AutonomyMode::AutoExecute, RiskLevel::Low, 0.8, &cfg()),
            PolicyDecision::AutoExecute
        );
        assert_eq!(
            evaluate(AutonomyMode::AutoExecute, RiskLevel::Minimal, 0.7, &cfg()),
            PolicyDecision::AutoExecute
        );
    }

    #[test]
    fn test_risk_too_high() {
        for risk in [RiskLevel::Medium, RiskLevel::High, RiskLevel::Critical] {
            assert_eq!(
                evaluate(AutonomyMode::AutoExecute, risk, 0.99, &cfg()),
                PolicyDecision::RequireApproval(GateReason::RiskTooHigh)
            );
        }
    }

    #[test]
    fn test_confidence_too_low() {
        assert_eq!(
            evaluate(AutonomyMode::AutoExecute, RiskLevel::Low, 0.69, &cfg()),
            PolicyDecision::RequireApproval(GateReason::ConfidenceTooLow)
        );
        assert_eq!(
            evaluate(AutonomyMode::AutoExecute, RiskLevel::Low, f64::NAN, &cfg()),
            PolicyDecision::RequireApproval(GateReason::ConfidenceTooLow)
        );
    }

    #[test]
    fn test_non_auto_modes() {
        assert_eq!(
            evaluate(AutonomyMode::Disabled, RiskLevel::Low, 1.0, &cfg()),
            PolicyDecision::Block(GateReason::AutonomyDisabled)
        );
        assert_eq!(
            evaluate(AutonomyMode::ProposeOnly, RiskLevel::Low, 1.0, &cfg()),
            PolicyDecision::RequireApproval(GateReason::ProposeOnly)
        );
        assert_eq!(
            evaluate(AutonomyMode::ApprovalRequired, RiskLevel::Minimal, 1.0, &cfg()),
            PolicyDecision::RequireApproval(GateReason::ApprovalRequired)
        );
    }
}
