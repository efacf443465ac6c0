//! Difficulty cap progression between Easy, Medium and Hard.
//!
//! The cap moves one level at a time. Promotion needs either enough problems at a good accuracy
//! (volume gate) or simply many problems at the cap (stagnation escape hatch). Medium and Hard
//! drop one level after a run of poor sessions.

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::info;

use crate::types::{DifficultyLevel, PromotionType, SessionAnalytics, SessionState};

pub const VOLUME_GATE_PROBLEMS: u32 = 4;
pub const VOLUME_GATE_ACCURACY: f64 = 0.8;
pub const ESCAPE_HATCH_PROBLEMS: u32 = 8;
pub const DEMOTION_WINDOW: usize = 3;
pub const DEMOTION_ACCURACY: f64 = 0.5;

pub const ACCURACY_GATE_BLOCKED: &str = "accuracy_gate_blocked";

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ProgressionDecision {
    Hold,
    Promoted {
        from: DifficultyLevel,
        to: DifficultyLevel,
        promotion_type: PromotionType,
    },
    Demoted {
        from: DifficultyLevel,
        to: DifficultyLevel,
    },
}

#[derive(Debug, Error)]
pub enum TransitionError {
    #[error("invalid difficulty transition from {from:?} to {to:?}")]
    InvalidTransition { from: DifficultyLevel, to: DifficultyLevel },
}

/// One step up or down.
pub fn can_transition(from: DifficultyLevel, to: DifficultyLevel) -> bool {
    from.harder() == Some(to) || from.easier() == Some(to)
}

/// Drives transitions of the difficulty cap held in a [`SessionState`].
#[derive(Debug)]
pub struct DifficultyStateMachine<'a> {
    state: &'a mut SessionState,
}

impl<'a> DifficultyStateMachine<'a> {
    pub fn new(state: &'a mut SessionState) -> Self {
        Self { state }
    }

    pub fn current(&self) -> DifficultyLevel {
        self.state.current_difficulty_cap
    }

    pub fn promote(
        &mut self,
        promotion_type: PromotionType,
        now: DateTime<Utc>,
    ) -> Result<DifficultyLevel, TransitionError> {
        let from = self.current();
        let to = from.harder().ok_or(TransitionError::InvalidTransition { from, to: from })?;
        self.enter(to)?;

        let hatches = &mut self.state.escape_hatches;
        hatches.last_difficulty_promotion = Some(now);
        hatches.current_promotion_type = Some(promotion_type);
        hatches.sessions_without_promotion = 0;
        hatches.activated_escape_hatches.clear();
        Ok(to)
    }

    pub fn demote(&mut self) -> Result<DifficultyLevel, TransitionError> {
        let from = self.current();
        let to = from.easier().ok_or(TransitionError::InvalidTransition { from, to: from })?;
        self.enter(to)?;
        Ok(to)
    }

    fn enter(&mut self, to: DifficultyLevel) -> Result<(), TransitionError> {
        let from = self.current();
        if !can_transition(from, to) {
            return Err(TransitionError::InvalidTransition { from, to });
        }
        self.state.current_difficulty_cap = to;
        self.state.escape_hatches.sessions_at_current_difficulty = 0;
        *self.state.stats_for_mut(to) = Default::default();
        Ok(())
    }
}

/// Thresholds for [`evaluate_progression`].
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressionRules {
    pub volume_gate_problems: u32,
    pub volume_gate_accuracy: f64,
    pub escape_hatch_problems: u32,
    pub demotion_window: usize,
    pub demotion_accuracy: f64,
}

impl Default for ProgressionRules {
    fn default() -> Self {
        Self {
            volume_gate_problems: VOLUME_GATE_PROBLEMS,
            volume_gate_accuracy: VOLUME_GATE_ACCURACY,
            escape_hatch_problems: ESCAPE_HATCH_PROBLEMS,
            demotion_window: DEMOTION_WINDOW,
            demotion_accuracy: DEMOTION_ACCURACY,
        }
    }
}

/// Only sessions completed since the cap last moved count toward a demotion, so re-evaluating
/// without a new session never drops the cap twice.
fn should_demote(state: &SessionState, recent: &[SessionAnalytics], rules: &ProgressionRules) -> bool {
    let sessions_at_cap = state.escape_hatches.sessions_at_current_difficulty as usize;
    if state.current_difficulty_cap == DifficultyLevel::Easy
        || recent.len() < rules.demotion_window
        || sessions_at_cap < rules.demotion_window
    {
        return false;
    }
    recent
        .iter()
        .take(rules.demotion_window)
        .all(|s| s.accuracy < rules.demotion_accuracy)
}

/// Evaluates demotion, then promotion, and applies at most one transition to `state`.
///
/// `cap_accuracy` is the learner's accuracy on problems at the current cap; `recent` is newest
/// first.
pub fn evaluate_progression(
    state: &mut SessionState,
    cap_accuracy: f64,
    recent: &[SessionAnalytics],
    rules: &ProgressionRules,
    now: DateTime<Utc>,
) -> ProgressionDecision {
    let from = state.current_difficulty_cap;

    if should_demote(state, recent, rules) {
        let mut machine = DifficultyStateMachine::new(state);
        if let Ok(to) = machine.demote() {
            info!(from = from.as_str(), to = to.as_str(), "Difficulty cap demoted");
            return ProgressionDecision::Demoted { from, to };
        }
    }

    if from.harder().is_none() {
        return ProgressionDecision::Hold;
    }

    let problems_at_cap = state.stats_for(from).problems;
    let promotion_type = if problems_at_cap >= rules.volume_gate_problems && cap_accuracy >= rules.volume_gate_accuracy {
        Some(PromotionType::StandardVolumeGate)
    } else if problems_at_cap >= rules.escape_hatch_problems {
        Some(PromotionType::StagnationEscapeHatch)
    } else {
        if problems_at_cap >= rules.volume_gate_problems {
            let hatches = &mut state.escape_hatches.activated_escape_hatches;
            if !hatches.iter().any(|h| h == ACCURACY_GATE_BLOCKED) {
                hatches.push(ACCURACY_GATE_BLOCKED.to_string());
            }
        }
        None
    };

    let Some(promotion_type) = promotion_type else {
        return ProgressionDecision::Hold;
    };

    let mut machine = DifficultyStateMachine::new(state);
    match machine.promote(promotion_type, now) {
        Ok(to) => {
            info!(
                from = from.as_str(),
                to = to.as_str(),
                promotion_type = promotion_type.as_str(),
                problems_at_cap,
                cap_accuracy,
                "Difficulty cap promoted"
            );
            ProgressionDecision::Promoted {
                from,
                to,
                promotion_type,
            }
        }
        Err(_) => ProgressionDecision::Hold,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn analytics(accuracy: f64) -> SessionAnalytics {
        SessionAnalytics {
            session_id: "s".to_string(),
            completed_at: Utc::now(),
            accuracy,
            efficiency: 0.5,
            difficulty_breakdown: BTreeMap::new(),
        }
    }

    fn state_at(cap: DifficultyLevel, problems: u32) -> SessionState {
        let mut state = SessionState::default();
        state.current_difficulty_cap = cap;
        state.stats_for_mut(cap).record(problems, problems as f64 * 600.0);
        state.escape_hatches.sessions_at_current_difficulty = 6;
        state
    }

    #[test]
    fn transitions_move_one_step() {
        assert!(can_transition(DifficultyLevel::Easy, DifficultyLevel::Medium));
        assert!(can_transition(DifficultyLevel::Hard, DifficultyLevel::Medium));
        assert!(!can_transition(DifficultyLevel::Easy, DifficultyLevel::Hard));
        assert!(!can_transition(DifficultyLevel::Medium, DifficultyLevel::Medium));
    }

    #[test]
    fn volume_gate_promotes_with_good_accuracy() {
        let mut state = state_at(DifficultyLevel::Easy, 4);
        state.escape_hatches.activated_escape_hatches.push(ACCURACY_GATE_BLOCKED.to_string());
        let now = Utc::now();

        let decision = evaluate_progression(&mut state, 0.85, &[], &ProgressionRules::default(), now);

        assert_eq!(
            decision,
            ProgressionDecision::Promoted {
                from: DifficultyLevel::Easy,
                to: DifficultyLevel::Medium,
                promotion_type: PromotionType::StandardVolumeGate,
            }
        );
        assert_eq!(state.current_difficulty_cap, DifficultyLevel::Medium);
        assert_eq!(state.escape_hatches.sessions_at_current_difficulty, 0);
        assert_eq!(state.escape_hatches.last_difficulty_promotion, Some(now));
        assert!(state.escape_hatches.activated_escape_hatches.is_empty());
    }

    #[test]
    fn low_accuracy_blocks_volume_gate_until_escape_hatch() {
        let mut state = state_at(DifficultyLevel::Easy, 5);
        let rules = ProgressionRules::default();

        assert_eq!(evaluate_progression(&mut state, 0.3, &[], &rules, Utc::now()), ProgressionDecision::Hold);
        assert_eq!(state.escape_hatches.activated_escape_hatches, vec![ACCURACY_GATE_BLOCKED.to_string()]);

        state.stats_for_mut(DifficultyLevel::Easy).record(3, 1800.0);
        let decision = evaluate_progression(&mut state, 0.3, &[], &rules, Utc::now());
        assert!(matches!(
            decision,
            ProgressionDecision::Promoted {
                promotion_type: PromotionType::StagnationEscapeHatch,
                ..
            }
        ));
        assert_eq!(
            state.escape_hatches.current_promotion_type,
            Some(PromotionType::StagnationEscapeHatch)
        );
    }

    #[test]
    fn three_poor_sessions_demote_medium() {
        let mut state = state_at(DifficultyLevel::Medium, 10);
        let recent = [analytics(0.2), analytics(0.4), analytics(0.3), analytics(0.9)];

        let decision = evaluate_progression(&mut state, 0.9, &recent, &ProgressionRules::default(), Utc::now());

        assert_eq!(
            decision,
            ProgressionDecision::Demoted {
                from: DifficultyLevel::Medium,
                to: DifficultyLevel::Easy,
            }
        );
        assert_eq!(state.escape_hatches.sessions_at_current_difficulty, 0);
    }

    #[test]
    fn easy_never_demotes_and_hard_never_promotes() {
        let poor = [analytics(0.1), analytics(0.1), analytics(0.1)];
        let mut easy = state_at(DifficultyLevel::Easy, 0);
        assert_eq!(
            evaluate_progression(&mut easy, 0.1, &poor, &ProgressionRules::default(), Utc::now()),
            ProgressionDecision::Hold
        );

        let mut hard = state_at(DifficultyLevel::Hard, 20);
        assert_eq!(
            evaluate_progression(&mut hard, 1.0, &[], &ProgressionRules::default(), Utc::now()),
            ProgressionDecision::Hold
        );
    }

    #[test]
    fn one_good_session_in_window_prevents_demotion() {
        let mut state = state_at(DifficultyLevel::Hard, 1);
        let recent = [analytics(0.2), analytics(0.6), analytics(0.3)];
        assert_eq!(
            evaluate_progression(&mut state, 0.2, &recent, &ProgressionRules::default(), Utc::now()),
            ProgressionDecision::Hold
        );
    }

    #[test]
    fn demotion_waits_for_sessions_at_the_new_cap() {
        let mut state = state_at(DifficultyLevel::Hard, 0);
        let poor = [analytics(0.2), analytics(0.4), analytics(0.3)];
        let rules = ProgressionRules::default();

        let first = evaluate_progression(&mut state, 0.2, &poor, &rules, Utc::now());
        assert!(matches!(first, ProgressionDecision::Demoted { to: DifficultyLevel::Medium, .. }));

        let second = evaluate_progression(&mut state, 0.2, &poor, &rules, Utc::now());
        assert_eq!(second, ProgressionDecision::Hold);
        assert_eq!(state.current_difficulty_cap, DifficultyLevel::Medium);

        state.escape_hatches.sessions_at_current_difficulty = 2;
        assert_eq!(evaluate_progression(&mut state, 0.2, &poor, &rules, Utc::now()), ProgressionDecision::Hold);
        state.escape_hatches.sessions_at_current_difficulty = 3;
        assert!(matches!(
            evaluate_progression(&mut state, 0.2, &poor, &rules, Utc::now()),
            ProgressionDecision::Demoted { to: DifficultyLevel::Easy, .. }
        ));
    }
}
