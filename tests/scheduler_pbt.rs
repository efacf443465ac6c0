//! Property-based tests for the review scheduler, decay and welcome-back rules.
//!
//! Invariants covered:
//! - Box levels stay within 1..=8 and stability never drops below its floor
//! - The next review always lands after the latest attempt
//! - Replaying history is deterministic and independent of input order
//! - Three failures in a row drop exactly one box
//! - Decay never raises a box and is monotonic in the gap
//! - Welcome-back classification follows the 30/90/365 day boundaries

mod common;

use chrono::Duration;
use proptest::prelude::*;

use common::{at, attempt, problem};
use practice_scheduler::services::decay::decayed_box_level;
use practice_scheduler::services::recalibration::{get_welcome_back_strategy, WelcomeBackKind};
use practice_scheduler::types::{Attempt, DifficultyLevel, MAX_BOX_LEVEL, MIN_BOX_LEVEL, MIN_STABILITY};
use practice_scheduler::{calculate_leitner_box, reassess_box_level};

// ============================================================================
// Arbitrary Generators
// ============================================================================

fn arb_level() -> impl Strategy<Value = DifficultyLevel> {
    prop_oneof![
        Just(DifficultyLevel::Easy),
        Just(DifficultyLevel::Medium),
        Just(DifficultyLevel::Hard),
    ]
}

/// Attempts on distinct, strictly increasing dates.
fn arb_history() -> impl Strategy<Value = Vec<Attempt>> {
    prop::collection::vec((1i64..=20, any::<bool>(), 1u8..=10), 1..25).prop_map(|steps| {
        let mut date = at(2025, 1, 1);
        steps
            .into_iter()
            .map(|(gap_hours, success, difficulty)| {
                date += Duration::hours(gap_hours * 7);
                attempt("p", date, success, difficulty)
            })
            .collect()
    })
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #[test]
    fn incremental_updates_respect_bounds(
        start_box in 1u8..=8,
        level in arb_level(),
        history in arb_history(),
        use_time_limits in any::<bool>(),
    ) {
        let mut current = problem("p", start_box, level, &[]);
        for a in &history {
            current = calculate_leitner_box(current, a, use_time_limits);
            prop_assert!((MIN_BOX_LEVEL..=MAX_BOX_LEVEL).contains(&current.box_level));
            prop_assert!(current.stability >= MIN_STABILITY);
            let last = current.last_attempt_date.unwrap();
            prop_assert!(current.review_schedule.unwrap() > last);
        }
        prop_assert_eq!(current.attempt_stats.total as usize, history.len());
    }

    #[test]
    fn replay_ignores_input_order(
        start_box in 1u8..=8,
        (history, shuffled) in arb_history().prop_flat_map(|h| (Just(h.clone()), Just(h).prop_shuffle())),
    ) {
        let p = problem("p", start_box, DifficultyLevel::Medium, &[]);
        let first = reassess_box_level(&p, &history);
        prop_assert_eq!(&first, &reassess_box_level(&p, &history));
        prop_assert_eq!(&first, &reassess_box_level(&p, &shuffled));
        prop_assert!((MIN_BOX_LEVEL..=MAX_BOX_LEVEL).contains(&first.box_level));
        prop_assert!(first.review_schedule.unwrap() >= first.last_attempt_date.unwrap() + Duration::days(1));
    }

    #[test]
    fn three_failures_in_a_row_drop_one_box(start_box in 2u8..=8, difficulty in 1u8..=10) {
        let mut current = problem("p", start_box, DifficultyLevel::Easy, &[]);
        for day in 1..=3 {
            current = calculate_leitner_box(current, &attempt("p", at(2025, 6, day), false, difficulty), false);
        }
        prop_assert_eq!(current.box_level, start_box - 1);
        prop_assert!(current.cooldown_status);
        prop_assert_eq!(current.consecutive_failures, 0);
        let last = current.last_attempt_date.unwrap();
        prop_assert!(current.review_schedule.unwrap() - last >= Duration::days(3));
    }

    #[test]
    fn decay_is_monotonic_and_floored(box_level in 1u8..=8, days in 0i64..2000, extra in 0i64..500) {
        let shorter = decayed_box_level(box_level, days, 30);
        let longer = decayed_box_level(box_level, days + extra, 30);
        prop_assert!(shorter <= box_level);
        prop_assert!(longer <= shorter);
        prop_assert!(longer >= MIN_BOX_LEVEL);
    }

    #[test]
    fn welcome_back_kind_follows_gap(days in -10i64..1000) {
        let expected = match days {
            d if d < 30 => WelcomeBackKind::Normal,
            d if d < 90 => WelcomeBackKind::GentleRecal,
            d if d < 365 => WelcomeBackKind::ModerateRecal,
            _ => WelcomeBackKind::MajorRecal,
        };
        let strategy = get_welcome_back_strategy(days);
        prop_assert_eq!(strategy.kind, expected);
        prop_assert!(strategy.days_since_last_use >= 0);
        prop_assert_eq!(strategy.forces_adaptive, expected == WelcomeBackKind::GentleRecal);
        if expected != WelcomeBackKind::Normal {
            prop_assert_eq!(strategy.options.iter().filter(|o| o.recommended).count(), 1);
        }
    }
}
