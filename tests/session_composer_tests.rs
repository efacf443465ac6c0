mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use chrono::Duration;
use serde_json::json;

use common::{analytics, at, attempt, FakeAnalytics, FakeFocus, FakeInsights};
use practice_scheduler::config::SessionConfig;
use practice_scheduler::providers::InterviewInsights;
use practice_scheduler::services::difficulty_progression::ProgressionDecision;
use practice_scheduler::services::session_composer::{
    CompletedProblem, PerformanceTrend, SessionComposer, SessionOutcome,
};
use practice_scheduler::store::MemoryStore;
use practice_scheduler::types::{
    DifficultyBreakdown, DifficultyLevel, PromotionType, SessionState, UserSettings,
};

struct Harness {
    store: Arc<MemoryStore>,
    analytics: Arc<FakeAnalytics>,
    focus: Arc<FakeFocus>,
    insights: Arc<FakeInsights>,
}

impl Harness {
    fn new(focus: FakeFocus) -> Self {
        Self {
            store: Arc::new(MemoryStore::new()),
            analytics: Arc::new(FakeAnalytics::default()),
            focus: Arc::new(focus),
            insights: Arc::new(FakeInsights::default()),
        }
    }

    fn composer(&self) -> SessionComposer {
        SessionComposer::new(
            self.store.clone(),
            self.store.clone(),
            self.store.clone(),
            self.analytics.clone(),
            self.focus.clone(),
            SessionConfig::default(),
        )
        .with_interview_insights(self.insights.clone())
    }

    fn with_state(&self, state: &SessionState) {
        self.store.insert_raw_session_state(serde_json::to_value(state).unwrap());
    }
}

#[tokio::test]
async fn fresh_learner_gets_default_plan_and_persisted_state() {
    let h = Harness::new(FakeFocus::with(&["array", "graph"], false));

    let plan = h.composer().build_adaptive_session_settings_at(at(2025, 9, 1)).await;

    assert_eq!(plan.session_length, 4);
    assert_eq!(plan.number_of_new_problems, 2);
    assert_eq!(plan.current_difficulty_cap, DifficultyLevel::Easy);
    assert_eq!(plan.focus_tags, vec!["array".to_string(), "graph".to_string()]);
    assert_eq!(plan.progression, ProgressionDecision::Hold);
    assert!(!plan.interview_adjusted);
    let raw = h.store.raw_session_state().unwrap();
    assert_eq!(raw["schema_version"], json!(2));
}

#[tokio::test]
async fn onboarding_limits_length_new_problems_and_focus() {
    let h = Harness::new(FakeFocus::with(&["array", "graph", "dp"], true));
    *h.analytics.sessions.lock() = (0..5).map(|d| analytics(0.95, at(2025, 9, 10 - d))).collect();
    h.store.insert_settings(UserSettings {
        number_of_new_problems: Some(6),
        ..UserSettings::default()
    });

    let plan = h.composer().build_adaptive_session_settings_at(at(2025, 9, 10)).await;

    assert!(plan.is_onboarding);
    assert_eq!(plan.performance.trend, PerformanceTrend::SustainedExcellence);
    assert_eq!(plan.session_length, 4);
    assert_eq!(plan.number_of_new_problems, 4);
    assert_eq!(plan.focus_tags, vec!["array".to_string()]);
}

#[tokio::test]
async fn gap_since_last_attempt_caps_length() {
    let h = Harness::new(FakeFocus::with(&["array"], false));
    let now = at(2025, 9, 20);
    *h.analytics.sessions.lock() = (0..5).map(|d| analytics(0.95, now - Duration::days(10 + d))).collect();

    let uncapped = h.composer().build_adaptive_session_settings_at(now).await;
    assert_eq!(uncapped.session_length, 7);

    h.store.insert_attempt(attempt("p", now - Duration::days(10), true, 4));
    let capped = h.composer().build_adaptive_session_settings_at(now).await;
    assert_eq!(capped.session_length, 5);
}

#[tokio::test]
async fn low_recent_accuracy_caps_length() {
    let h = Harness::new(FakeFocus::with(&["array"], false));
    *h.analytics.sessions.lock() = vec![
        analytics(0.3, at(2025, 9, 3)),
        analytics(0.35, at(2025, 9, 2)),
        analytics(0.3, at(2025, 9, 1)),
    ];
    h.store.insert_settings(UserSettings {
        session_length: json!(10),
        ..UserSettings::default()
    });

    let plan = h.composer().build_adaptive_session_settings_at(at(2025, 9, 3)).await;

    assert_eq!(plan.performance.trend, PerformanceTrend::Struggling);
    assert_eq!(plan.session_length, 5);
}

#[tokio::test]
async fn explicit_preference_caps_adaptive_length() {
    let h = Harness::new(FakeFocus::with(&["array"], false));
    *h.analytics.sessions.lock() = (0..5).map(|d| analytics(0.95, at(2025, 9, 10 - d))).collect();
    h.store.insert_settings(UserSettings {
        session_length: json!(3),
        ..UserSettings::default()
    });

    let plan = h.composer().build_adaptive_session_settings_at(at(2025, 9, 10)).await;
    assert_eq!(plan.session_length, 3);
}

#[tokio::test]
async fn collaborator_failures_degrade_to_defaults() {
    let h = Harness::new(FakeFocus::default());
    h.analytics.fail.store(true, Ordering::SeqCst);
    h.focus.fail.store(true, Ordering::SeqCst);
    h.insights.fail.store(true, Ordering::SeqCst);
    h.store.insert_settings(UserSettings {
        focus_areas: vec!["dp".into(), "greedy".into()],
        ..UserSettings::default()
    });
    h.store.fail_session_state(true);

    let plan = h.composer().build_adaptive_session_settings_at(at(2025, 9, 1)).await;

    assert!(plan.is_onboarding, "no completed sessions counts as onboarding");
    assert_eq!(plan.focus_tags, vec!["dp".to_string()]);
    assert_eq!(plan.session_length, 4);
    assert_eq!(plan.current_difficulty_cap, DifficultyLevel::Easy);
    assert!(h.store.raw_session_state().is_none());
}

#[tokio::test]
async fn unavailable_store_still_yields_a_plan() {
    let h = Harness::new(FakeFocus::with(&["array"], false));
    h.store.set_unavailable(true);

    let plan = h.composer().build_adaptive_session_settings_at(at(2025, 9, 1)).await;

    assert_eq!(plan.session_length, 4);
    assert_eq!(plan.focus_tags, vec!["array".to_string()]);
}

#[tokio::test]
async fn legacy_state_is_migrated_and_rewritten() {
    let h = Harness::new(FakeFocus::with(&["array"], false));
    h.store.insert_raw_session_state(json!({
        "numSessionsCompleted": 7,
        "currentDifficultyMode": "Medium",
        "difficultyTimeStats": { "medium": { "problems": 1, "totalTime": 600.0, "avgTime": 600.0 } }
    }));

    let plan = h.composer().build_adaptive_session_settings_at(at(2025, 9, 1)).await;

    assert_eq!(plan.current_difficulty_cap, DifficultyLevel::Medium);
    assert_eq!(plan.session_state.num_sessions_completed, 7);
    let raw = h.store.raw_session_state().unwrap();
    assert_eq!(raw["schema_version"], json!(2));
    assert_eq!(raw["current_difficulty_cap"], json!("medium"));
    assert!(raw.get("numSessionsCompleted").is_none());
}

#[tokio::test]
async fn per_difficulty_accuracy_drives_promotion() {
    let h = Harness::new(FakeFocus::with(&["array"], false));
    let mut state = SessionState::default();
    state.stats_for_mut(DifficultyLevel::Easy).record(4, 2400.0);
    state.escape_hatches.sessions_at_current_difficulty = 3;
    h.with_state(&state);

    let mut recent = analytics(0.6, at(2025, 9, 1));
    recent
        .difficulty_breakdown
        .insert(DifficultyLevel::Easy, DifficultyBreakdown { attempted: 4, correct: 4 });
    *h.analytics.sessions.lock() = vec![recent];

    let now = at(2025, 9, 2);
    let plan = h.composer().build_adaptive_session_settings_at(now).await;

    assert_eq!(
        plan.progression,
        ProgressionDecision::Promoted {
            from: DifficultyLevel::Easy,
            to: DifficultyLevel::Medium,
            promotion_type: PromotionType::StandardVolumeGate,
        }
    );
    let stored = h.composer().load_session_state().await;
    assert_eq!(stored.current_difficulty_cap, DifficultyLevel::Medium);
    assert_eq!(stored.escape_hatches.sessions_at_current_difficulty, 0);
    assert_eq!(stored.escape_hatches.last_difficulty_promotion, Some(now));
}

#[tokio::test]
async fn overall_accuracy_is_used_without_breakdown() {
    let h = Harness::new(FakeFocus::with(&["array"], false));
    let mut state = SessionState::default();
    state.stats_for_mut(DifficultyLevel::Easy).record(5, 3000.0);
    h.with_state(&state);
    *h.analytics.sessions.lock() = vec![analytics(0.6, at(2025, 9, 1))];

    let plan = h.composer().build_adaptive_session_settings_at(at(2025, 9, 2)).await;

    assert_eq!(plan.progression, ProgressionDecision::Hold);
    assert_eq!(
        plan.session_state.escape_hatches.activated_escape_hatches,
        vec!["accuracy_gate_blocked".to_string()]
    );
}

#[tokio::test]
async fn poor_sessions_demote_the_cap() {
    let h = Harness::new(FakeFocus::with(&["array"], false));
    let mut state = SessionState::default();
    state.current_difficulty_cap = DifficultyLevel::Hard;
    state.escape_hatches.sessions_at_current_difficulty = 3;
    h.with_state(&state);
    *h.analytics.sessions.lock() = vec![
        analytics(0.2, at(2025, 9, 3)),
        analytics(0.4, at(2025, 9, 2)),
        analytics(0.3, at(2025, 9, 1)),
    ];

    let plan = h.composer().build_adaptive_session_settings_at(at(2025, 9, 4)).await;

    assert_eq!(plan.current_difficulty_cap, DifficultyLevel::Medium);
    assert!(matches!(plan.progression, ProgressionDecision::Demoted { .. }));
}

#[tokio::test]
async fn rebuilding_without_a_new_session_keeps_the_demoted_cap() {
    let h = Harness::new(FakeFocus::with(&["array"], false));
    let mut state = SessionState::default();
    state.current_difficulty_cap = DifficultyLevel::Hard;
    state.escape_hatches.sessions_at_current_difficulty = 3;
    h.with_state(&state);
    *h.analytics.sessions.lock() = vec![
        analytics(0.2, at(2025, 9, 3)),
        analytics(0.4, at(2025, 9, 2)),
        analytics(0.3, at(2025, 9, 1)),
    ];
    let now = at(2025, 9, 4);

    let first = h.composer().build_adaptive_session_settings_at(now).await;
    let second = h.composer().build_adaptive_session_settings_at(now).await;

    assert_eq!(first.current_difficulty_cap, DifficultyLevel::Medium);
    assert_eq!(second.current_difficulty_cap, DifficultyLevel::Medium);
    assert_eq!(second.progression, ProgressionDecision::Hold);
}

#[tokio::test]
async fn fresh_cap_is_not_demoted_by_earlier_sessions() {
    let h = Harness::new(FakeFocus::with(&["array"], false));
    let mut state = SessionState::default();
    state.current_difficulty_cap = DifficultyLevel::Hard;
    h.with_state(&state);
    *h.analytics.sessions.lock() = vec![
        analytics(0.2, at(2025, 9, 3)),
        analytics(0.4, at(2025, 9, 2)),
        analytics(0.3, at(2025, 9, 1)),
    ];

    let plan = h.composer().build_adaptive_session_settings_at(at(2025, 9, 4)).await;

    assert_eq!(plan.current_difficulty_cap, DifficultyLevel::Hard);
}

#[tokio::test]
async fn interview_insights_shift_counts_and_narrow_focus() {
    let h = Harness::new(FakeFocus::with(&["array", "graph"], false));
    *h.insights.insights.lock() = InterviewInsights {
        has_data: true,
        session_length_delta: 2,
        new_problems_delta: -5,
        focus_weight: 0.5,
        weak_tags: vec!["graph".into()],
        expansion_tags: Vec::new(),
    };

    let plan = h.composer().build_adaptive_session_settings_at(at(2025, 9, 1)).await;

    assert!(plan.interview_adjusted);
    assert_eq!(plan.session_length, 6);
    assert_eq!(plan.number_of_new_problems, 0);
    assert_eq!(plan.focus_tags, vec!["graph".to_string()]);
}

#[tokio::test]
async fn insights_without_data_are_ignored() {
    let h = Harness::new(FakeFocus::with(&["array"], false));
    *h.insights.insights.lock() = InterviewInsights {
        has_data: false,
        session_length_delta: 3,
        ..InterviewInsights::default()
    };

    let plan = h.composer().build_adaptive_session_settings_at(at(2025, 9, 1)).await;
    assert!(!plan.interview_adjusted);
    assert_eq!(plan.session_length, 4);
}

#[tokio::test]
async fn completed_session_updates_time_stats() {
    let h = Harness::new(FakeFocus::default());
    let outcome = SessionOutcome {
        completed_at: at(2025, 9, 5),
        problems: vec![
            CompletedProblem { difficulty_level: DifficultyLevel::Easy, time_spent_secs: 600 },
            CompletedProblem { difficulty_level: DifficultyLevel::Easy, time_spent_secs: 900 },
            CompletedProblem { difficulty_level: DifficultyLevel::Medium, time_spent_secs: 1200 },
        ],
    };

    let state = h.composer().record_session_completion(&outcome).await.unwrap();

    assert_eq!(state.num_sessions_completed, 1);
    let easy = state.stats_for(DifficultyLevel::Easy);
    assert_eq!(easy.problems, 2);
    assert!((easy.avg_time - 750.0).abs() < 1e-9);
    assert_eq!(state.stats_for(DifficultyLevel::Medium).problems, 1);
    assert_eq!(state.last_session_date, Some(at(2025, 9, 5)));
    assert_eq!(state.escape_hatches.sessions_at_current_difficulty, 1);
    assert_eq!(h.composer().load_session_state().await, state);
}

#[tokio::test]
async fn completion_write_failure_is_reported() {
    let h = Harness::new(FakeFocus::default());
    h.store.fail_session_state(true);
    let outcome = SessionOutcome {
        completed_at: at(2025, 9, 5),
        problems: Vec::new(),
    };
    assert!(h.composer().record_session_completion(&outcome).await.is_err());
}
