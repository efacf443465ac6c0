//! Adaptive session composition.
//!
//! [`SessionComposer::build_adaptive_session_settings`] decides the next session's length, number
//! of new problems, difficulty cap and focus tags. It never fails: every collaborator has a
//! default it falls back to, and the failure is logged.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::difficulty_progression::{evaluate_progression, ProgressionDecision, ProgressionRules};
use crate::config::SessionConfig;
use crate::providers::{
    FocusCoordinator, FocusDecision, InterviewInsightProvider, InterviewInsights, PerformanceLevel,
    SessionAnalyticsProvider,
};
use crate::store::migrate::migrate_session_state;
use crate::store::{AttemptStore, SessionStateStore, SettingsStore, StoreError};
use crate::types::{DifficultyLevel, SessionAnalytics, SessionState, UserSettings};

pub const DEFAULT_BASE_SESSION_LENGTH: f64 = 4.0;
const MIN_BASE_SESSION_LENGTH: f64 = 3.0;
const MIN_SESSION_LENGTH: u32 = 3;
const MAX_SESSION_LENGTH: u32 = 8;
const MAX_EXCELLENCE_SESSION_LENGTH: u32 = 12;
const EXCELLENT_ACCURACY: f64 = 0.9;
const SUSTAINED_EXCELLENCE_SESSIONS: u32 = 3;
const IMPROVING_DELTA: f64 = 0.1;
const STRUGGLING_ACCURACY: f64 = 0.5;
/// Sessions a learner counts as onboarding when the focus coordinator is unreachable.
const FALLBACK_ONBOARDING_SESSIONS: u32 = 3;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PerformanceTrend {
    #[default]
    Stable,
    Improving,
    Struggling,
    SustainedExcellence,
}

impl PerformanceTrend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stable => "stable",
            Self::Improving => "improving",
            Self::Struggling => "struggling",
            Self::SustainedExcellence => "sustained_excellence",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "stable" => Some(Self::Stable),
            "improving" => Some(Self::Improving),
            "struggling" => Some(Self::Struggling),
            "sustained_excellence" => Some(Self::SustainedExcellence),
            _ => None,
        }
    }
}

fn unit(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Session length from recent performance.
///
/// ```
/// use practice_scheduler::services::session_composer::{compute_session_length, PerformanceTrend};
///
/// let length = compute_session_length(0.95, 0.9, Some(4.0), PerformanceTrend::SustainedExcellence, 5);
/// assert!((7..=12).contains(&length));
/// ```
pub fn compute_session_length(
    accuracy: f64,
    efficiency: f64,
    user_preferred_base: Option<f64>,
    trend: PerformanceTrend,
    consecutive_excellent: u32,
) -> u32 {
    let accuracy = unit(accuracy);
    let efficiency = unit(efficiency);
    let base = user_preferred_base
        .filter(|b| b.is_finite() && *b > 0.0)
        .unwrap_or(DEFAULT_BASE_SESSION_LENGTH)
        .max(MIN_BASE_SESSION_LENGTH);

    let mut multiplier: f64 = if accuracy < 0.5 {
        0.8
    } else if accuracy < 0.9 {
        1.0
    } else {
        1.25
    };

    match trend {
        PerformanceTrend::Stable if accuracy >= 0.8 => multiplier += 0.05,
        PerformanceTrend::Stable if accuracy >= 0.6 => multiplier += 0.025,
        PerformanceTrend::Stable => {}
        PerformanceTrend::Improving => multiplier += 0.1,
        PerformanceTrend::Struggling => multiplier = (multiplier - 0.2).max(0.6),
        PerformanceTrend::SustainedExcellence => {
            multiplier += (0.15 * consecutive_excellent as f64).min(0.6);
        }
    }

    if efficiency > 0.8 && accuracy > 0.8 {
        multiplier *= 1.1;
    }

    let max = if trend == PerformanceTrend::SustainedExcellence {
        MAX_EXCELLENCE_SESSION_LENGTH
    } else {
        MAX_SESSION_LENGTH
    };
    let length = (base * multiplier).round().max(0.0) as u32;
    length.clamp(MIN_SESSION_LENGTH, max)
}

/// Positive number from a session-length setting. Numeric strings count as numbers.
fn numeric_setting(setting: Option<&Value>) -> Option<f64> {
    let value = match setting? {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    (value.is_finite() && value > 0.0).then_some(value)
}

/// Base length for [`compute_session_length`]: `default_base` for absent, `"auto"`, non-positive
/// or non-numeric settings.
pub fn normalize_session_length_for_calculation(setting: Option<&Value>, default_base: f64) -> f64 {
    numeric_setting(setting).unwrap_or(default_base)
}

/// Caps the adaptive length at the user's explicit preference, never raises it.
pub fn apply_session_length_preference(adaptive_length: u32, preference: Option<&Value>) -> u32 {
    match numeric_setting(preference) {
        Some(pref) if pref < adaptive_length as f64 => {
            let capped = pref.floor().max(1.0) as u32;
            info!(adaptive_length, preferred = capped, "Session length capped by user preference");
            capped
        }
        _ => adaptive_length,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformanceSummary {
    pub accuracy: f64,
    pub efficiency: f64,
    pub trend: PerformanceTrend,
    pub consecutive_excellent: u32,
    pub sessions_considered: usize,
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    (n > 0).then(|| sum / n as f64)
}

/// Summarizes recent sessions, newest first.
pub fn summarize_performance(recent: &[SessionAnalytics]) -> PerformanceSummary {
    let Some(accuracy) = mean(recent.iter().map(|s| unit(s.accuracy))) else {
        return PerformanceSummary {
            accuracy: 0.7,
            efficiency: 0.5,
            trend: PerformanceTrend::Stable,
            consecutive_excellent: 0,
            sessions_considered: 0,
        };
    };
    let efficiency = mean(recent.iter().map(|s| unit(s.efficiency))).unwrap_or(0.5);
    let consecutive_excellent = recent
        .iter()
        .take_while(|s| s.accuracy >= EXCELLENT_ACCURACY)
        .count() as u32;

    let half = recent.len() / 2;
    let improving = half > 0
        && match (
            mean(recent[..half].iter().map(|s| unit(s.accuracy))),
            mean(recent[recent.len() - half..].iter().map(|s| unit(s.accuracy))),
        ) {
            (Some(newer), Some(older)) => newer - older >= IMPROVING_DELTA,
            _ => false,
        };

    let trend = if consecutive_excellent >= SUSTAINED_EXCELLENCE_SESSIONS {
        PerformanceTrend::SustainedExcellence
    } else if accuracy < STRUGGLING_ACCURACY {
        PerformanceTrend::Struggling
    } else if improving {
        PerformanceTrend::Improving
    } else {
        PerformanceTrend::Stable
    };

    PerformanceSummary {
        accuracy,
        efficiency,
        trend,
        consecutive_excellent,
        sessions_considered: recent.len(),
    }
}

/// Accuracy at one difficulty from analytics breakdowns, if any session recorded attempts there.
pub fn accuracy_at_difficulty(recent: &[SessionAnalytics], level: DifficultyLevel) -> Option<f64> {
    let (attempted, correct) = recent
        .iter()
        .filter_map(|s| s.difficulty_breakdown.get(&level))
        .fold((0u32, 0u32), |(a, c), b| (a + b.attempted, c + b.correct.min(b.attempted)));
    (attempted > 0).then(|| correct as f64 / attempted as f64)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdaptiveSessionSettings {
    pub session_length: u32,
    pub number_of_new_problems: u32,
    pub current_difficulty_cap: DifficultyLevel,
    pub focus_tags: Vec<String>,
    pub is_onboarding: bool,
    pub performance_level: PerformanceLevel,
    pub performance: PerformanceSummary,
    pub progression: ProgressionDecision,
    pub interview_adjusted: bool,
    pub session_state: SessionState,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedProblem {
    pub difficulty_level: DifficultyLevel,
    pub time_spent_secs: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionOutcome {
    pub completed_at: DateTime<Utc>,
    pub problems: Vec<CompletedProblem>,
}

pub struct SessionComposer {
    session_state: Arc<dyn SessionStateStore>,
    settings: Arc<dyn SettingsStore>,
    attempts: Arc<dyn AttemptStore>,
    analytics: Arc<dyn SessionAnalyticsProvider>,
    focus: Arc<dyn FocusCoordinator>,
    insights: Option<Arc<dyn InterviewInsightProvider>>,
    config: SessionConfig,
    rules: ProgressionRules,
}

impl SessionComposer {
    pub fn new(
        session_state: Arc<dyn SessionStateStore>,
        settings: Arc<dyn SettingsStore>,
        attempts: Arc<dyn AttemptStore>,
        analytics: Arc<dyn SessionAnalyticsProvider>,
        focus: Arc<dyn FocusCoordinator>,
        config: SessionConfig,
    ) -> Self {
        Self {
            session_state,
            settings,
            attempts,
            analytics,
            focus,
            insights: None,
            config,
            rules: ProgressionRules::default(),
        }
    }

    pub fn with_interview_insights(mut self, provider: Arc<dyn InterviewInsightProvider>) -> Self {
        self.insights = Some(provider);
        self
    }

    pub fn with_progression_rules(mut self, rules: ProgressionRules) -> Self {
        self.rules = rules;
        self
    }

    /// Loads and migrates the stored state. Unreadable state falls back to defaults.
    pub async fn load_session_state(&self) -> SessionState {
        match self.session_state.load_session_state().await {
            Ok(Some(raw)) => migrate_session_state(raw),
            Ok(None) => SessionState::default(),
            Err(e) => {
                warn!(error = %e, "Failed to load session state, using defaults");
                SessionState::default()
            }
        }
    }

    async fn load_settings(&self) -> UserSettings {
        match self.settings.load_settings().await {
            Ok(settings) => settings.unwrap_or_default(),
            Err(e) => {
                warn!(error = %e, "Failed to load user settings, using defaults");
                UserSettings::default()
            }
        }
    }

    pub async fn build_adaptive_session_settings(&self) -> AdaptiveSessionSettings {
        self.build_adaptive_session_settings_at(Utc::now()).await
    }

    pub async fn build_adaptive_session_settings_at(&self, now: DateTime<Utc>) -> AdaptiveSessionSettings {
        let cfg = &self.config;
        let mut state = self.load_session_state().await;
        let settings = self.load_settings().await;

        let recent = match self.analytics.recent_session_analytics(cfg.recent_sessions_window).await {
            Ok(recent) => recent,
            Err(e) => {
                warn!(error = %e, "Session analytics unavailable, composing without history");
                Vec::new()
            }
        };

        let focus = match self.focus.focus_decision(&state, &settings).await {
            Ok(decision) => decision,
            Err(e) => {
                warn!(error = %e, "Focus coordination failed, falling back to user focus areas");
                FocusDecision {
                    active_focus_tags: settings.focus_areas.clone(),
                    is_onboarding: state.num_sessions_completed < FALLBACK_ONBOARDING_SESSIONS,
                    performance_level: PerformanceLevel::default(),
                }
            }
        };

        let performance = summarize_performance(&recent);
        let preferred_base = normalize_session_length_for_calculation(
            Some(&settings.session_length),
            cfg.default_session_length as f64,
        );
        let adaptive = compute_session_length(
            performance.accuracy,
            performance.efficiency,
            Some(preferred_base),
            performance.trend,
            performance.consecutive_excellent,
        );
        let mut session_length = apply_session_length_preference(adaptive, Some(&settings.session_length));
        let mut new_problems = settings.number_of_new_problems.unwrap_or(cfg.default_new_problems);

        let cap = state.current_difficulty_cap;
        let cap_accuracy = accuracy_at_difficulty(&recent, cap).unwrap_or(performance.accuracy);
        let progression = evaluate_progression(&mut state, cap_accuracy, &recent, &self.rules, now);

        let mut focus_tags = dedupe(focus.active_focus_tags.clone());
        let mut interview_adjusted = false;

        if focus.is_onboarding {
            session_length = session_length.min(cfg.onboarding_max_session_length);
            new_problems = new_problems.min(cfg.onboarding_max_new_problems);
            focus_tags.truncate(1);
            debug!(session_length, new_problems, "Onboarding limits applied");
        } else {
            match self.attempts.latest_attempt_date().await {
                Ok(Some(last)) if (now - last).num_days() > cfg.gap_days_threshold => {
                    session_length = session_length.min(cfg.gap_session_cap);
                    debug!(days_since_attempt = (now - last).num_days(), "Session shortened after gap");
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "Could not read last attempt date, skipping gap adjustment"),
            }

            if !recent.is_empty() && performance.accuracy < cfg.low_accuracy_threshold {
                session_length = session_length.min(cfg.low_accuracy_session_cap);
            }

            if let Some(insights) = self.interview_insights().await {
                interview_adjusted = true;
                session_length = shift(session_length, insights.session_length_delta);
                new_problems = shift(new_problems, insights.new_problems_delta);
                focus_tags = adjust_focus_for_insights(focus_tags, &insights);
            }
        }

        if let Err(e) = self.session_state.save_session_state(&state).await {
            warn!(error = %e, "Failed to persist session state");
        }

        info!(
            session_length,
            new_problems,
            difficulty_cap = state.current_difficulty_cap.as_str(),
            trend = performance.trend.as_str(),
            onboarding = focus.is_onboarding,
            focus_tags = focus_tags.len(),
            "Adaptive session settings composed"
        );

        AdaptiveSessionSettings {
            session_length,
            number_of_new_problems: new_problems,
            current_difficulty_cap: state.current_difficulty_cap,
            focus_tags,
            is_onboarding: focus.is_onboarding,
            performance_level: focus.performance_level,
            performance,
            progression,
            interview_adjusted,
            session_state: state,
        }
    }

    async fn interview_insights(&self) -> Option<InterviewInsights> {
        let provider = self.insights.as_ref()?;
        match provider.interview_insights().await {
            Ok(insights) if insights.has_data => Some(insights),
            Ok(_) => None,
            Err(e) => {
                warn!(error = %e, "Interview insights unavailable");
                None
            }
        }
    }

    /// Folds a finished session into the stored state.
    pub async fn record_session_completion(&self, outcome: &SessionOutcome) -> Result<SessionState, StoreError> {
        let mut state = self.load_session_state().await;

        let mut per_level: BTreeMap<DifficultyLevel, (u32, f64)> = BTreeMap::new();
        for problem in &outcome.problems {
            let entry = per_level.entry(problem.difficulty_level).or_insert((0, 0.0));
            entry.0 += 1;
            entry.1 += problem.time_spent_secs as f64;
        }
        for (level, (count, time)) in per_level {
            state.stats_for_mut(level).record(count, time);
        }

        state.num_sessions_completed += 1;
        state.escape_hatches.sessions_at_current_difficulty += 1;
        state.escape_hatches.sessions_without_promotion += 1;
        state.last_session_date = Some(match state.last_session_date {
            Some(previous) if previous > outcome.completed_at => previous,
            _ => outcome.completed_at,
        });

        self.session_state.save_session_state(&state).await?;
        info!(
            sessions_completed = state.num_sessions_completed,
            problems = outcome.problems.len(),
            "Session completion recorded"
        );
        Ok(state)
    }
}

fn shift(value: u32, delta: i32) -> u32 {
    (value as i64 + delta as i64).max(0) as u32
}

fn dedupe(tags: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(tags.len());
    for tag in tags {
        if !out.iter().any(|t| t.eq_ignore_ascii_case(&tag)) {
            out.push(tag);
        }
    }
    out
}

/// Weight below 1 narrows to weak tags, above 1 adds expansion tags.
fn adjust_focus_for_insights(tags: Vec<String>, insights: &InterviewInsights) -> Vec<String> {
    if insights.focus_weight < 1.0 && !insights.weak_tags.is_empty() {
        let narrowed: Vec<String> = tags
            .iter()
            .filter(|t| insights.weak_tags.iter().any(|w| w.eq_ignore_ascii_case(t)))
            .cloned()
            .collect();
        if narrowed.is_empty() {
            dedupe(insights.weak_tags.clone())
        } else {
            narrowed
        }
    } else if insights.focus_weight > 1.0 {
        dedupe(tags.into_iter().chain(insights.expansion_tags.iter().cloned()).collect())
    } else {
        tags
    }
}
