//! Practice habit analytics: streaks, cadence, weekly goals and re-engagement timing.
//!
//! The pure calculators take session completion timestamps. [`HabitAnalyticsGuard`] runs them
//! against the session history provider behind a [`HabitLearningCircuitBreaker`], so a failing
//! history source yields neutral defaults instead of errors.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use super::circuit_breaker::HabitLearningCircuitBreaker;
use crate::providers::{ProviderError, SessionHistoryProvider};
use crate::store::SettingsStore;

const MIN_CADENCE_SESSIONS: usize = 3;
const MAX_CONSISTENT_CV: f64 = 0.5;
const CONFIDENCE_FULL_SAMPLE_GAPS: f64 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CadencePattern {
    Daily,
    EveryOtherDay,
    Weekly,
    Inconsistent,
    InsufficientData,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CadenceAnalysis {
    pub pattern: CadencePattern,
    pub average_gap_days: f64,
    pub std_dev_days: f64,
    /// 0..=1, blending sample size and gap consistency.
    pub confidence: f64,
    pub practice_days: usize,
}

impl CadenceAnalysis {
    fn insufficient(practice_days: usize) -> Self {
        Self {
            pattern: CadencePattern::InsufficientData,
            average_gap_days: 0.0,
            std_dev_days: 0.0,
            confidence: 0.0,
            practice_days,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeeklyGoalProgress {
    pub goal_days: u32,
    pub days_practiced: u32,
    pub days_left_in_week: u32,
    pub completed: bool,
    pub on_track: bool,
    pub percent: f64,
}

impl WeeklyGoalProgress {
    fn empty(goal_days: u32) -> Self {
        Self {
            goal_days,
            days_practiced: 0,
            days_left_in_week: 0,
            completed: false,
            on_track: false,
            percent: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReEngagementTier {
    None,
    Friendly,
    Supportive,
    Gentle,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReEngagementTiming {
    pub days_since_last_session: Option<i64>,
    pub tier: ReEngagementTier,
    pub should_nudge: bool,
    pub message: Option<String>,
}

impl ReEngagementTiming {
    fn quiet(days_since_last_session: Option<i64>) -> Self {
        Self {
            days_since_last_session,
            tier: ReEngagementTier::None,
            should_nudge: false,
            message: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HabitInsights {
    pub streak_days: u32,
    pub cadence: CadenceAnalysis,
    pub weekly_goal: WeeklyGoalProgress,
    pub re_engagement: ReEngagementTiming,
    pub breaker_open: bool,
}

fn practice_days(sessions: &[DateTime<Utc>]) -> BTreeSet<NaiveDate> {
    sessions.iter().map(|s| s.date_naive()).collect()
}

/// Consecutive practice days ending today, or ending yesterday when today has no session yet.
pub fn calculate_streak(sessions: &[DateTime<Utc>], today: NaiveDate) -> u32 {
    let days = practice_days(sessions);
    let mut cursor = if days.contains(&today) {
        today
    } else {
        today - Duration::days(1)
    };

    let mut streak = 0;
    while days.contains(&cursor) {
        streak += 1;
        cursor -= Duration::days(1);
    }
    streak
}

pub fn analyze_cadence(sessions: &[DateTime<Utc>]) -> CadenceAnalysis {
    let days: Vec<NaiveDate> = practice_days(sessions).into_iter().collect();
    if days.len() < MIN_CADENCE_SESSIONS {
        return CadenceAnalysis::insufficient(days.len());
    }

    let gaps: Vec<f64> = days.windows(2).map(|w| (w[1] - w[0]).num_days() as f64).collect();
    let n = gaps.len() as f64;
    let mean = gaps.iter().sum::<f64>() / n;
    let variance = gaps.iter().map(|g| (g - mean).powi(2)).sum::<f64>() / n;
    let std_dev = variance.sqrt();
    let cv = if mean > 0.0 { std_dev / mean } else { 0.0 };

    let pattern = if cv > MAX_CONSISTENT_CV {
        CadencePattern::Inconsistent
    } else if mean <= 1.5 {
        CadencePattern::Daily
    } else if mean <= 3.0 {
        CadencePattern::EveryOtherDay
    } else if (5.0..=9.0).contains(&mean) {
        CadencePattern::Weekly
    } else {
        CadencePattern::Inconsistent
    };

    let sample_weight = (n / CONFIDENCE_FULL_SAMPLE_GAPS).min(1.0);
    let consistency = 1.0 - cv.min(1.0);
    CadenceAnalysis {
        pattern,
        average_gap_days: mean,
        std_dev_days: std_dev,
        confidence: (0.4 * sample_weight + 0.6 * consistency).clamp(0.0, 1.0),
        practice_days: days.len(),
    }
}

/// Progress toward practicing on `goal_days` distinct days of the current Monday-based week.
pub fn weekly_goal_progress(sessions: &[DateTime<Utc>], today: NaiveDate, goal_days: u32) -> WeeklyGoalProgress {
    let goal_days = goal_days.clamp(1, 7);
    let offset = today.weekday().num_days_from_monday();
    let week_start = today - Duration::days(offset as i64);

    let days_practiced = practice_days(sessions)
        .range(week_start..=today)
        .count() as u32;
    let practiced_today = practice_days(sessions).contains(&today);
    let days_left_in_week = 7 - offset - u32::from(practiced_today);
    let remaining = goal_days.saturating_sub(days_practiced);

    WeeklyGoalProgress {
        goal_days,
        days_practiced,
        days_left_in_week,
        completed: remaining == 0,
        on_track: remaining <= days_left_in_week,
        percent: (days_practiced as f64 / goal_days as f64).min(1.0),
    }
}

pub fn re_engagement_timing(sessions: &[DateTime<Utc>], today: NaiveDate) -> ReEngagementTiming {
    let Some(last) = sessions.iter().map(|s| s.date_naive()).max() else {
        return ReEngagementTiming::quiet(None);
    };
    let days = (today - last).num_days().max(0);

    let (tier, message) = if days >= 30 {
        (
            ReEngagementTier::Gentle,
            "No pressure. Whenever you're ready, a short session will help you pick things back up.",
        )
    } else if days >= 14 {
        (
            ReEngagementTier::Supportive,
            "It's been a couple of weeks. A quick review keeps what you learned fresh.",
        )
    } else if days >= 7 {
        (
            ReEngagementTier::Friendly,
            "Your problems miss you! Ready for a quick session?",
        )
    } else {
        return ReEngagementTiming::quiet(Some(days));
    };

    ReEngagementTiming {
        days_since_last_session: Some(days),
        tier,
        should_nudge: true,
        message: Some(message.to_string()),
    }
}

pub struct HabitAnalyticsGuard {
    breaker: Arc<HabitLearningCircuitBreaker>,
    history: Arc<dyn SessionHistoryProvider>,
    weekly_goal_days: u32,
    settings: Option<Arc<dyn SettingsStore>>,
}

impl HabitAnalyticsGuard {
    pub fn new(
        breaker: Arc<HabitLearningCircuitBreaker>,
        history: Arc<dyn SessionHistoryProvider>,
        weekly_goal_days: u32,
    ) -> Self {
        Self {
            breaker,
            history,
            weekly_goal_days,
            settings: None,
        }
    }

    /// Reads the weekly goal from stored settings, keeping the constructor value as the fallback.
    pub fn with_settings(mut self, settings: Arc<dyn SettingsStore>) -> Self {
        self.settings = Some(settings);
        self
    }

    async fn goal_days(&self) -> u32 {
        let Some(settings) = &self.settings else {
            return self.weekly_goal_days;
        };
        match settings.load_settings().await {
            Ok(Some(stored)) => stored.weekly_goal_days,
            Ok(None) => self.weekly_goal_days,
            Err(e) => {
                warn!(error = %e, fallback = self.weekly_goal_days, "Failed to load weekly goal, using default");
                self.weekly_goal_days
            }
        }
    }

    pub fn breaker(&self) -> &HabitLearningCircuitBreaker {
        &self.breaker
    }

    async fn sessions(&self) -> Result<Vec<DateTime<Utc>>, ProviderError> {
        self.history.completed_session_dates().await
    }

    pub async fn current_streak(&self, now: DateTime<Utc>) -> u32 {
        let today = now.date_naive();
        let streak = self
            .breaker
            .safe_execute(
                "streak",
                || async { Ok::<_, ProviderError>(calculate_streak(&self.sessions().await?, today)) },
                || 0,
            )
            .await;
        debug!(streak_days = streak, "Computed practice streak");
        streak
    }

    pub async fn cadence(&self) -> CadenceAnalysis {
        let cadence = self
            .breaker
            .safe_execute(
                "cadence",
                || async { Ok::<_, ProviderError>(analyze_cadence(&self.sessions().await?)) },
                || CadenceAnalysis::insufficient(0),
            )
            .await;
        debug!(
            pattern = ?cadence.pattern,
            average_gap_days = cadence.average_gap_days,
            confidence = cadence.confidence,
            "Analyzed practice cadence"
        );
        cadence
    }

    pub async fn weekly_goal(&self, now: DateTime<Utc>) -> WeeklyGoalProgress {
        let today = now.date_naive();
        let goal = self.goal_days().await;
        let progress = self
            .breaker
            .safe_execute(
                "weekly_goal",
                || async { Ok::<_, ProviderError>(weekly_goal_progress(&self.sessions().await?, today, goal)) },
                || WeeklyGoalProgress::empty(goal),
            )
            .await;
        debug!(
            goal_days = progress.goal_days,
            days_practiced = progress.days_practiced,
            on_track = progress.on_track,
            "Computed weekly goal progress"
        );
        progress
    }

    pub async fn re_engagement(&self, now: DateTime<Utc>) -> ReEngagementTiming {
        let today = now.date_naive();
        let timing = self
            .breaker
            .safe_execute(
                "re_engagement",
                || async { Ok::<_, ProviderError>(re_engagement_timing(&self.sessions().await?, today)) },
                || ReEngagementTiming::quiet(None),
            )
            .await;
        if timing.should_nudge {
            debug!(
                tier = ?timing.tier,
                days_since_last_session = ?timing.days_since_last_session,
                "Re-engagement nudge due"
            );
        }
        timing
    }

    /// All habit signals in one snapshot.
    pub async fn habit_insights(&self, now: DateTime<Utc>) -> HabitInsights {
        let streak_days = self.current_streak(now).await;
        let cadence = self.cadence().await;
        let weekly_goal = self.weekly_goal(now).await;
        let re_engagement = self.re_engagement(now).await;
        HabitInsights {
            streak_days,
            cadence,
            weekly_goal,
            re_engagement,
            breaker_open: self.breaker.get_status().is_open,
        }
    }
}
