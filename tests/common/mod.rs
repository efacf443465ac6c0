#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use parking_lot::Mutex;

use practice_scheduler::providers::{
    ActivityTracker, FocusCoordinator, FocusDecision, InterviewInsightProvider, InterviewInsights,
    ProviderError, SessionAnalyticsProvider, SessionHistoryProvider,
};
use practice_scheduler::types::{
    Attempt, DifficultyLevel, Problem, SessionAnalytics, SessionState, UserSettings,
};

pub fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap()
}

pub fn problem(id: &str, box_level: u8, level: DifficultyLevel, tags: &[&str]) -> Problem {
    let mut p = Problem::new(id, level, tags.iter().map(|t| t.to_string()).collect());
    p.box_level = box_level;
    p.stability = 4.0;
    p
}

pub fn attempt(problem_id: &str, date: DateTime<Utc>, success: bool, difficulty: u8) -> Attempt {
    Attempt {
        id: format!("{problem_id}-{}", date.timestamp_micros()),
        problem_id: problem_id.to_string(),
        success,
        difficulty,
        time_spent_secs: 900,
        attempt_date: date,
        session_id: None,
    }
}

pub fn analytics(accuracy: f64, completed_at: DateTime<Utc>) -> SessionAnalytics {
    SessionAnalytics {
        session_id: format!("s-{}", completed_at.timestamp()),
        completed_at,
        accuracy,
        efficiency: 0.6,
        difficulty_breakdown: Default::default(),
    }
}

fn unavailable(what: &str) -> ProviderError {
    ProviderError::Unavailable(format!("{what} offline"))
}

#[derive(Default)]
pub struct FakeAnalytics {
    pub sessions: Mutex<Vec<SessionAnalytics>>,
    pub fail: AtomicBool,
}

impl FakeAnalytics {
    pub fn with(sessions: Vec<SessionAnalytics>) -> Self {
        Self {
            sessions: Mutex::new(sessions),
            fail: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl SessionAnalyticsProvider for FakeAnalytics {
    async fn recent_session_analytics(&self, limit: usize) -> Result<Vec<SessionAnalytics>, ProviderError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(unavailable("analytics"));
        }
        Ok(self.sessions.lock().iter().take(limit).cloned().collect())
    }
}

#[derive(Default)]
pub struct FakeFocus {
    pub decision: Mutex<FocusDecision>,
    pub fail: AtomicBool,
}

impl FakeFocus {
    pub fn with(tags: &[&str], is_onboarding: bool) -> Self {
        Self {
            decision: Mutex::new(FocusDecision {
                active_focus_tags: tags.iter().map(|t| t.to_string()).collect(),
                is_onboarding,
                performance_level: Default::default(),
            }),
            fail: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl FocusCoordinator for FakeFocus {
    async fn focus_decision(
        &self,
        _state: &SessionState,
        _settings: &UserSettings,
    ) -> Result<FocusDecision, ProviderError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(unavailable("focus"));
        }
        Ok(self.decision.lock().clone())
    }
}

#[derive(Default)]
pub struct FakeInsights {
    pub insights: Mutex<InterviewInsights>,
    pub fail: AtomicBool,
}

#[async_trait]
impl InterviewInsightProvider for FakeInsights {
    async fn interview_insights(&self) -> Result<InterviewInsights, ProviderError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(unavailable("interview insights"));
        }
        Ok(self.insights.lock().clone())
    }
}

#[derive(Default)]
pub struct FakeActivity {
    pub days: AtomicI64,
    pub marks: AtomicU32,
    pub fail_marks: AtomicBool,
}

impl FakeActivity {
    pub fn away_for(days: i64) -> Self {
        let tracker = Self::default();
        tracker.days.store(days, Ordering::SeqCst);
        tracker
    }
}

#[async_trait]
impl ActivityTracker for FakeActivity {
    async fn days_since_last_use(&self, _now: DateTime<Utc>) -> Result<i64, ProviderError> {
        Ok(self.days.load(Ordering::SeqCst))
    }

    async fn mark_active(&self, _now: DateTime<Utc>) -> Result<(), ProviderError> {
        if self.fail_marks.load(Ordering::SeqCst) {
            return Err(unavailable("activity"));
        }
        self.marks.fetch_add(1, Ordering::SeqCst);
        self.days.store(0, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeHistory {
    pub dates: Mutex<Vec<DateTime<Utc>>>,
    pub fail: AtomicBool,
    pub calls: AtomicU32,
}

impl FakeHistory {
    /// One session a day on each of the `days` days ending at `last`.
    pub fn daily_until(last: DateTime<Utc>, days: i64) -> Self {
        let history = Self::default();
        *history.dates.lock() = (0..days).map(|d| last - Duration::days(d)).collect();
        history
    }
}

#[async_trait]
impl SessionHistoryProvider for FakeHistory {
    async fn completed_session_dates(&self) -> Result<Vec<DateTime<Utc>>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(unavailable("session history"));
        }
        Ok(self.dates.lock().clone())
    }
}
