use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::config::EngineConfig;
use crate::providers::{
    ActivityTracker, FocusCoordinator, InterviewInsightProvider, MetaActivityTracker,
    SessionAnalyticsProvider, SessionHistoryProvider,
};
use crate::services::circuit_breaker::HabitLearningCircuitBreaker;
use crate::services::decay::{DecayEngine, DecayError, DecayResult};
use crate::services::habit_analytics::HabitAnalyticsGuard;
use crate::services::recalibration::{get_welcome_back_strategy, RecalibrationService, WelcomeBackStrategy};
use crate::services::review_scheduler::ReviewScheduler;
use crate::services::session_composer::SessionComposer;
use crate::store::{
    AttemptStore, MetaStore, ProblemStore, SessionStateStore, SettingsStore, SqliteStore, StoreError,
};
use crate::types::UserSettings;

/// Host-supplied advisory collaborators.
pub struct Collaborators {
    pub analytics: Arc<dyn SessionAnalyticsProvider>,
    pub focus: Arc<dyn FocusCoordinator>,
    pub session_history: Arc<dyn SessionHistoryProvider>,
    pub interview_insights: Option<Arc<dyn InterviewInsightProvider>>,
    /// Defaults to a tracker backed by the store's meta table.
    pub activity: Option<Arc<dyn ActivityTracker>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReturnCheck {
    pub days_since_last_use: i64,
    pub decay: DecayResult,
    pub strategy: WelcomeBackStrategy,
}

/// Every service wired to one record store.
#[derive(Clone)]
pub struct PracticeEngine {
    config: Arc<EngineConfig>,
    activity: Arc<dyn ActivityTracker>,
    review: Arc<ReviewScheduler>,
    decay: Arc<DecayEngine>,
    recalibration: Arc<RecalibrationService>,
    composer: Arc<SessionComposer>,
    habits: Arc<HabitAnalyticsGuard>,
}

impl PracticeEngine {
    /// Opens the SQLite store at `config.store.database_path`.
    pub async fn open(config: EngineConfig, collaborators: Collaborators) -> Result<Self, StoreError> {
        let store = Arc::new(SqliteStore::open(&config.store.database_path).await?);
        info!(path = %config.store.database_path.display(), "Practice store opened");
        Ok(Self::with_store(config, store, collaborators))
    }

    pub fn with_store<S>(config: EngineConfig, store: Arc<S>, collaborators: Collaborators) -> Self
    where
        S: ProblemStore + AttemptStore + MetaStore + SessionStateStore + SettingsStore + 'static,
    {
        let problems: Arc<dyn ProblemStore> = store.clone();
        let attempts: Arc<dyn AttemptStore> = store.clone();
        let meta: Arc<dyn MetaStore> = store.clone();
        let session_state: Arc<dyn SessionStateStore> = store.clone();
        let settings: Arc<dyn SettingsStore> = store;

        let activity = collaborators
            .activity
            .unwrap_or_else(|| Arc::new(MetaActivityTracker::new(meta.clone())) as Arc<dyn ActivityTracker>);

        let review = ReviewScheduler::new(problems.clone(), attempts.clone()).with_time_limits(config.use_time_limits);
        let decay = DecayEngine::new(problems.clone(), meta.clone(), activity.clone(), config.decay.clone());
        let recalibration = RecalibrationService::new(problems, meta);

        let mut composer = SessionComposer::new(
            session_state,
            settings.clone(),
            attempts,
            collaborators.analytics,
            collaborators.focus,
            config.session.clone(),
        );
        if let Some(insights) = collaborators.interview_insights {
            composer = composer.with_interview_insights(insights);
        }

        let breaker = Arc::new(HabitLearningCircuitBreaker::new(config.breaker.clone()));
        let habits = HabitAnalyticsGuard::new(
            breaker,
            collaborators.session_history,
            UserSettings::default().weekly_goal_days,
        )
        .with_settings(settings);

        Self {
            config: Arc::new(config),
            activity,
            review: Arc::new(review),
            decay: Arc::new(decay),
            recalibration: Arc::new(recalibration),
            composer: Arc::new(composer),
            habits: Arc::new(habits),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn review(&self) -> Arc<ReviewScheduler> {
        Arc::clone(&self.review)
    }

    pub fn decay(&self) -> Arc<DecayEngine> {
        Arc::clone(&self.decay)
    }

    pub fn recalibration(&self) -> Arc<RecalibrationService> {
        Arc::clone(&self.recalibration)
    }

    pub fn composer(&self) -> Arc<SessionComposer> {
        Arc::clone(&self.composer)
    }

    pub fn habits(&self) -> Arc<HabitAnalyticsGuard> {
        Arc::clone(&self.habits)
    }

    /// Measures the gap before the decay check marks the learner active, then classifies it.
    pub async fn check_return(&self, now: DateTime<Utc>) -> Result<ReturnCheck, DecayError> {
        let days_since_last_use = self.activity.days_since_last_use(now).await?;
        let decay = self.decay.check_and_apply_decay_at(now).await?;
        let strategy = get_welcome_back_strategy(days_since_last_use);
        Ok(ReturnCheck {
            days_since_last_use,
            decay,
            strategy,
        })
    }
}
