//! Advisory collaborators the engine consults but does not own.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::store::{keys, MetaStore, StoreError};
use crate::types::{SessionAnalytics, SessionState, UserSettings};

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("provider unavailable: {0}")]
    Unavailable(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PerformanceLevel {
    #[default]
    Developing,
    Intermediate,
    Advanced,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FocusDecision {
    pub active_focus_tags: Vec<String>,
    pub is_onboarding: bool,
    pub performance_level: PerformanceLevel,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterviewInsights {
    pub has_data: bool,
    pub session_length_delta: i32,
    pub new_problems_delta: i32,
    /// <1 narrows focus to weak tags, >1 widens the tag pool.
    pub focus_weight: f64,
    pub weak_tags: Vec<String>,
    pub expansion_tags: Vec<String>,
}

impl Default for InterviewInsights {
    fn default() -> Self {
        Self {
            has_data: false,
            session_length_delta: 0,
            new_problems_delta: 0,
            focus_weight: 1.0,
            weak_tags: Vec::new(),
            expansion_tags: Vec::new(),
        }
    }
}

#[async_trait]
pub trait ActivityTracker: Send + Sync {
    async fn days_since_last_use(&self, now: DateTime<Utc>) -> Result<i64, ProviderError>;

    async fn mark_active(&self, now: DateTime<Utc>) -> Result<(), ProviderError>;
}

#[async_trait]
pub trait SessionAnalyticsProvider: Send + Sync {
    /// Most recent first.
    async fn recent_session_analytics(&self, limit: usize) -> Result<Vec<SessionAnalytics>, ProviderError>;
}

#[async_trait]
pub trait FocusCoordinator: Send + Sync {
    async fn focus_decision(
        &self,
        state: &SessionState,
        settings: &UserSettings,
    ) -> Result<FocusDecision, ProviderError>;
}

#[async_trait]
pub trait InterviewInsightProvider: Send + Sync {
    async fn interview_insights(&self) -> Result<InterviewInsights, ProviderError>;
}

#[async_trait]
pub trait SessionHistoryProvider: Send + Sync {
    async fn completed_session_dates(&self) -> Result<Vec<DateTime<Utc>>, ProviderError>;
}

/// Activity tracker backed by a timestamp in the meta store.
pub struct MetaActivityTracker {
    meta: Arc<dyn MetaStore>,
}

impl MetaActivityTracker {
    pub fn new(meta: Arc<dyn MetaStore>) -> Self {
        Self { meta }
    }
}

#[async_trait]
impl ActivityTracker for MetaActivityTracker {
    async fn days_since_last_use(&self, now: DateTime<Utc>) -> Result<i64, ProviderError> {
        let last = self.meta.get_meta(keys::LAST_ACTIVITY).await?;
        let Some(last) = last.and_then(|s| DateTime::parse_from_rfc3339(&s).ok()) else {
            return Ok(0);
        };
        Ok((now - last.with_timezone(&Utc)).num_days().max(0))
    }

    async fn mark_active(&self, now: DateTime<Utc>) -> Result<(), ProviderError> {
        let current = self.meta.get_meta(keys::LAST_ACTIVITY).await?;
        let stamp = now.to_rfc3339();
        // Losing the swap means another caller marked activity just now.
        self.meta
            .compare_and_set(keys::LAST_ACTIVITY, current.as_deref(), Some(&stamp))
            .await?;
        Ok(())
    }
}
