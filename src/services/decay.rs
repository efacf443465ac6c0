//! Passive decay for learners returning after a long gap.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::config::DecayConfig;
use crate::providers::{ActivityTracker, ProviderError};
use crate::store::{keys, MetaStore, ProblemStore, StoreError};
use crate::types::{Problem, MIN_BOX_LEVEL, MIN_STABILITY};

#[derive(Debug, thiserror::Error)]
pub enum DecayError {
    #[error("store access failed: {0}")]
    StoreAccess(#[from] StoreError),
    #[error("activity tracker failed: {0}")]
    Activity(#[from] ProviderError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DecayResult {
    pub applied: bool,
    pub problems_affected: usize,
    pub message: String,
}

impl DecayResult {
    fn skipped(message: impl Into<String>) -> Self {
        Self {
            applied: false,
            problems_affected: 0,
            message: message.into(),
        }
    }
}

/// Box level after `days` without practice: one box lost per full decay interval.
pub fn decayed_box_level(box_level: u8, days: i64, box_decay_interval_days: i64) -> u8 {
    if days <= 0 || box_decay_interval_days <= 0 {
        return box_level;
    }
    let lost = (days / box_decay_interval_days).min(u8::MAX as i64) as u8;
    box_level.saturating_sub(lost).max(MIN_BOX_LEVEL)
}

/// Exponential stability decay with the given half-life.
pub fn decayed_stability(stability: f64, days: i64, half_life_days: f64) -> f64 {
    if days <= 0 || half_life_days <= 0.0 {
        return stability.max(MIN_STABILITY);
    }
    (stability * 0.5f64.powf(days as f64 / half_life_days)).max(MIN_STABILITY)
}

/// Applies one decay pass to a problem. `original_box_level` is only captured on the first pass
/// so later reversals restore toward the pre-gap level.
pub fn decay_problem(problem: &Problem, days: i64, today: NaiveDate, config: &DecayConfig) -> Problem {
    let mut decayed = problem.clone();
    if decayed.original_box_level.is_none() {
        decayed.original_box_level = Some(problem.box_level);
    }
    decayed.box_level = decayed_box_level(problem.box_level, days, config.box_decay_interval_days);
    decayed.stability = decayed_stability(problem.stability, days, config.forgetting_half_life_days);
    decayed.decay_applied_date = Some(today);
    if days >= config.recalibration_threshold_days {
        decayed.needs_recalibration = true;
    }
    decayed
}

pub struct DecayEngine {
    problems: Arc<dyn ProblemStore>,
    meta: Arc<dyn MetaStore>,
    activity: Arc<dyn ActivityTracker>,
    config: DecayConfig,
}

impl DecayEngine {
    pub fn new(
        problems: Arc<dyn ProblemStore>,
        meta: Arc<dyn MetaStore>,
        activity: Arc<dyn ActivityTracker>,
        config: DecayConfig,
    ) -> Self {
        Self {
            problems,
            meta,
            activity,
            config,
        }
    }

    pub fn config(&self) -> &DecayConfig {
        &self.config
    }

    pub async fn apply_passive_decay(&self, days_since_last_use: i64) -> Result<DecayResult, DecayError> {
        self.apply_passive_decay_at(days_since_last_use, Utc::now()).await
    }

    /// Decays every stored problem at most once per calendar day.
    ///
    /// The day marker is claimed with a compare-and-swap before any write, so a concurrent second
    /// caller sees `applied: false`. A batch failure after the claim leaves the marker in place and
    /// surfaces the error; earlier batches stay written.
    pub async fn apply_passive_decay_at(
        &self,
        days_since_last_use: i64,
        now: DateTime<Utc>,
    ) -> Result<DecayResult, DecayError> {
        if days_since_last_use < self.config.min_gap_days {
            debug!(days_since_last_use, "Gap below decay threshold");
            return Ok(DecayResult::skipped(format!(
                "gap of {days_since_last_use} days is below the {} day threshold",
                self.config.min_gap_days
            )));
        }

        let today = now.date_naive();
        let today_key = today.to_string();
        let previous = self.meta.get_meta(keys::LAST_DECAY_DATE).await?;
        if previous.as_deref() == Some(today_key.as_str()) {
            debug!(date = %today_key, "Decay already applied today");
            return Ok(DecayResult::skipped("decay already applied today"));
        }
        let claimed = self
            .meta
            .compare_and_set(keys::LAST_DECAY_DATE, previous.as_deref(), Some(&today_key))
            .await?;
        if !claimed {
            info!(date = %today_key, "Concurrent decay run claimed today's marker");
            return Ok(DecayResult::skipped("decay already applied today"));
        }

        let start = Instant::now();
        let problems = self.problems.all_problems().await?;
        let decayed: Vec<Problem> = problems
            .iter()
            .map(|p| decay_problem(p, days_since_last_use, today, &self.config))
            .collect();

        let mut written = 0usize;
        for chunk in decayed.chunks(self.config.batch_size.max(1)) {
            if let Err(e) = self.problems.put_problems(chunk).await {
                error!(written, batch_len = chunk.len(), error = %e, "Decay batch write failed");
                return Err(e.into());
            }
            written += chunk.len();
        }

        let flagged = days_since_last_use >= self.config.recalibration_threshold_days;
        info!(
            days_since_last_use,
            problems_affected = written,
            needs_recalibration = flagged,
            duration_ms = start.elapsed().as_millis() as u64,
            "Passive decay applied"
        );

        Ok(DecayResult {
            applied: true,
            problems_affected: written,
            message: format!("decay applied to {written} problems after {days_since_last_use} days away"),
        })
    }

    pub async fn check_and_apply_decay(&self) -> Result<DecayResult, DecayError> {
        self.check_and_apply_decay_at(Utc::now()).await
    }

    /// Runs decay at most once per check interval, then marks the learner active.
    pub async fn check_and_apply_decay_at(&self, now: DateTime<Utc>) -> Result<DecayResult, DecayError> {
        let last_check = self.meta.get_meta(keys::LAST_DECAY_CHECK).await?;
        let parsed = last_check
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc));

        if let Some(checked_at) = parsed {
            if now - checked_at < Duration::hours(self.config.check_interval_hours) {
                debug!(last_check = %checked_at, "Decay check throttled");
                return Ok(DecayResult::skipped("decay check already ran recently"));
            }
        }

        let stamp = now.to_rfc3339();
        let claimed = self
            .meta
            .compare_and_set(keys::LAST_DECAY_CHECK, last_check.as_deref(), Some(&stamp))
            .await?;
        if !claimed {
            return Ok(DecayResult::skipped("decay check already ran recently"));
        }

        let days = self.activity.days_since_last_use(now).await?;
        let result = self.apply_passive_decay_at(days, now).await?;

        if let Err(e) = self.activity.mark_active(now).await {
            warn!(error = %e, "Failed to update activity marker after decay check");
        }
        Ok(result)
    }
}
