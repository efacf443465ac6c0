//! Box-level (Leitner) review scheduling.
//!
//! Two paths keep a problem's box level, stability and next review date current:
//! - [`reassess_box_level`] replays a problem's whole attempt history
//! - [`calculate_leitner_box`] applies one new attempt incrementally
//!
//! [`ReviewScheduler`] wires both to the attempt and problem stores.

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::fsrs::{self, FsrsParams, Rating};
use crate::store::{AttemptStore, ProblemStore, StoreError};
use crate::types::{Attempt, AttemptStats, Problem, MAX_BOX_LEVEL, MIN_BOX_LEVEL};

/// Review interval in days, indexed by `box_level - 1`.
pub const BOX_INTERVALS_DAYS: [i64; 8] = [1, 3, 7, 14, 30, 60, 90, 120];
pub const FAILURE_THRESHOLD: u32 = 3;
pub const COOLDOWN_MIN_INTERVAL_DAYS: i64 = 3;
const MAX_REVIEW_INTERVAL_DAYS: i64 = 36500;

#[derive(Debug, thiserror::Error)]
pub enum ReviewError {
    #[error("store access failed: {0}")]
    StoreAccess(#[from] StoreError),
    #[error("problem not found: {0}")]
    ProblemNotFound(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AttemptStatsSummary {
    pub updated: usize,
    pub failed: usize,
    pub failed_problem_ids: Vec<String>,
}

pub fn interval_for_box(box_level: u8) -> i64 {
    let idx = box_level.clamp(MIN_BOX_LEVEL, MAX_BOX_LEVEL) as usize - 1;
    BOX_INTERVALS_DAYS[idx]
}

/// Replays the full attempt history on top of the problem's current box level.
///
/// Attempts are ordered by date (stable for equal dates), so the result depends only on the
/// starting box level and the attempts.
pub fn reassess_box_level(problem: &Problem, attempts: &[Attempt]) -> Problem {
    let mut updated = problem.clone();
    if attempts.is_empty() {
        return updated;
    }

    let mut ordered: Vec<&Attempt> = attempts.iter().collect();
    ordered.sort_by_key(|a| a.attempt_date);

    let mut box_level = problem.box_level.clamp(MIN_BOX_LEVEL, MAX_BOX_LEVEL);
    let mut consecutive_failures = 0u32;
    let mut stats = AttemptStats::default();
    let mut difficulty_sum = 0.0;

    for attempt in &ordered {
        stats.total += 1;
        difficulty_sum += attempt.difficulty as f64;

        if attempt.success {
            stats.successful += 1;
            box_level = (box_level + 1).min(MAX_BOX_LEVEL);
            consecutive_failures = 0;
        } else {
            stats.unsuccessful += 1;
            consecutive_failures += 1;
            if consecutive_failures >= FAILURE_THRESHOLD {
                box_level = box_level.saturating_sub(1).max(MIN_BOX_LEVEL);
                consecutive_failures = 0;
            }
        }
    }

    let cooldown = stats.unsuccessful >= FAILURE_THRESHOLD;
    let mut interval = interval_for_box(box_level);
    if cooldown {
        interval = interval.max(COOLDOWN_MIN_INTERVAL_DAYS);
    }

    let last_attempt = ordered[ordered.len() - 1].attempt_date;
    updated.box_level = box_level;
    updated.consecutive_failures = consecutive_failures;
    updated.attempt_stats = stats;
    updated.difficulty = difficulty_sum / stats.total as f64;
    updated.cooldown_status = cooldown;
    updated.last_attempt_date = Some(last_attempt);
    updated.review_schedule = Some(last_attempt + Duration::days(interval));
    updated
}

/// Applies a single attempt to the problem.
///
/// With `use_time_limits`, a success slower than the difficulty's recommended time keeps the
/// problem in its current box instead of promoting it.
pub fn calculate_leitner_box(problem: Problem, attempt: &Attempt, use_time_limits: bool) -> Problem {
    calculate_leitner_box_with(problem, attempt, use_time_limits, &FsrsParams::default())
}

pub fn calculate_leitner_box_with(
    mut problem: Problem,
    attempt: &Attempt,
    use_time_limits: bool,
    params: &FsrsParams,
) -> Problem {
    let exceeded_time_limit =
        use_time_limits && attempt.time_spent_secs > problem.difficulty_level.recommended_time_secs();
    let elapsed_days = problem
        .last_attempt_date
        .map(|last| (attempt.attempt_date - last).num_seconds() as f64 / 86_400.0)
        .unwrap_or(0.0)
        .max(0.0);
    let first_review = problem.attempt_stats.total == 0;
    let box_level = problem.box_level.clamp(MIN_BOX_LEVEL, MAX_BOX_LEVEL);

    if attempt.success {
        problem.cooldown_status = false;
        problem.consecutive_failures = 0;
        problem.attempt_stats.successful += 1;
        // A slow success still counts as a success but holds the box.
        problem.box_level = if exceeded_time_limit {
            box_level
        } else {
            (box_level + 1).min(BOX_INTERVALS_DAYS.len() as u8)
        };
    } else {
        problem.consecutive_failures += 1;
        problem.attempt_stats.unsuccessful += 1;
        problem.box_level = box_level;
        if problem.consecutive_failures >= FAILURE_THRESHOLD {
            problem.cooldown_status = true;
            problem.box_level = box_level.saturating_sub(1).max(MIN_BOX_LEVEL);
            problem.consecutive_failures = 0;
        }
    }

    let rating = Rating::from_outcome(attempt.success, exceeded_time_limit, attempt.difficulty);
    problem.stability = fsrs::update_stability(
        problem.stability,
        problem.difficulty,
        elapsed_days,
        rating,
        first_review,
        params,
    );

    let previous_total = problem.attempt_stats.total as f64;
    problem.attempt_stats.total += 1;
    problem.difficulty =
        (problem.difficulty * previous_total + attempt.difficulty as f64) / problem.attempt_stats.total as f64;

    let base = interval_for_box(problem.box_level) as f64;
    let mut next_review_days = ((base * problem.stability / 2.0).round() as i64).clamp(1, MAX_REVIEW_INTERVAL_DAYS);
    if problem.cooldown_status {
        next_review_days = next_review_days.max(COOLDOWN_MIN_INTERVAL_DAYS);
    }

    let last_attempt = match problem.last_attempt_date {
        Some(previous) if previous > attempt.attempt_date => previous,
        _ => attempt.attempt_date,
    };
    problem.last_attempt_date = Some(last_attempt);
    problem.review_schedule = Some(last_attempt + Duration::days(next_review_days));

    debug!(
        problem_id = %problem.id,
        success = attempt.success,
        box_level = problem.box_level,
        stability = problem.stability,
        next_review_days,
        "Leitner box updated"
    );
    problem
}

pub struct ReviewScheduler {
    problems: Arc<dyn ProblemStore>,
    attempts: Arc<dyn AttemptStore>,
    use_time_limits: bool,
    params: FsrsParams,
}

impl ReviewScheduler {
    pub fn new(problems: Arc<dyn ProblemStore>, attempts: Arc<dyn AttemptStore>) -> Self {
        Self {
            problems,
            attempts,
            use_time_limits: false,
            params: FsrsParams::default(),
        }
    }

    pub fn with_time_limits(mut self, enabled: bool) -> Self {
        self.use_time_limits = enabled;
        self
    }

    pub fn with_params(mut self, params: FsrsParams) -> Self {
        self.params = params;
        self
    }

    /// Rebuilds the problem from its stored history, then applies the most recent attempt.
    pub async fn evaluate_attempts(&self, problem: &Problem) -> Result<Problem, ReviewError> {
        let attempts = self
            .attempts
            .attempts_for_problem(&problem.id)
            .await
            .map_err(|e| {
                error!(problem_id = %problem.id, error = %e, "Failed to read attempt history");
                ReviewError::StoreAccess(e)
            })?;

        let reassessed = reassess_box_level(problem, &attempts);
        let latest = attempts.iter().max_by_key(|a| a.attempt_date);
        Ok(match latest {
            Some(latest) => calculate_leitner_box_with(reassessed, latest, self.use_time_limits, &self.params),
            None => reassessed,
        })
    }

    /// Re-evaluates and persists every stored problem. A failing problem is skipped and
    /// reported; the others still update.
    pub async fn update_problems_with_attempt_stats(&self) -> Result<AttemptStatsSummary, ReviewError> {
        let problems = self.problems.all_problems().await?;
        let mut summary = AttemptStatsSummary::default();

        for problem in problems {
            let outcome = match self.evaluate_attempts(&problem).await {
                Ok(updated) => self.problems.put_problem(&updated).await.map_err(ReviewError::from),
                Err(e) => Err(e),
            };
            match outcome {
                Ok(()) => summary.updated += 1,
                Err(e) => {
                    warn!(problem_id = %problem.id, error = %e, "Skipping problem during attempt stats refresh");
                    summary.failed += 1;
                    summary.failed_problem_ids.push(problem.id);
                }
            }
        }

        info!(updated = summary.updated, failed = summary.failed, "Attempt stats refresh completed");
        Ok(summary)
    }

    /// Stores a new attempt and applies it incrementally to its problem.
    pub async fn record_attempt(&self, attempt: Attempt) -> Result<Problem, ReviewError> {
        let problem = self
            .problems
            .get_problem(&attempt.problem_id)
            .await?
            .ok_or_else(|| ReviewError::ProblemNotFound(attempt.problem_id.clone()))?;

        self.attempts.put_attempt(&attempt).await?;
        let updated = calculate_leitner_box_with(problem, &attempt, self.use_time_limits, &self.params);
        self.problems.put_problem(&updated).await?;
        Ok(updated)
    }

    /// Problems whose review date has arrived, earliest first.
    pub async fn due_problems(&self) -> Result<Vec<Problem>, ReviewError> {
        let now = Utc::now();
        let mut due: Vec<Problem> = self
            .problems
            .all_problems()
            .await?
            .into_iter()
            .filter(|p| p.review_schedule.map_or(true, |at| at <= now))
            .collect();
        due.sort_by_key(|p| p.review_schedule);
        Ok(due)
    }
}
