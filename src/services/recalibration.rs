//! Welcome-back handling: gap classification, diagnostic sessions and adaptive recalibration.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::store::{keys, MetaStore, ProblemStore, StoreError};
use crate::types::{Attempt, DifficultyLevel, Problem, MIN_BOX_LEVEL};

pub const DEFAULT_DIAGNOSTIC_PROBLEM_COUNT: usize = 5;
pub const RETENTION_THRESHOLD: f64 = 0.7;
pub const REDUCE_DECAY_THRESHOLD: f64 = 0.4;
const REDUCE_DECAY_RESTORE: f64 = 0.5;
const REVERT_DECAY_RESTORE: f64 = 0.75;

const GENTLE_GAP_DAYS: i64 = 30;
const MODERATE_GAP_DAYS: i64 = 90;
const MAJOR_GAP_DAYS: i64 = 365;

#[derive(Debug, thiserror::Error)]
pub enum RecalibrationError {
    #[error("store access failed: {0}")]
    StoreAccess(#[from] StoreError),
    #[error("no mastered problems available for a diagnostic session")]
    NoMasteredProblems,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WelcomeBackKind {
    Normal,
    GentleRecal,
    ModerateRecal,
    MajorRecal,
}

impl WelcomeBackKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::GentleRecal => "gentle_recal",
            Self::ModerateRecal => "moderate_recal",
            Self::MajorRecal => "major_recal",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecalibrationOptionKind {
    Diagnostic,
    Adaptive,
    Reset,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecalibrationOption {
    pub kind: RecalibrationOptionKind,
    pub label: String,
    pub recommended: bool,
    pub warning: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WelcomeBackStrategy {
    pub kind: WelcomeBackKind,
    pub days_since_last_use: i64,
    pub message: String,
    /// Whether the next session must be an adaptive one regardless of choice.
    pub forces_adaptive: bool,
    pub options: Vec<RecalibrationOption>,
}

fn option(kind: RecalibrationOptionKind, label: &str, recommended: bool) -> RecalibrationOption {
    RecalibrationOption {
        kind,
        label: label.to_string(),
        recommended,
        warning: None,
    }
}

pub fn get_welcome_back_strategy(days_since_last_use: i64) -> WelcomeBackStrategy {
    let days = days_since_last_use.max(0);
    let (kind, message, forces_adaptive, options) = if days < GENTLE_GAP_DAYS {
        (WelcomeBackKind::Normal, "Welcome back!".to_string(), false, Vec::new())
    } else if days < MODERATE_GAP_DAYS {
        (
            WelcomeBackKind::GentleRecal,
            format!("Welcome back after {days} days. Your first session will adapt to what you remember."),
            true,
            vec![option(RecalibrationOptionKind::Adaptive, "Adaptive session", true)],
        )
    } else if days < MAJOR_GAP_DAYS {
        (
            WelcomeBackKind::ModerateRecal,
            format!("It has been {days} days. A short diagnostic helps find where to pick up."),
            false,
            vec![
                option(RecalibrationOptionKind::Diagnostic, "Quick diagnostic", true),
                option(RecalibrationOptionKind::Adaptive, "Adaptive session", false),
            ],
        )
    } else {
        let mut reset = option(RecalibrationOptionKind::Reset, "Start fresh", false);
        reset.warning = Some("Resets every problem's review progress. This cannot be undone.".to_string());
        (
            WelcomeBackKind::MajorRecal,
            format!("Welcome back after {days} days. Let's check what stuck before planning reviews."),
            false,
            vec![
                option(RecalibrationOptionKind::Diagnostic, "Diagnostic session", true),
                reset,
                option(RecalibrationOptionKind::Adaptive, "Adaptive session", false),
            ],
        )
    };

    WelcomeBackStrategy {
        kind,
        days_since_last_use: days,
        message,
        forces_adaptive,
        options,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiagnosticSession {
    pub session_id: String,
    pub problems: Vec<Problem>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiagnosticOutcome {
    pub tag_accuracy: BTreeMap<String, f64>,
    pub retained_tags: Vec<String>,
    pub forgotten_tags: Vec<String>,
    pub problems_recalibrated: usize,
    pub overall_accuracy: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecalibrationDecision {
    KeepDecay,
    ReduceDecay,
    RevertDecayPartially,
}

impl RecalibrationDecision {
    pub fn from_accuracy(accuracy: f64) -> Self {
        if accuracy >= RETENTION_THRESHOLD {
            Self::KeepDecay
        } else if accuracy >= REDUCE_DECAY_THRESHOLD {
            Self::ReduceDecay
        } else {
            Self::RevertDecayPartially
        }
    }

    /// Share of the decayed box levels handed back.
    pub fn restore_fraction(&self) -> f64 {
        match self {
            Self::KeepDecay => 0.0,
            Self::ReduceDecay => REDUCE_DECAY_RESTORE,
            Self::RevertDecayPartially => REVERT_DECAY_RESTORE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingRecalibration {
    pub days_since_last_use: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AdaptiveSessionData {
    pub accuracy: Option<f64>,
    #[serde(default)]
    pub attempts: Vec<Attempt>,
}

impl AdaptiveSessionData {
    fn resolved_accuracy(&self) -> Option<f64> {
        if let Some(acc) = self.accuracy.filter(|a| a.is_finite()) {
            return Some(acc.clamp(0.0, 1.0));
        }
        if self.attempts.is_empty() {
            return None;
        }
        let successes = self.attempts.iter().filter(|a| a.success).count();
        Some(successes as f64 / self.attempts.len() as f64)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdaptiveCompletionResult {
    pub decision: RecalibrationDecision,
    pub accuracy: f64,
    pub problems_adjusted: usize,
    pub message: String,
}

/// Box level after handing back `fraction` of the decay since `original`.
pub fn restore_box_level(current: u8, original: u8, fraction: f64) -> u8 {
    if original <= current {
        return current;
    }
    let lost = (original - current) as f64;
    let restored = (lost * fraction).round() as u8;
    (current + restored).min(original)
}

/// Greedy diagnostic sample: flagged problems first, then whatever adds the most unseen tags
/// and difficulty levels, ties going to the higher box level.
pub fn select_diagnostic_problems(candidates: &[Problem], count: usize) -> Vec<Problem> {
    let mut remaining: Vec<&Problem> = candidates.iter().filter(|p| p.is_mastered()).collect();
    let mut seen_tags: HashSet<String> = HashSet::new();
    let mut seen_levels: HashSet<DifficultyLevel> = HashSet::new();
    let mut picked = Vec::with_capacity(count.min(remaining.len()));

    while picked.len() < count && !remaining.is_empty() {
        let score = |p: &Problem| {
            let new_tags = p
                .tags
                .iter()
                .filter(|t| !seen_tags.contains(&t.to_lowercase()))
                .count();
            let new_level = !seen_levels.contains(&p.difficulty_level);
            (p.needs_recalibration, new_tags + usize::from(new_level), p.box_level)
        };

        let mut best = 0;
        for idx in 1..remaining.len() {
            if score(remaining[idx]) > score(remaining[best]) {
                best = idx;
            }
        }

        let chosen = remaining.remove(best);
        seen_tags.extend(chosen.tags.iter().map(|t| t.to_lowercase()));
        seen_levels.insert(chosen.difficulty_level);
        picked.push(chosen.clone());
    }
    picked
}

pub struct RecalibrationService {
    problems: Arc<dyn ProblemStore>,
    meta: Arc<dyn MetaStore>,
}

impl RecalibrationService {
    pub fn new(problems: Arc<dyn ProblemStore>, meta: Arc<dyn MetaStore>) -> Self {
        Self { problems, meta }
    }

    pub async fn create_diagnostic_session(&self, problem_count: usize) -> Result<DiagnosticSession, RecalibrationError> {
        let problems = self.problems.all_problems().await?;
        let selected = select_diagnostic_problems(&problems, problem_count.max(1));
        if selected.is_empty() {
            warn!(total_problems = problems.len(), "No mastered problems for diagnostic session");
            return Err(RecalibrationError::NoMasteredProblems);
        }

        let session = DiagnosticSession {
            session_id: uuid::Uuid::new_v4().to_string(),
            problems: selected,
            created_at: Utc::now(),
        };
        info!(
            session_id = %session.session_id,
            problem_count = session.problems.len(),
            "Diagnostic session created"
        );
        Ok(session)
    }

    /// Scores a finished diagnostic and lowers mastered problems in forgotten tags by one box.
    /// All updates land in a single batch write.
    pub async fn process_diagnostic_results(&self, attempts: &[Attempt]) -> Result<DiagnosticOutcome, RecalibrationError> {
        let problems = self.problems.all_problems().await?;
        let by_id: HashMap<&str, &Problem> = problems.iter().map(|p| (p.id.as_str(), p)).collect();

        let mut per_tag: BTreeMap<String, (u32, u32)> = BTreeMap::new();
        let mut attempted: HashSet<&str> = HashSet::new();
        for attempt in attempts {
            let Some(problem) = by_id.get(attempt.problem_id.as_str()) else {
                debug!(problem_id = %attempt.problem_id, "Diagnostic attempt for unknown problem");
                continue;
            };
            attempted.insert(problem.id.as_str());
            let tags: BTreeSet<String> = problem.tags.iter().map(|t| t.to_lowercase()).collect();
            for tag in tags {
                let entry = per_tag.entry(tag).or_insert((0, 0));
                entry.0 += 1;
                if attempt.success {
                    entry.1 += 1;
                }
            }
        }

        let tag_accuracy: BTreeMap<String, f64> = per_tag
            .iter()
            .map(|(tag, (total, correct))| (tag.clone(), *correct as f64 / *total as f64))
            .collect();
        let (retained_tags, forgotten_tags): (Vec<String>, Vec<String>) = tag_accuracy
            .keys()
            .cloned()
            .partition(|tag| tag_accuracy[tag] >= RETENTION_THRESHOLD);
        let forgotten: HashSet<&str> = forgotten_tags.iter().map(String::as_str).collect();

        let mut updates = Vec::new();
        for problem in &problems {
            let in_forgotten_tag = problem.is_mastered()
                && problem.tags.iter().any(|t| forgotten.contains(t.to_lowercase().as_str()));
            let was_attempted = attempted.contains(problem.id.as_str());
            let pending_recalibration = problem.needs_recalibration || problem.original_box_level.is_some();
            if !in_forgotten_tag && !(was_attempted && pending_recalibration) {
                continue;
            }

            let mut updated = problem.clone();
            if in_forgotten_tag {
                updated.box_level = problem.box_level.saturating_sub(1).max(MIN_BOX_LEVEL);
            }
            // An attempted problem is recalibrated; the pre-decay box no longer applies.
            if was_attempted {
                updated.needs_recalibration = false;
                updated.original_box_level = None;
            }
            updates.push(updated);
        }

        if !updates.is_empty() {
            self.problems.put_problems(&updates).await?;
        }

        let overall_accuracy = if attempts.is_empty() {
            None
        } else {
            Some(attempts.iter().filter(|a| a.success).count() as f64 / attempts.len() as f64)
        };
        info!(
            retained = retained_tags.len(),
            forgotten = forgotten_tags.len(),
            problems_recalibrated = updates.len(),
            "Diagnostic results processed"
        );

        Ok(DiagnosticOutcome {
            tag_accuracy,
            retained_tags,
            forgotten_tags,
            problems_recalibrated: updates.len(),
            overall_accuracy,
        })
    }

    pub async fn pending_recalibration(&self) -> Result<Option<PendingRecalibration>, RecalibrationError> {
        let raw = self.meta.get_meta(keys::PENDING_RECALIBRATION).await?;
        Ok(raw.and_then(|s| match serde_json::from_str(&s) {
            Ok(pending) => Some(pending),
            Err(e) => {
                warn!(error = %e, "Ignoring unreadable pending recalibration marker");
                None
            }
        }))
    }

    /// Marks the next completed session as the adaptive recalibration session.
    pub async fn create_adaptive_recalibration_session(
        &self,
        days_since_last_use: i64,
    ) -> Result<PendingRecalibration, RecalibrationError> {
        let pending = PendingRecalibration {
            days_since_last_use,
            created_at: Utc::now(),
        };
        let encoded = serde_json::to_string(&pending).map_err(StoreError::from)?;
        let current = self.meta.get_meta(keys::PENDING_RECALIBRATION).await?;
        let swapped = self
            .meta
            .compare_and_set(keys::PENDING_RECALIBRATION, current.as_deref(), Some(&encoded))
            .await?;

        if !swapped {
            if let Some(existing) = self.pending_recalibration().await? {
                debug!("Adaptive recalibration already pending");
                return Ok(existing);
            }
        }
        info!(days_since_last_use, "Adaptive recalibration pending");
        Ok(pending)
    }

    /// Consumes the pending flag. Returns `None` when nothing was pending or the session carried
    /// no accuracy signal. The flag is only cleared after the box updates are written, so a
    /// failed write leaves it set for the next completed session.
    pub async fn process_adaptive_session_completion(
        &self,
        session: &AdaptiveSessionData,
    ) -> Result<Option<AdaptiveCompletionResult>, RecalibrationError> {
        let marker = self.meta.get_meta(keys::PENDING_RECALIBRATION).await?;
        if marker.is_none() {
            return Ok(None);
        }
        let Some(accuracy) = session.resolved_accuracy() else {
            debug!("Adaptive session had no attempts; recalibration stays pending");
            return Ok(None);
        };

        let decision = RecalibrationDecision::from_accuracy(accuracy);
        let fraction = decision.restore_fraction();

        let problems = self.problems.all_problems().await?;
        let mut updates = Vec::new();
        let mut adjusted = 0usize;
        for problem in problems.iter().filter(|p| p.original_box_level.is_some()) {
            let mut updated = problem.clone();
            if let Some(original) = problem.original_box_level {
                updated.box_level = restore_box_level(problem.box_level, original, fraction);
            }
            if updated.box_level != problem.box_level {
                adjusted += 1;
            }
            updated.original_box_level = None;
            updates.push(updated);
        }

        if !updates.is_empty() {
            self.problems.put_problems(&updates).await?;
        }

        if !self
            .meta
            .compare_and_set(keys::PENDING_RECALIBRATION, marker.as_deref(), None)
            .await?
        {
            warn!("Pending recalibration marker changed while completing");
        }

        info!(
            decision = ?decision,
            accuracy,
            problems_adjusted = adjusted,
            "Adaptive recalibration completed"
        );

        let message = match decision {
            RecalibrationDecision::KeepDecay => "Great retention. Your schedule stays as adjusted.".to_string(),
            RecalibrationDecision::ReduceDecay => {
                format!("Partial retention. Restored half of the lost progress on {adjusted} problems.")
            }
            RecalibrationDecision::RevertDecayPartially => {
                format!("Restored most of the lost progress on {adjusted} problems to ease you back in.")
            }
        };

        Ok(Some(AdaptiveCompletionResult {
            decision,
            accuracy,
            problems_adjusted: adjusted,
            message,
        }))
    }
}
