//! Record sanitization
//!
//! Host-supplied problem and attempt records arrive loosely shaped (camelCase or snake_case keys,
//! numeric ids, dates as strings or epoch millis, missing counters). They are coerced here, once,
//! into complete typed records so the scheduling code never has to guess.

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use crate::types::{
    Attempt, AttemptStats, DifficultyLevel, Problem, DEFAULT_STABILITY, MAX_BOX_LEVEL,
    MIN_BOX_LEVEL, MIN_STABILITY,
};

const MIN_ATTEMPT_DIFFICULTY: u8 = 1;
const MAX_ATTEMPT_DIFFICULTY: u8 = 10;
const DEFAULT_ATTEMPT_DIFFICULTY: u8 = 5;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawAttemptStats {
    #[serde(alias = "total_attempts", alias = "totalAttempts")]
    pub total: Option<f64>,
    #[serde(alias = "successful_attempts", alias = "successfulAttempts")]
    pub successful: Option<f64>,
    #[serde(alias = "unsuccessful_attempts", alias = "unsuccessfulAttempts")]
    pub unsuccessful: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawProblem {
    pub id: Option<Value>,
    #[serde(alias = "problemId")]
    pub problem_id: Option<Value>,
    #[serde(alias = "leetcodeId")]
    pub leetcode_id: Option<Value>,
    #[serde(alias = "boxLevel")]
    pub box_level: Option<f64>,
    pub stability: Option<f64>,
    #[serde(alias = "attemptStats")]
    pub attempt_stats: Option<RawAttemptStats>,
    #[serde(alias = "consecutiveFailures")]
    pub consecutive_failures: Option<f64>,
    #[serde(alias = "cooldownStatus")]
    pub cooldown_status: Option<bool>,
    #[serde(alias = "reviewSchedule")]
    pub review_schedule: Option<Value>,
    #[serde(alias = "lastAttemptDate")]
    pub last_attempt_date: Option<Value>,
    /// Either the running average (number) or the official rating ("Easy"/"Medium"/"Hard").
    pub difficulty: Option<Value>,
    #[serde(alias = "difficultyLevel")]
    pub difficulty_level: Option<String>,
    #[serde(alias = "needsRecalibration")]
    pub needs_recalibration: Option<bool>,
    #[serde(alias = "decayAppliedDate")]
    pub decay_applied_date: Option<Value>,
    #[serde(alias = "originalBoxLevel")]
    pub original_box_level: Option<f64>,
    pub tags: Option<Vec<String>>,
    #[serde(alias = "topicTags")]
    pub topic_tags: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawAttempt {
    pub id: Option<Value>,
    #[serde(alias = "attemptId")]
    pub attempt_id: Option<Value>,
    #[serde(alias = "problemId")]
    pub problem_id: Option<Value>,
    #[serde(alias = "leetcodeId")]
    pub leetcode_id: Option<Value>,
    pub success: Option<bool>,
    pub difficulty: Option<f64>,
    pub time_spent_secs: Option<f64>,
    #[serde(alias = "timeSpent")]
    pub time_spent: Option<f64>,
    #[serde(alias = "attemptDate")]
    pub attempt_date: Option<Value>,
    pub date: Option<Value>,
    #[serde(alias = "sessionId")]
    pub session_id: Option<Value>,
}

impl RawProblem {
    /// Returns `None` only when the record has no usable id.
    pub fn into_problem(self) -> Option<Problem> {
        // The problem's own id wins over the catalogue number.
        let id = first_id([&self.problem_id, &self.id, &self.leetcode_id])?;

        let (difficulty_avg, rating_from_difficulty) = match self.difficulty {
            Some(Value::Number(n)) => (n.as_f64(), None),
            Some(Value::String(s)) => (None, DifficultyLevel::parse(&s)),
            _ => (None, None),
        };
        let difficulty_level = self
            .difficulty_level
            .as_deref()
            .and_then(DifficultyLevel::parse)
            .or(rating_from_difficulty)
            .unwrap_or_default();

        let tags = self
            .tags
            .or(self.topic_tags)
            .unwrap_or_default()
            .into_iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();

        let mut problem = Problem::new(id, difficulty_level, tags);
        problem.box_level = self.box_level.map(clamp_box_level).unwrap_or(MIN_BOX_LEVEL);
        problem.stability = self
            .stability
            .filter(|s| s.is_finite())
            .unwrap_or(DEFAULT_STABILITY)
            .max(MIN_STABILITY);
        problem.attempt_stats = self.attempt_stats.map(coerce_stats).unwrap_or_default();
        problem.consecutive_failures = self.consecutive_failures.map(non_negative_u32).unwrap_or(0);
        problem.cooldown_status = self.cooldown_status.unwrap_or(false);
        problem.last_attempt_date = self.last_attempt_date.as_ref().and_then(parse_datetime);
        problem.review_schedule = self.review_schedule.as_ref().and_then(parse_datetime);
        if let (Some(review), Some(last)) = (problem.review_schedule, problem.last_attempt_date) {
            if review < last {
                problem.review_schedule = Some(last);
            }
        }
        problem.difficulty = difficulty_avg
            .filter(|d| d.is_finite())
            .unwrap_or(0.0)
            .clamp(0.0, MAX_ATTEMPT_DIFFICULTY as f64);
        problem.needs_recalibration = self.needs_recalibration.unwrap_or(false);
        problem.decay_applied_date = self.decay_applied_date.as_ref().and_then(parse_date);
        problem.original_box_level = self.original_box_level.map(clamp_box_level);
        Some(problem)
    }
}

impl RawAttempt {
    /// Returns `None` when the attempt cannot be tied to a problem or a date.
    pub fn into_attempt(self) -> Option<Attempt> {
        let problem_id = first_id([&self.problem_id, &self.leetcode_id])?;
        let attempt_date = [&self.attempt_date, &self.date]
            .into_iter()
            .find_map(|v| v.as_ref().and_then(parse_datetime))?;
        let id = first_id([&self.id, &self.attempt_id]).unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        Some(Attempt {
            id,
            problem_id,
            success: self.success.unwrap_or(false),
            difficulty: self
                .difficulty
                .filter(|d| d.is_finite())
                .map(|d| d.round().clamp(MIN_ATTEMPT_DIFFICULTY as f64, MAX_ATTEMPT_DIFFICULTY as f64) as u8)
                .unwrap_or(DEFAULT_ATTEMPT_DIFFICULTY),
            time_spent_secs: self
                .time_spent_secs
                .or(self.time_spent)
                .map(non_negative_u32)
                .unwrap_or(0),
            attempt_date,
            session_id: self.session_id.as_ref().and_then(id_string),
        })
    }
}

/// Parses a loosely shaped problem record, logging and skipping ones that cannot be repaired.
pub fn parse_problem(value: Value) -> Option<Problem> {
    match serde_json::from_value::<RawProblem>(value) {
        Ok(raw) => {
            let problem = raw.into_problem();
            if problem.is_none() {
                warn!("Skipping problem record without an id");
            }
            problem
        }
        Err(e) => {
            warn!(error = %e, "Skipping malformed problem record");
            None
        }
    }
}

pub fn parse_attempt(value: Value) -> Option<Attempt> {
    match serde_json::from_value::<RawAttempt>(value) {
        Ok(raw) => {
            let attempt = raw.into_attempt();
            if attempt.is_none() {
                warn!("Skipping attempt record without problem id or date");
            }
            attempt
        }
        Err(e) => {
            warn!(error = %e, "Skipping malformed attempt record");
            None
        }
    }
}

/// Accepts RFC 3339 strings, plain `YYYY-MM-DD` dates and epoch milliseconds.
pub fn parse_datetime(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => {
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Some(dt.with_timezone(&Utc));
            }
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|naive| Utc.from_utc_datetime(&naive))
        }
        Value::Number(n) => n.as_i64().and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        _ => None,
    }
}

pub fn parse_date(value: &Value) -> Option<NaiveDate> {
    match value {
        Value::String(s) => NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .ok()
            .or_else(|| parse_datetime(value).map(|dt| dt.date_naive())),
        _ => parse_datetime(value).map(|dt| dt.date_naive()),
    }
}

fn first_id<const N: usize>(candidates: [&Option<Value>; N]) -> Option<String> {
    candidates
        .into_iter()
        .find_map(|v| v.as_ref().and_then(id_string))
}

fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn clamp_box_level(value: f64) -> u8 {
    if !value.is_finite() {
        return MIN_BOX_LEVEL;
    }
    value.round().clamp(MIN_BOX_LEVEL as f64, MAX_BOX_LEVEL as f64) as u8
}

fn non_negative_u32(value: f64) -> u32 {
    if !value.is_finite() || value <= 0.0 {
        return 0;
    }
    value.round().min(u32::MAX as f64) as u32
}

fn coerce_stats(raw: RawAttemptStats) -> AttemptStats {
    let successful = raw.successful.map(non_negative_u32).unwrap_or(0);
    let unsuccessful = raw.unsuccessful.map(non_negative_u32).unwrap_or(0);
    let total = raw
        .total
        .map(non_negative_u32)
        .unwrap_or(0)
        .max(successful.saturating_add(unsuccessful));
    AttemptStats { total, successful, unsuccessful }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn legacy_camel_case_problem_is_coerced() {
        let problem = parse_problem(json!({
            "leetcode_id": 42,
            "boxLevel": 11,
            "stability": 0.1,
            "attemptStats": { "TotalAttempts": 3, "successfulAttempts": 2, "unsuccessfulAttempts": 1 },
            "difficulty": "Hard",
            "lastAttemptDate": "2025-01-10T08:00:00Z",
            "reviewSchedule": "2025-01-01",
            "Tags": ["ignored"]
        }))
        .unwrap();

        assert_eq!(problem.id, "42");
        assert_eq!(problem.box_level, MAX_BOX_LEVEL);
        assert_eq!(problem.stability, MIN_STABILITY);
        assert_eq!(problem.difficulty_level, DifficultyLevel::Hard);
        assert_eq!(problem.attempt_stats.total, 3);
        assert_eq!(problem.review_schedule, problem.last_attempt_date);
    }

    #[test]
    fn problem_without_id_is_dropped() {
        assert!(parse_problem(json!({ "box_level": 2 })).is_none());
        assert!(parse_problem(json!("not an object")).is_none());
    }

    #[test]
    fn attempt_fields_are_clamped() {
        let attempt = parse_attempt(json!({
            "problemId": "two-sum",
            "success": true,
            "difficulty": 42,
            "timeSpent": -5,
            "attemptDate": 1_700_000_000_000_i64
        }))
        .unwrap();

        assert_eq!(attempt.difficulty, MAX_ATTEMPT_DIFFICULTY);
        assert_eq!(attempt.time_spent_secs, 0);
        assert!(!attempt.id.is_empty());
        assert_eq!(attempt.attempt_date.timestamp_millis(), 1_700_000_000_000);
    }

    #[test]
    fn attempt_without_date_is_dropped() {
        assert!(parse_attempt(json!({ "problem_id": "x", "success": true })).is_none());
    }

    #[test]
    fn problem_with_several_ids_keeps_its_own() {
        let problem = parse_problem(json!({
            "problem_id": "uuid-1",
            "leetcode_id": 1,
            "box_level": 4,
            "tags": ["array"],
            "topicTags": ["ignored"]
        }))
        .unwrap();

        assert_eq!(problem.id, "uuid-1");
        assert_eq!(problem.box_level, 4);
        assert_eq!(problem.tags, vec!["array".to_string()]);

        let catalogue_only = parse_problem(json!({ "leetcode_id": 1, "topic_tags": ["dp"] })).unwrap();
        assert_eq!(catalogue_only.id, "1");
        assert_eq!(catalogue_only.tags, vec!["dp".to_string()]);
    }

    #[test]
    fn attempt_with_duplicate_keys_is_kept() {
        let attempt = parse_attempt(json!({
            "id": "a-1",
            "attempt_id": "a-legacy",
            "problem_id": "uuid-1",
            "leetcode_id": 1,
            "date": "2025-02-01",
            "attempt_date": "2025-02-03T10:00:00Z",
            "time_spent": 300,
            "success": true
        }))
        .unwrap();

        assert_eq!(attempt.id, "a-1");
        assert_eq!(attempt.problem_id, "uuid-1");
        assert_eq!(attempt.attempt_date.to_rfc3339(), "2025-02-03T10:00:00+00:00");
        assert_eq!(attempt.time_spent_secs, 300);
    }
}
