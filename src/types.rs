use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

pub const MIN_BOX_LEVEL: u8 = 1;
pub const MAX_BOX_LEVEL: u8 = 8;
pub const MIN_STABILITY: f64 = 0.5;
pub const DEFAULT_STABILITY: f64 = 1.0;
/// Box level from which a problem counts as mastered.
pub const MASTERED_BOX_LEVEL: u8 = 3;
pub const SESSION_STATE_SCHEMA_VERSION: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[derive(Default)]
pub enum DifficultyLevel {
    #[default]
    Easy,
    Medium,
    Hard,
}

impl DifficultyLevel {
    pub const ALL: [DifficultyLevel; 3] = [Self::Easy, Self::Medium, Self::Hard];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Easy => "easy",
            Self::Medium => "medium",
            Self::Hard => "hard",
        }
    }

    pub fn harder(&self) -> Option<Self> {
        match self {
            Self::Easy => Some(Self::Medium),
            Self::Medium => Some(Self::Hard),
            Self::Hard => None,
        }
    }

    pub fn easier(&self) -> Option<Self> {
        match self {
            Self::Hard => Some(Self::Medium),
            Self::Medium => Some(Self::Easy),
            Self::Easy => None,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "easy" => Some(Self::Easy),
            "medium" | "mid" => Some(Self::Medium),
            "hard" => Some(Self::Hard),
            _ => None,
        }
    }

    /// Time budget after which an attempt counts as slow.
    pub fn recommended_time_secs(&self) -> u32 {
        match self {
            Self::Easy => 15 * 60,
            Self::Medium => 25 * 60,
            Self::Hard => 40 * 60,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptStats {
    pub total: u32,
    pub successful: u32,
    pub unsuccessful: u32,
}

impl AttemptStats {
    pub fn accuracy(&self) -> Option<f64> {
        if self.total == 0 {
            return None;
        }
        Some(self.successful as f64 / self.total as f64)
    }
}

/// A practice problem and its review bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Problem {
    pub id: String,
    pub box_level: u8,
    pub stability: f64,
    pub attempt_stats: AttemptStats,
    pub consecutive_failures: u32,
    pub cooldown_status: bool,
    pub review_schedule: Option<DateTime<Utc>>,
    pub last_attempt_date: Option<DateTime<Utc>>,
    /// Running average of attempt difficulty ratings.
    pub difficulty: f64,
    pub difficulty_level: DifficultyLevel,
    pub needs_recalibration: bool,
    pub decay_applied_date: Option<NaiveDate>,
    pub original_box_level: Option<u8>,
    pub tags: Vec<String>,
}

impl Problem {
    pub fn new(id: impl Into<String>, difficulty_level: DifficultyLevel, tags: Vec<String>) -> Self {
        Self {
            id: id.into(),
            box_level: MIN_BOX_LEVEL,
            stability: DEFAULT_STABILITY,
            attempt_stats: AttemptStats::default(),
            consecutive_failures: 0,
            cooldown_status: false,
            review_schedule: None,
            last_attempt_date: None,
            difficulty: 0.0,
            difficulty_level,
            needs_recalibration: false,
            decay_applied_date: None,
            original_box_level: None,
            tags,
        }
    }

    pub fn is_mastered(&self) -> bool {
        self.box_level >= MASTERED_BOX_LEVEL
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t.eq_ignore_ascii_case(tag))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attempt {
    pub id: String,
    pub problem_id: String,
    pub success: bool,
    /// Perceived difficulty, 1 (trivial) to 10 (very hard).
    pub difficulty: u8,
    pub time_spent_secs: u32,
    pub attempt_date: DateTime<Utc>,
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DifficultyTimeStats {
    pub problems: u32,
    pub total_time: f64,
    pub avg_time: f64,
}

impl DifficultyTimeStats {
    pub fn record(&mut self, problems: u32, time_secs: f64) {
        self.problems += problems;
        self.total_time += time_secs.max(0.0);
        self.avg_time = if self.problems > 0 {
            self.total_time / self.problems as f64
        } else {
            0.0
        };
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromotionType {
    StandardVolumeGate,
    StagnationEscapeHatch,
}

impl PromotionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StandardVolumeGate => "standard_volume_gate",
            Self::StagnationEscapeHatch => "stagnation_escape_hatch",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EscapeHatches {
    pub sessions_at_current_difficulty: u32,
    pub last_difficulty_promotion: Option<DateTime<Utc>>,
    pub sessions_without_promotion: u32,
    pub activated_escape_hatches: Vec<String>,
    pub current_promotion_type: Option<PromotionType>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionState {
    pub schema_version: u32,
    pub num_sessions_completed: u32,
    pub current_difficulty_cap: DifficultyLevel,
    pub difficulty_time_stats: BTreeMap<DifficultyLevel, DifficultyTimeStats>,
    pub escape_hatches: EscapeHatches,
    pub last_session_date: Option<DateTime<Utc>>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            schema_version: SESSION_STATE_SCHEMA_VERSION,
            num_sessions_completed: 0,
            current_difficulty_cap: DifficultyLevel::Easy,
            difficulty_time_stats: DifficultyLevel::ALL
                .iter()
                .map(|level| (*level, DifficultyTimeStats::default()))
                .collect(),
            escape_hatches: EscapeHatches::default(),
            last_session_date: None,
        }
    }
}

impl SessionState {
    pub fn stats_for(&self, level: DifficultyLevel) -> DifficultyTimeStats {
        self.difficulty_time_stats.get(&level).copied().unwrap_or_default()
    }

    pub fn stats_for_mut(&mut self, level: DifficultyLevel) -> &mut DifficultyTimeStats {
        self.difficulty_time_stats.entry(level).or_default()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DifficultyBreakdown {
    pub attempted: u32,
    pub correct: u32,
}

impl DifficultyBreakdown {
    pub fn accuracy(&self) -> Option<f64> {
        if self.attempted == 0 {
            return None;
        }
        Some(self.correct as f64 / self.attempted as f64)
    }
}

/// Analytics summary of one completed session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionAnalytics {
    pub session_id: String,
    pub completed_at: DateTime<Utc>,
    pub accuracy: f64,
    pub efficiency: f64,
    #[serde(default)]
    pub difficulty_breakdown: BTreeMap<DifficultyLevel, DifficultyBreakdown>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserSettings {
    /// Number, `"auto"` or absent.
    pub session_length: serde_json::Value,
    pub number_of_new_problems: Option<u32>,
    pub focus_areas: Vec<String>,
    pub weekly_goal_days: u32,
}

impl Default for UserSettings {
    fn default() -> Self {
        Self {
            session_length: serde_json::Value::String("auto".to_string()),
            number_of_new_problems: None,
            focus_areas: Vec::new(),
            weekly_goal_days: 5,
        }
    }
}
