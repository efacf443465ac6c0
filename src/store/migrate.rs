//! Session state schema migration.
//!
//! ## Versions
//! - v1: unversioned records written with camelCase keys (`numSessionsCompleted`,
//!   `currentDifficultyMode`, `difficultyTimeStats.easy.totalTime`, ...), sometimes mixed with
//!   snake_case keys from partial rewrites
//! - v2: canonical snake_case [`SessionState`] carrying `schema_version`
//!
//! Migration runs once when the record is loaded; everything downstream sees v2 only.

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::types::{DifficultyLevel, SessionState, SESSION_STATE_SCHEMA_VERSION};

/// Converts any stored session state record into the current canonical shape.
///
/// Records that cannot be repaired fall back to a fresh default state.
pub fn migrate_session_state(raw: Value) -> SessionState {
    let version = raw
        .get("schema_version")
        .and_then(Value::as_u64)
        .unwrap_or(1) as u32;

    let canonical = if version < SESSION_STATE_SCHEMA_VERSION {
        debug!(from_version = version, "Migrating legacy session state");
        migrate_v1_to_v2(&raw)
    } else {
        raw
    };

    match serde_json::from_value::<SessionState>(canonical) {
        Ok(mut state) => {
            state.schema_version = SESSION_STATE_SCHEMA_VERSION;
            for level in DifficultyLevel::ALL {
                state.stats_for_mut(level);
            }
            state
        }
        Err(e) => {
            warn!(error = %e, "Session state unreadable, starting from defaults");
            SessionState::default()
        }
    }
}

fn migrate_v1_to_v2(raw: &Value) -> Value {
    let Some(obj) = raw.as_object() else {
        return Value::Object(Map::new());
    };

    let mut out = Map::new();
    out.insert("schema_version".into(), Value::from(SESSION_STATE_SCHEMA_VERSION));
    copy_field(obj, &mut out, "num_sessions_completed", &["numSessionsCompleted", "num_sessions_completed"]);
    copy_field(obj, &mut out, "last_session_date", &["lastSessionDate", "last_session_date"]);

    if let Some(cap) = pick(
        obj,
        &["currentDifficultyMode", "current_difficulty_mode", "currentDifficultyCap", "current_difficulty_cap"],
    )
    .and_then(Value::as_str)
    .and_then(DifficultyLevel::parse)
    {
        out.insert("current_difficulty_cap".into(), Value::from(cap.as_str()));
    }

    if let Some(stats) = pick(obj, &["difficultyTimeStats", "difficulty_time_stats"]).and_then(Value::as_object) {
        let mut migrated = Map::new();
        for (level_key, entry) in stats {
            let (Some(level), Some(entry)) = (DifficultyLevel::parse(level_key), entry.as_object()) else {
                continue;
            };
            let mut stat = Map::new();
            copy_field(entry, &mut stat, "problems", &["problems"]);
            copy_field(entry, &mut stat, "total_time", &["totalTime", "total_time"]);
            copy_field(entry, &mut stat, "avg_time", &["avgTime", "avg_time"]);
            migrated.insert(level.as_str().to_string(), Value::Object(stat));
        }
        out.insert("difficulty_time_stats".into(), Value::Object(migrated));
    }

    if let Some(hatches) = pick(obj, &["escapeHatches", "escape_hatches"]).and_then(Value::as_object) {
        let mut migrated = Map::new();
        copy_field(hatches, &mut migrated, "sessions_at_current_difficulty", &["sessionsAtCurrentDifficulty", "sessions_at_current_difficulty"]);
        copy_field(hatches, &mut migrated, "last_difficulty_promotion", &["lastDifficultyPromotion", "last_difficulty_promotion"]);
        copy_field(hatches, &mut migrated, "sessions_without_promotion", &["sessionsWithoutPromotion", "sessions_without_promotion"]);
        copy_field(hatches, &mut migrated, "activated_escape_hatches", &["activatedEscapeHatches", "activated_escape_hatches"]);
        if let Some(kind) = pick(hatches, &["currentPromotionType", "current_promotion_type"]).and_then(Value::as_str) {
            let normalized = match kind {
                "standardVolumeGate" | "standard_volume_gate" => Some("standard_volume_gate"),
                "stagnationEscapeHatch" | "stagnation_escape_hatch" => Some("stagnation_escape_hatch"),
                _ => None,
            };
            if let Some(kind) = normalized {
                migrated.insert("current_promotion_type".into(), Value::from(kind));
            }
        }
        out.insert("escape_hatches".into(), Value::Object(migrated));
    }

    Value::Object(out)
}

fn pick<'a>(obj: &'a Map<String, Value>, names: &[&str]) -> Option<&'a Value> {
    names.iter().find_map(|name| obj.get(*name)).filter(|v| !v.is_null())
}

fn copy_field(from: &Map<String, Value>, to: &mut Map<String, Value>, target: &str, names: &[&str]) {
    if let Some(value) = pick(from, names) {
        to.insert(target.to_string(), value.clone());
    }
}
