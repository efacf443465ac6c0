//! Adaptive spaced-repetition engine for coding practice.
//!
//! - [`services::review_scheduler`]: box level, stability and review dates per problem
//! - [`services::decay`] and [`services::recalibration`]: handling learners who return after a gap
//! - [`services::session_composer`] with [`services::difficulty_progression`]: next-session plans
//! - [`services::habit_analytics`] behind [`services::circuit_breaker`]: streak and cadence nudges
//!
//! Storage and advisory collaborators are traits in [`store`] and [`providers`];
//! [`engine::PracticeEngine`] wires everything to one store.

pub mod config;
pub mod engine;
pub mod logging;
pub mod providers;
pub mod sanitize;
pub mod services;
pub mod store;
pub mod types;

pub use config::EngineConfig;
pub use engine::{Collaborators, PracticeEngine};
pub use services::circuit_breaker::{CircuitBreakerStatus, HabitLearningCircuitBreaker};
pub use services::decay::{DecayEngine, DecayError, DecayResult};
pub use services::habit_analytics::HabitAnalyticsGuard;
pub use services::recalibration::{
    get_welcome_back_strategy, RecalibrationError, RecalibrationService, WelcomeBackKind,
};
pub use services::review_scheduler::{
    calculate_leitner_box, reassess_box_level, ReviewError, ReviewScheduler,
};
pub use services::session_composer::{
    apply_session_length_preference, compute_session_length,
    normalize_session_length_for_calculation, AdaptiveSessionSettings, PerformanceTrend,
    SessionComposer,
};
pub use store::{MemoryStore, SqliteStore, StoreError};
pub use types::{Attempt, DifficultyLevel, Problem, SessionState};
