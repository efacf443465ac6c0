pub mod circuit_breaker;
pub mod decay;
pub mod difficulty_progression;
pub mod fsrs;
pub mod habit_analytics;
pub mod recalibration;
pub mod review_scheduler;
pub mod session_composer;
