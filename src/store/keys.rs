pub const LAST_DECAY_DATE: &str = "decay:last_applied_date";
pub const LAST_DECAY_CHECK: &str = "decay:last_check_at";
pub const PENDING_RECALIBRATION: &str = "recalibration:pending";
pub const LAST_ACTIVITY: &str = "activity:last_active_at";
pub const SETTINGS: &str = "settings:user";
