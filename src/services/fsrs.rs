//! FSRS-style stability update used by the incremental box scheduler.

use serde::{Deserialize, Serialize};

use crate::types::MIN_STABILITY;

const DECAY: f64 = -0.5;
const FACTOR: f64 = 19.0 / 81.0;
const MAX_STABILITY: f64 = 36500.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FsrsParams {
    pub w: [f64; 17],
}

impl Default for FsrsParams {
    fn default() -> Self {
        Self {
            w: [
                0.4, 0.6, 2.4, 5.8, // w0-w3: initial stability
                4.93, 0.94, 0.86, 0.01, 1.49, // w4-w8
                0.14, 0.94, 2.18, 0.05, 0.34, // w9-w13
                1.26, 0.29, 2.61, // w14-w16
            ],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Rating {
    Again = 1,
    Hard = 2,
    Good = 3,
    Easy = 4,
}

impl Rating {
    /// Maps an attempt outcome onto the four FSRS grades.
    ///
    /// `perceived_difficulty` is the learner's 1-10 rating of the attempt.
    pub fn from_outcome(success: bool, exceeded_time_limit: bool, perceived_difficulty: u8) -> Self {
        if !success {
            return Self::Again;
        }
        if exceeded_time_limit || perceived_difficulty >= 8 {
            Self::Hard
        } else if perceived_difficulty <= 3 {
            Self::Easy
        } else {
            Self::Good
        }
    }
}

pub fn retrievability(stability: f64, elapsed_days: f64) -> f64 {
    if stability <= 0.0 {
        return 0.0;
    }
    let safe_elapsed = elapsed_days.max(0.0);
    (1.0 + FACTOR * safe_elapsed / stability).powf(DECAY)
}

/// Next stability for a problem after one graded attempt.
///
/// `difficulty` is the problem's running 0-10 difficulty average; `first_review` selects the
/// initial-stability table instead of the recall/forget curves.
pub fn update_stability(
    stability: f64,
    difficulty: f64,
    elapsed_days: f64,
    rating: Rating,
    first_review: bool,
    params: &FsrsParams,
) -> f64 {
    let w = &params.w;
    let rating_val = rating as i32;
    let d_10 = if difficulty > 0.0 {
        difficulty.clamp(1.0, 10.0)
    } else {
        initial_difficulty(w, rating_val)
    };

    let next = if first_review {
        initial_stability(w, rating_val)
    } else {
        let s = stability.max(MIN_STABILITY);
        let r = retrievability(s, elapsed_days);
        if rating == Rating::Again {
            next_forget_stability(w, d_10, s, r)
        } else {
            next_recall_stability(w, d_10, s, r, rating_val)
        }
    };

    next.clamp(MIN_STABILITY, MAX_STABILITY)
}

fn initial_stability(w: &[f64; 17], rating: i32) -> f64 {
    w[(rating - 1) as usize].max(0.1)
}

fn initial_difficulty(w: &[f64; 17], rating: i32) -> f64 {
    let d = w[4] - (rating - 3) as f64 * w[5];
    d.clamp(1.0, 10.0)
}

fn next_recall_stability(w: &[f64; 17], d_10: f64, s: f64, r: f64, rating: i32) -> f64 {
    let hard_penalty = if rating == 2 { w[15] } else { 1.0 };
    let easy_bonus = if rating == 4 { w[16] } else { 1.0 };

    let new_s = s
        * (1.0
            + w[8].exp()
                * (11.0 - d_10)
                * s.powf(-w[9])
                * ((1.0 - r) * w[10]).exp_m1()
                * hard_penalty
                * easy_bonus);
    new_s.max(0.1)
}

fn next_forget_stability(w: &[f64; 17], d_10: f64, s: f64, r: f64) -> f64 {
    let new_s =
        w[11] * d_10.powf(-w[12]) * ((s + 1.0).powf(w[13]) - 1.0) * ((1.0 - r) * w[14]).exp();
    new_s.clamp(0.1, s)
}
