//! Request field checks shared by the handlers. Each returns `AppError::BadRequest`.

use std::ops::RangeInclusive;

use crate::error::{AppError, AppResult};

pub const SCORE_RANGE: RangeInclusive<i32> = 1..=10;

pub fn in_range(field: &str, value: i32, range: RangeInclusive<i32>) -> AppResult<()> {
    if range.contains(&value) {
        Ok(())
    } else {
        Err(AppError::BadRequest(format!(
            "{field} must be between {} and {}",
            range.start(),
            range.end()
        )))
    }
}

pub fn score(field: &str, value: i32) -> AppResult<()> {
    in_range(field, value, SCORE_RANGE)
}

/// Length is counted in characters, after trimming.
pub fn text(field: &str, value: &str, min: usize, max: usize) -> AppResult<()> {
    let len = value.trim().chars().count();
    if len < min {
        return Err(AppError::BadRequest(if min == 1 {
            format!("{field} is required")
        } else {
            format!("{field} must be at least {min} characters")
        }));
    }
    if len > max {
        return Err(AppError::BadRequest(format!(
            "{field} must be at most {max} characters"
        )));
    }
    Ok(())
}
