//! Trim types

use crate::utils::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A validated `[start, end)` range inside a source clip.
///
/// The end is exclusive on purpose: the frame shown exactly at `end` belongs
/// to whatever follows the cut, so back-to-back ranges never share a frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrimRange {
    pub start_seconds: f64,
    pub end_seconds: f64,
    pub source_duration_seconds: f64,
}

impl TrimRange {
    /// Requires `0 <= start < end <= duration`
    pub fn new(start: f64, end: f64, duration: f64) -> AppResult<Self> {
        let valid = start.is_finite()
            && end.is_finite()
            && duration.is_finite()
            && start >= 0.0
            && start < end
            && end <= duration;
        if !valid {
            return Err(AppError::InvalidRange {
                start,
                end,
                duration,
            });
        }
        Ok(Self {
            start_seconds: start,
            end_seconds: end,
            source_duration_seconds: duration,
        })
    }

    /// Checks that hold whatever the source duration is
    pub(crate) fn check_bounds(start: f64, end: f64) -> AppResult<()> {
        if start.is_finite() && end.is_finite() && start >= 0.0 && start < end {
            Ok(())
        } else {
            Err(AppError::InvalidRange {
                start,
                end,
                duration: f64::NAN,
            })
        }
    }

    pub fn start(&self) -> Duration {
        Duration::from_secs_f64(self.start_seconds)
    }

    pub fn end(&self) -> Duration {
        Duration::from_secs_f64(self.end_seconds)
    }

    pub fn len_seconds(&self) -> f64 {
        self.end_seconds - self.start_seconds
    }
}

/// A PNG-encoded still
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Thumbnail {
    pub width: u32,
    pub height: u32,
    /// Timestamp of the frame actually captured
    pub at_seconds: f64,
    pub png: Vec<u8>,
}
