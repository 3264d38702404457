//! Session clock for the semantic logger.
//!
//! The clock is the single source of truth for session time. The host
//! advances it once per frame with the frame's delta; every overlap signal
//! delivered during that frame and every sweep fired at its end is stamped
//! with the resulting time.
//!
//! # Design Principles
//!
//! - Time only moves forward. Negative or non-finite deltas are rejected.
//! - The frame counter uses checked arithmetic (no silent overflow).

/// Errors that can occur during clock operations.
#[derive(Debug, thiserror::Error)]
pub enum ClockError {
    /// Frame counter would overflow.
    #[error("frame counter overflow: cannot advance beyond u64::MAX")]
    FrameOverflow,

    /// The requested time step is not usable.
    #[error("invalid time step: {reason}")]
    InvalidStep {
        /// Explanation of what is wrong with the step.
        reason: String,
    },
}

/// Monotonic session clock.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SessionClock {
    /// Number of frames advanced so far.
    frame: u64,

    /// Current session time in seconds.
    now: f64,
}

impl SessionClock {
    /// Create a clock at frame 0, time 0.
    pub const fn new() -> Self {
        Self { frame: 0, now: 0.0 }
    }

    /// Create a clock starting at an explicit time (useful for hosts that
    /// start logging mid-simulation, and for tests).
    ///
    /// # Errors
    ///
    /// Returns [`ClockError::InvalidStep`] if `now` is negative or not finite.
    pub fn starting_at(now: f64) -> Result<Self, ClockError> {
        if !now.is_finite() || now < 0.0 {
            return Err(ClockError::InvalidStep {
                reason: format!("start time {now} must be finite and non-negative"),
            });
        }
        Ok(Self { frame: 0, now })
    }

    /// Advance by `dt` seconds and return the new time.
    ///
    /// # Errors
    ///
    /// Returns [`ClockError::InvalidStep`] for a negative or non-finite
    /// delta, or [`ClockError::FrameOverflow`] if the frame counter would
    /// overflow.
    pub fn advance(&mut self, dt: f64) -> Result<f64, ClockError> {
        if !dt.is_finite() || dt < 0.0 {
            return Err(ClockError::InvalidStep {
                reason: format!("delta {dt} must be finite and non-negative"),
            });
        }
        self.frame = self.frame.checked_add(1).ok_or(ClockError::FrameOverflow)?;
        self.now += dt;
        Ok(self.now)
    }

    /// Advance to an absolute time and return it.
    ///
    /// # Errors
    ///
    /// Returns [`ClockError::InvalidStep`] if `t` lies before the current
    /// time or is not finite.
    pub fn advance_to(&mut self, t: f64) -> Result<f64, ClockError> {
        if !t.is_finite() || t < self.now {
            return Err(ClockError::InvalidStep {
                reason: format!("target time {t} is before current time {}", self.now),
            });
        }
        self.advance(t - self.now)
    }

    /// Current session time in seconds.
    pub const fn now(&self) -> f64 {
        self.now
    }

    /// Number of frames advanced so far.
    pub const fn frame(&self) -> u64 {
        self.frame
    }
}
