//! Quality scores
//!
//! The scoring oracle reports two raw components: text/image alignment and
//! aesthetic quality. They are folded into a single total with a fixed
//! 10:1 weighting that historical score logs depend on:
//!
//! ```text
//! total = round((alignment * 10 + aesthetic) / 2, 2)
//! ```

use serde::{Deserialize, Serialize};

/// Raw components reported by a scoring oracle
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RawScore {
    /// Text/image alignment (component A, roughly 0.0 - 1.0)
    pub alignment: f64,
    /// Aesthetic quality (component B, roughly 0.0 - 10.0)
    pub aesthetic: f64,
}

impl RawScore {
    /// Create new raw score
    #[inline]
    #[must_use]
    pub fn new(alignment: f64, aesthetic: f64) -> Self {
        Self {
            alignment,
            aesthetic,
        }
    }
}

/// Combined score attached to a candidate
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Score {
    /// Combined total used for every comparison
    pub total: f64,
    /// Component A
    pub alignment: f64,
    /// Component B
    pub aesthetic: f64,
}

impl Score {
    /// Neutral score used for placeholders and failed scoring
    pub const ZERO: Score = Score {
        total: 0.0,
        alignment: 0.0,
        aesthetic: 0.0,
    };

    /// Combine raw components into a score
    ///
    /// Non-finite components count as zero.
    #[must_use]
    pub fn combine(raw: RawScore) -> Self {
        let alignment = finite_or_zero(raw.alignment);
        let aesthetic = finite_or_zero(raw.aesthetic);
        Self {
            total: combine_total(alignment, aesthetic),
            alignment,
            aesthetic,
        }
    }

    /// Strict improvement over another score
    #[inline]
    #[must_use]
    pub fn beats(&self, other: &Score) -> bool {
        self.total > other.total
    }
}

impl Default for Score {
    fn default() -> Self {
        Self::ZERO
    }
}

impl std::fmt::Display for Score {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:.2} (alignment={}, aesthetic={})",
            self.total, self.alignment, self.aesthetic
        )
    }
}

/// `round((alignment * 10 + aesthetic) / 2, 2)`
#[inline]
#[must_use]
pub fn combine_total(alignment: f64, aesthetic: f64) -> f64 {
    let raw = (alignment * 10.0 + aesthetic) / 2.0;
    (raw * 100.0).round() / 100.0
}

fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}
