//! Error types for the generator core.
//!
//! # Error Handling Strategy
//!
//! This crate uses three complementary patterns:
//!
//! - [`ConfigError`]: fatal configuration problems, returned from
//!   [`crate::config::GeneratorConfig::validate`] before any generation runs.
//!
//! - Construction failure (expected): builders return `None` plus a stable
//!   reason label (see [`crate::generator::reason_codes`]) when every
//!   candidate is rejected within the retry budget. Never an `Err`.
//!
//! - Invariant violation (generator bug): the SQL emitter panics when it
//!   encounters an impossible state, e.g. a nested `WITH` in an inline
//!   context. Malformed SQL must never be emitted silently.

use thiserror::Error;

/// A configuration document failed validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A probability weight was outside `0..=100`.
    #[error("weight `{name}` must be within 0..=100, got {value}")]
    WeightOutOfRange { name: &'static str, value: u32 },

    /// A structural bound was zero or otherwise unusable.
    #[error("bound `{name}` must be at least {min}, got {value}")]
    BoundTooSmall {
        name: &'static str,
        min: usize,
        value: usize,
    },

    /// TQS walk bounds are inverted.
    #[error("tqs walk bounds are inverted: min {min} > max {max}")]
    InvertedWalkBounds { min: usize, max: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_weight() {
        let err = ConfigError::WeightOutOfRange {
            name: "aggProb",
            value: 250,
        };
        assert_eq!(err.to_string(), "weight `aggProb` must be within 0..=100, got 250");
    }

    #[test]
    fn test_error_trait() {
        let err = ConfigError::BoundTooSmall {
            name: "maxColumns",
            min: 1,
            value: 0,
        };
        let _: &dyn std::error::Error = &err;
    }
}
