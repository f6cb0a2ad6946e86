//! Error types for the agri-proto crate.

use thiserror::Error;

/// Errors raised while parsing or validating shared value types.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtoError {
    /// Malformed identifier.
    #[error("invalid {kind} ID: {value}")]
    InvalidId {
        /// Which identifier type was being parsed.
        kind: &'static str,
        /// The rejected input.
        value: String,
    },

    /// Coordinates outside the valid latitude/longitude ranges.
    #[error("invalid coordinates: lat {lat}, lon {lon}")]
    InvalidCoordinates {
        /// Latitude in degrees.
        lat: String,
        /// Longitude in degrees.
        lon: String,
    },

    /// A date range whose end precedes its start.
    #[error("invalid date range: {start} to {end}")]
    InvalidDateRange {
        /// First day of the range.
        start: chrono::NaiveDate,
        /// Last day of the range.
        end: chrono::NaiveDate,
    },

    /// Basis points above 100%.
    #[error("basis points out of range: {0}")]
    InvalidBasisPoints(u32),

    /// Validation error.
    #[error("validation error: {0}")]
    Validation(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = ProtoError::InvalidId {
            kind: "booking",
            value: "nope".to_string(),
        };
        assert_eq!(err.to_string(), "invalid booking ID: nope");

        let err = ProtoError::InvalidBasisPoints(12_000);
        assert_eq!(err.to_string(), "basis points out of range: 12000");
    }
}
