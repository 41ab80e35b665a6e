//! The error type shared by every stage of a calibration run.
//!
//! Every variant is fatal for the run that produced it; there is no partial
//! output. Variants carry the offending IR, pair or wrap-start candidate so
//! that a bad measurement can be tracked down.

use std::{borrow::Cow, fmt};

/// Why the quadratic program for one wrap-start candidate could not be
/// certified optimal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolveFailure {
    /// The non-negative least squares iteration did not converge in its step
    /// budget.
    IterationLimit,
    /// A least squares subproblem could not be solved.
    Singular,
    /// No point satisfies every constraint.
    Infeasible,
    /// The solver stopped, but the KKT conditions do not hold at the point it
    /// stopped at.
    Uncertified,
}

impl fmt::Display for SolveFailure {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let msg = match self {
            SolveFailure::IterationLimit => "iteration limit reached",
            SolveFailure::Singular => "singular least squares subproblem",
            SolveFailure::Infeasible => "constraints cannot all be met",
            SolveFailure::Uncertified => "KKT conditions not satisfied",
        };
        write!(f, "{}", msg)
    }
}

/// Things that can go wrong while calibrating a set of impulse responses.
#[derive(Debug, Clone, PartialEq)]
pub enum AlignError {
    /// Returned when an operation needs at least one impulse response.
    EmptySet,

    /// Returned when the impulse responses (or channels) are not all the same
    /// length.
    UnequalLengths {
        /// index of the first offending IR
        index: usize,
        /// length of the first IR
        expected: usize,
        /// length of the offending IR
        found: usize,
    },

    /// Returned when two parallel arrays disagree in length, e.g. azimuths
    /// and impulse responses.
    CountMismatch {
        /// what was being counted
        what: &'static str,
        /// the count that was required
        expected: usize,
        /// the count that was given
        found: usize,
    },

    /// Returned when the lag axis of a correlation tensor has even length, so
    /// that it has no zero-lag centre.
    EvenCorrelationAxis(usize),

    /// Returned by the delay applier for a negative delay.
    NegativeDelay {
        /// channel index
        channel: usize,
        /// the delay that was asked for
        delay: i64,
    },

    /// Returned by the delay applier when a fixed output length cannot hold a
    /// delayed channel.
    OutputTooShort {
        /// channel index
        channel: usize,
        /// samples needed to hold the delayed channel
        needed: usize,
        /// the requested output length
        out_len: usize,
    },

    /// Returned when normalising a correlation tensor for an IR whose
    /// autocorrelation is zero everywhere.
    SilentResponse {
        /// index of the silent IR
        index: usize,
    },

    /// Returned when a configuration value is out of range.
    InvalidConfig(String),

    /// Returned when a delay estimator finds no peak over its threshold.
    NoPeakFound {
        /// index of the IR without a peak
        index: usize,
    },

    /// Returned when the curve fit for a wrap-start candidate is not solved to
    /// certified optimality.
    NotOptimal {
        /// azimuth of the wrap-start candidate, in degrees
        wrap_start: f64,
        /// what the solver reported
        reason: SolveFailure,
    },
}

impl fmt::Display for AlignError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use AlignError as AE;
        let msg = match self {
            AE::EmptySet => Cow::from("empty impulse response set"),
            AE::UnequalLengths {
                index,
                expected,
                found,
            } => Cow::from(format!(
                "impulse response {} has length {}, expected {}",
                index, found, expected
            )),
            AE::CountMismatch {
                what,
                expected,
                found,
            } => Cow::from(format!("expected {} {}, got {}", expected, what, found)),
            AE::EvenCorrelationAxis(len) => Cow::from(format!(
                "correlation lag axis has even length {}, needs a zero-lag centre",
                len
            )),
            AE::NegativeDelay { channel, delay } => Cow::from(format!(
                "delay for channel {} is negative: {}",
                channel, delay
            )),
            AE::OutputTooShort {
                channel,
                needed,
                out_len,
            } => Cow::from(format!(
                "channel {} needs {} samples but the output length is {}",
                channel, needed, out_len
            )),
            AE::SilentResponse { index } => {
                Cow::from(format!("impulse response {} is silent", index))
            }
            AE::InvalidConfig(msg) => Cow::from(format!("invalid configuration: {}", msg)),
            AE::NoPeakFound { index } => Cow::from(format!(
                "no peak over the threshold in impulse response {}",
                index
            )),
            AE::NotOptimal { wrap_start, reason } => Cow::from(format!(
                "curve fit with wrap start at {} degrees was not solved optimally: {}",
                wrap_start, reason
            )),
        };

        write!(f, "{}", msg)
    }
}

impl std::error::Error for AlignError {}

/// Shorthand used throughout the crate.
pub type Result<T> = std::result::Result<T, AlignError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_offender() {
        let err = AlignError::NoPeakFound { index: 7 };
        assert!(err.to_string().contains('7'));

        let err = AlignError::NotOptimal {
            wrap_start: 90.0,
            reason: SolveFailure::IterationLimit,
        };
        let msg = err.to_string();
        assert!(msg.contains("90"));
        assert!(msg.contains("iteration limit"));
    }
}
