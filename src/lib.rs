//! brir-align calibrates the delays of a grid of measured binaural room
//! impulse responses, so that a renderer can interpolate between them
//! without comb filtering or clicks as the listener turns their head.
//!
//! For each source and ear, the IRs are measured over a range of listener
//! view azimuths. The [orchestrator] finds a delay for each of them that
//! varies smoothly with azimuth, closes up at 360 degrees, and lines the
//! direct sound of neighbouring views up as well as possible. The
//! [global_alignment] pass then fixes the delays between sources and ears.
//!
//! The pieces are usable on their own:
//!
//! - [delay_estimator] makes cheap first guesses at each IR's onset;
//! - [curve_fitter] fits closed polynomials over azimuth;
//! - [windower] isolates the leading edge of each IR;
//! - [correlation] builds the pairwise cross-correlation tensor;
//! - [annealer] searches integer delays for the best total correlation;
//! - [delay_applier] shifts signals by the resulting delays;
//! - [resample] oversamples IRs so that delays can be found to a fraction of
//!   a sample.
//!
//! Tunables are collected in [config] and read from RON files by the
//! `calibrate` binary.

#![warn(missing_docs)]
pub mod annealer;
pub mod config;
pub mod correlation;
pub mod curve_fitter;
pub mod delay_applier;
pub mod delay_estimator;
pub mod error;
pub mod global_alignment;
pub mod impulse_response;
pub mod orchestrator;
pub mod peaks;
mod qp;
pub mod resample;
pub mod windower;

pub use error::{AlignError, Result};

/// An iterator that transposes nested iterables, so that iterating over
/// `[[a, b], [c, d]]` yields `[a, c]` then `[b, d]`. Iteration stops as soon
/// as any inner iterator runs out, and an empty outer iterable yields
/// nothing.
///
/// Based on [this StackOverflow answer](https://stackoverflow.com/a/75477884/17443903).
pub struct TransposeIter<I, T>
where
    I: IntoIterator<Item = T>,
{
    iterators: Vec<I::IntoIter>,
}

#[allow(missing_docs)]
pub trait TransposableIter<I, T>
where
    Self: Sized,
    Self: IntoIterator<Item = I>,
    I: IntoIterator<Item = T>,
{
    fn transpose(self) -> TransposeIter<I, T> {
        let iterators: Vec<_> = self.into_iter().map(|i| i.into_iter()).collect();
        TransposeIter { iterators }
    }
}

impl<I, T> Iterator for TransposeIter<I, T>
where
    I: IntoIterator<Item = T>,
{
    type Item = Vec<T>;
    fn next(&mut self) -> Option<Self::Item> {
        if self.iterators.is_empty() {
            return None;
        }
        self.iterators.iter_mut().map(|iter| iter.next()).collect()
    }
}

impl<I, T, Any> TransposableIter<I, T> for Any
where
    Any: IntoIterator<Item = I>,
    I: IntoIterator<Item = T>,
{
}
