//! Shifts channels along time by integer delays.
//!
//! This is used by the calibrate binary to build the aligned output files,
//! and by anything else that needs delayed, zero-padded copies of a set of
//! signals.

use crate::error::{AlignError, Result};
use crate::impulse_response::check_equal_lengths;

/// Delays each channel of `signals` by the matching entry of `delays`,
/// padding with zeros.
///
/// The output is longer than the input by `max(delays)` rounded up to a
/// multiple of `stride`, unless `out_len` is given; pass the same `out_len`
/// to several calls to get arrays that can be stacked together.
pub fn apply_delays(
    signals: &[Vec<f64>],
    delays: &[i64],
    stride: usize,
    out_len: Option<usize>,
) -> Result<Vec<Vec<f64>>> {
    let n_samples = check_equal_lengths(signals)?;
    if delays.len() != signals.len() {
        return Err(AlignError::CountMismatch {
            what: "delays",
            expected: signals.len(),
            found: delays.len(),
        });
    }
    if stride == 0 {
        return Err(AlignError::InvalidConfig("stride must be at least 1".into()));
    }

    let delays = delays
        .iter()
        .enumerate()
        .map(|(channel, &delay)| {
            usize::try_from(delay).map_err(|_| AlignError::NegativeDelay { channel, delay })
        })
        .collect::<Result<Vec<usize>>>()?;

    let out_len = out_len.unwrap_or_else(|| {
        let max_delay = delays.iter().copied().max().unwrap_or(0);
        n_samples + max_delay.div_ceil(stride) * stride
    });

    signals
        .iter()
        .zip(&delays)
        .enumerate()
        .map(|(channel, (signal, &delay))| {
            let needed = delay + n_samples;
            if needed > out_len {
                return Err(AlignError::OutputTooShort {
                    channel,
                    needed,
                    out_len,
                });
            }
            let mut out = vec![0.0; out_len];
            out[delay..needed].copy_from_slice(signal);
            Ok(out)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn impulses(n_channels: usize, len: usize) -> Vec<Vec<f64>> {
        (0..n_channels)
            .map(|_| {
                let mut v = vec![0.0; len];
                v[0] = 1.0;
                v
            })
            .collect()
    }

    #[test]
    fn fixed_output_length() {
        let delays = [0, 5, 10];
        let out = apply_delays(&impulses(3, 100), &delays, 1, Some(120)).unwrap();

        assert_eq!(out.len(), 3);
        for (channel, &delay) in out.iter().zip(&delays) {
            assert_eq!(channel.len(), 120);
            for (i, &x) in channel.iter().enumerate() {
                let expected = if i == delay as usize { 1.0 } else { 0.0 };
                assert_eq!(x, expected);
            }
        }
    }

    #[test]
    fn length_rounds_up_to_stride() {
        let out = apply_delays(&impulses(2, 10), &[3, 5], 4, None).unwrap();
        assert_eq!(out[0].len(), 18);
        assert_eq!(out[1][5], 1.0);

        let out = apply_delays(&impulses(2, 10), &[0, 0], 4, None).unwrap();
        assert_eq!(out[0].len(), 10);
    }

    #[test]
    fn negative_delay_is_an_error() {
        let res = apply_delays(&impulses(2, 10), &[0, -1], 1, None);
        assert_eq!(
            res,
            Err(AlignError::NegativeDelay {
                channel: 1,
                delay: -1
            })
        );
    }

    #[test]
    fn short_output_is_an_error() {
        let res = apply_delays(&impulses(1, 10), &[5], 1, Some(12));
        assert!(matches!(res, Err(AlignError::OutputTooShort { .. })));
    }
}
