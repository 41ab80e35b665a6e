//! Fits a smooth curve of delay over azimuth.
//!
//! Azimuth is circular, so the curve is a polynomial in the position
//! relative to a wrap-start angle, scaled so that one full turn covers
//! `[0, 1]`. The value at 0 is constrained to equal the value at 1, so the
//! curve closes without a step; optionally the slopes match too. Every input
//! azimuth is tried as the wrap start, and the best fit wins, so the
//! unavoidable seam ends up wherever it does the least harm.
//!
//! Internally the polynomial is expressed in `u = 2x - 1` rather than `x`,
//! which keeps the least squares problem well conditioned.

use crate::error::{AlignError, Result};
use crate::qp::LeastSquares;

use log::debug;
use nalgebra::{DMatrix, DVector};

/// Settings for a curve fit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CurveFitter {
    degree: usize,
    below: bool,
    smooth_wrap: bool,
}

/// One fitted curve, for a particular wrap start.
#[derive(Debug, Clone, PartialEq)]
pub struct FittedCurve {
    wrap_start: f64,
    coefficients: Vec<f64>,
    offset: f64,
    scale: f64,
    objective: f64,
}

impl FittedCurve {
    /// Azimuth (degrees) at which the curve wraps.
    pub fn wrap_start(&self) -> f64 {
        self.wrap_start
    }

    /// Sum of squared residuals, in normalised units.
    pub fn objective(&self) -> f64 {
        self.objective
    }

    /// Delay at relative position `x`, where 0 is the wrap start and 1 is one
    /// full turn later.
    pub fn value_at(&self, x: f64) -> f64 {
        let u = 2.0 * x - 1.0;
        let normalised = self
            .coefficients
            .iter()
            .rev()
            .fold(0.0, |acc, c| acc * u + c);
        normalised * self.scale + self.offset
    }

    /// Derivative of the delay with respect to relative position `x`.
    pub fn derivative_at(&self, x: f64) -> f64 {
        let u = 2.0 * x - 1.0;
        let du = self
            .coefficients
            .iter()
            .enumerate()
            .skip(1)
            .rev()
            .fold(0.0, |acc, (k, c)| acc * u + k as f64 * c);
        2.0 * du * self.scale
    }

    /// Delay at `azimuth` degrees.
    pub fn evaluate(&self, azimuth: f64) -> f64 {
        self.value_at(relative_position(self.wrap_start, azimuth))
    }
}

/// Position of `azimuth` within one turn starting at `start`, in `[0, 1)`.
fn relative_position(start: f64, azimuth: f64) -> f64 {
    (azimuth - start).rem_euclid(360.0) / 360.0
}

impl CurveFitter {
    /// A fitter for polynomials of the given degree.
    ///
    /// With `below`, the curve must not exceed any of the input delays, so it
    /// follows the lower envelope and ignores noise that only adds delay.
    /// With `smooth_wrap`, the slopes at either side of the wrap point match.
    pub fn new(degree: usize, below: bool, smooth_wrap: bool) -> Result<Self> {
        if degree < 1 {
            return Err(AlignError::InvalidConfig(
                "curve fit degree must be at least 1".into(),
            ));
        }
        Ok(Self {
            degree,
            below,
            smooth_wrap,
        })
    }

    /// Degree of the fitted polynomials.
    pub fn degree(&self) -> usize {
        self.degree
    }

    /// Fits `delays` over `azimuths` and returns the fitted delay at each
    /// azimuth.
    pub fn fit(&self, delays: &[f64], azimuths: &[f64]) -> Result<Vec<f64>> {
        let curve = self.fit_curve(delays, azimuths)?;
        Ok(azimuths.iter().map(|&az| curve.evaluate(az)).collect())
    }

    /// The curve with the lowest objective over all wrap starts.
    pub fn fit_curve(&self, delays: &[f64], azimuths: &[f64]) -> Result<FittedCurve> {
        let mut best: Option<FittedCurve> = None;
        for curve in self.fit_candidates(delays, azimuths)? {
            if best
                .as_ref()
                .map_or(true, |b| curve.objective < b.objective)
            {
                best = Some(curve);
            }
        }
        let best = best.ok_or(AlignError::EmptySet)?;
        debug!(
            "best curve wraps at {} degrees with objective {:e}",
            best.wrap_start, best.objective
        );
        Ok(best)
    }

    /// One certified-optimal fit per input azimuth used as the wrap start.
    /// Any candidate that cannot be solved fails the whole call.
    pub fn fit_candidates(&self, delays: &[f64], azimuths: &[f64]) -> Result<Vec<FittedCurve>> {
        if delays.is_empty() {
            return Err(AlignError::EmptySet);
        }
        if azimuths.len() != delays.len() {
            return Err(AlignError::CountMismatch {
                what: "azimuths",
                expected: delays.len(),
                found: azimuths.len(),
            });
        }

        // scale delays to +-0.5
        let max = delays.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let min = delays.iter().copied().fold(f64::INFINITY, f64::min);
        let offset = (max + min) / 2.0;
        let scale = if max > min { max - min } else { 1.0 };
        let target = DVector::from_iterator(
            delays.len(),
            delays.iter().map(|d| (d - offset) / scale),
        );

        let equalities = self.wrap_constraints();

        azimuths
            .iter()
            .map(|&wrap_start| {
                let design = self.design_matrix(azimuths, wrap_start);
                let mut problem = LeastSquares::new(design.clone(), target.clone())
                    .with_equalities(equalities.clone(), DVector::zeros(equalities.nrows()));
                if self.below {
                    problem = problem.with_upper_bounds(design, target.clone());
                }

                let solution = problem
                    .solve()
                    .map_err(|reason| AlignError::NotOptimal { wrap_start, reason })?;

                Ok(FittedCurve {
                    wrap_start,
                    coefficients: solution.x.iter().copied().collect(),
                    offset,
                    scale,
                    objective: solution.objective,
                })
            })
            .collect()
    }

    /// Rows are powers of `u` for each azimuth relative to `wrap_start`.
    fn design_matrix(&self, azimuths: &[f64], wrap_start: f64) -> DMatrix<f64> {
        DMatrix::from_fn(azimuths.len(), self.degree + 1, |i, k| {
            let u = 2.0 * relative_position(wrap_start, azimuths[i]) - 1.0;
            u.powi(k as i32)
        })
    }

    /// Value at `u = 1` equals value at `u = -1`, and with `smooth_wrap` the
    /// same for the first derivative. Rows that constrain nothing at low
    /// degrees are dropped.
    fn wrap_constraints(&self) -> DMatrix<f64> {
        let n_coef = self.degree + 1;
        let sign = |p: usize| if p % 2 == 0 { 1.0 } else { -1.0 };

        let mut rows: Vec<Vec<f64>> = vec![(0..n_coef).map(|k| 1.0 - sign(k)).collect()];
        if self.smooth_wrap {
            rows.push(
                (0..n_coef)
                    .map(|k| match k {
                        0 => 0.0,
                        k => k as f64 * (1.0 - sign(k - 1)),
                    })
                    .collect(),
            );
        }
        rows.retain(|r| r.iter().any(|&v| v != 0.0));

        DMatrix::from_fn(rows.len(), n_coef, |r, k| rows[r][k])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    /// Coefficients (in x, lowest first) of a random degree 6 polynomial whose
    /// ends meet, and optionally whose slopes at the ends match too.
    fn closed_poly(rng: &mut ChaCha8Rng, smooth: bool) -> Vec<f64> {
        let mut poly: Vec<f64> = (0..7).map(|_| rng.gen_range(-1.0..1.0)).collect();
        if smooth {
            // derivative at 1 minus at 0 is sum(k * poly[k]) for k >= 2
            let partial: f64 = (2..6).map(|k| k as f64 * poly[k]).sum();
            poly[6] = -partial / 6.0;
        }
        poly[1] = -poly[2..].iter().sum::<f64>();
        poly
    }

    fn eval(poly: &[f64], x: f64) -> f64 {
        poly.iter().rev().fold(0.0, |acc, c| acc * x + c)
    }

    /// Samples `poly` every 2 degrees, with the polynomial's own wrap point at
    /// 180 degrees rather than 0.
    fn sampled(poly: &[f64]) -> (Vec<f64>, Vec<f64>) {
        let azimuths: Vec<f64> = (0..180).map(|i| 2.0 * i as f64).collect();
        let delays = azimuths
            .iter()
            .map(|az| eval(poly, relative_position(180.0, *az)))
            .collect();
        (azimuths, delays)
    }

    #[test]
    fn four_bursts_recovered_exactly() {
        let azimuths = [0.0, 90.0, 180.0, 270.0];
        let delays = [20.0, 35.0, 40.0, 35.0];
        let fitted = CurveFitter::new(3, false, false)
            .unwrap()
            .fit(&delays, &azimuths)
            .unwrap();

        for (f, d) in fitted.iter().zip(delays) {
            assert!((f - d).abs() < 1e-3, "{} != {}", f, d);
        }
    }

    #[test]
    fn clean_closed_polynomials_recovered() {
        for seed in 0..3 {
            for below in [false, true] {
                for smooth in [false, true] {
                    let mut rng = ChaCha8Rng::seed_from_u64(seed);
                    let poly = closed_poly(&mut rng, smooth);
                    let (azimuths, delays) = sampled(&poly);

                    let fitted = CurveFitter::new(6, below, smooth)
                        .unwrap()
                        .fit(&delays, &azimuths)
                        .unwrap();

                    let max = delays.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                    let min = delays.iter().copied().fold(f64::INFINITY, f64::min);
                    let atol = 1e-5 * (max - min);
                    for (f, d) in fitted.iter().zip(&delays) {
                        assert!(
                            (f - d).abs() <= atol + 1e-5 * d.abs(),
                            "seed {} below {} smooth {}: {} != {}",
                            seed,
                            below,
                            smooth,
                            f,
                            d
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn below_fit_stays_under_noisy_delays() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let poly = closed_poly(&mut rng, false);
        let (azimuths, mut delays) = sampled(&poly);
        for _ in 0..10 {
            let i = rng.gen_range(0..delays.len());
            delays[i] += rng.gen_range(0.0..0.1);
        }

        let fitter = CurveFitter::new(6, true, false).unwrap();
        for curve in fitter.fit_candidates(&delays, &azimuths).unwrap() {
            assert!((curve.value_at(0.0) - curve.value_at(1.0)).abs() < 1e-6);
            for (&az, &d) in azimuths.iter().zip(&delays) {
                assert!(curve.evaluate(az) <= d + 1e-6);
            }
        }

        let fitted = fitter.fit(&delays, &azimuths).unwrap();
        for (f, d) in fitted.iter().zip(&delays) {
            assert!(*f <= d + 1e-6);
        }
    }

    #[test]
    fn integer_delays_fit_below() {
        // rounded onsets of a lopsided head model plus up to 6 samples of
        // late arrival; many samples tie on the lower envelope
        for seed in 0..5 {
            for n in [24, 36, 72] {
                for smooth in [false, true] {
                    let mut rng = ChaCha8Rng::seed_from_u64(seed);
                    let azimuths: Vec<f64> =
                        (0..n).map(|i| 360.0 * i as f64 / n as f64).collect();
                    let delays: Vec<f64> = azimuths
                        .iter()
                        .map(|az| {
                            let t = az.to_radians();
                            let late: f64 = rng.gen_range(0.0..6.0);
                            (400.0 + 40.0 * t.cos() + 12.0 * (2.0 * t).sin() + late).round()
                        })
                        .collect();

                    let fitted = CurveFitter::new(6, true, smooth)
                        .unwrap()
                        .fit(&delays, &azimuths)
                        .unwrap_or_else(|e| {
                            panic!("seed {} n {} smooth {}: {}", seed, n, smooth, e)
                        });
                    for (f, d) in fitted.iter().zip(&delays) {
                        assert!(
                            *f <= d + 1e-6,
                            "seed {} n {} smooth {}: {} > {}",
                            seed,
                            n,
                            smooth,
                            f,
                            d
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn smooth_wrap_matches_slopes() {
        // a tent over azimuth, with corners at 0 and 180 degrees
        let azimuths: Vec<f64> = (0..36).map(|i| 10.0 * i as f64).collect();
        let delays: Vec<f64> = azimuths
            .iter()
            .map(|az| 10.0 + (az - 180.0).abs() / 18.0)
            .collect();

        let smooth = CurveFitter::new(4, false, true)
            .unwrap()
            .fit_curve(&delays, &azimuths)
            .unwrap();
        assert!((smooth.value_at(0.0) - smooth.value_at(1.0)).abs() < 1e-6);
        assert!((smooth.derivative_at(0.0) - smooth.derivative_at(1.0)).abs() < 1e-6);

        // without the constraint, wrapping at the corner keeps the corner
        let cornered = CurveFitter::new(4, false, false)
            .unwrap()
            .fit_candidates(&delays, &azimuths)
            .unwrap()
            .into_iter()
            .find(|c| c.wrap_start() == 0.0)
            .unwrap();
        assert!((cornered.value_at(0.0) - cornered.value_at(1.0)).abs() < 1e-6);
        assert!(cornered.derivative_at(0.0) < 0.0);
        assert!(cornered.derivative_at(1.0) > 0.0);
    }

    #[test]
    fn constant_delays_stay_constant() {
        let azimuths = [0.0, 120.0, 240.0];
        let fitted = CurveFitter::new(2, true, true)
            .unwrap()
            .fit(&[5.0; 3], &azimuths)
            .unwrap();
        for f in fitted {
            assert!((f - 5.0).abs() < 1e-9);
        }
    }

    #[test]
    fn degree_zero_rejected() {
        assert!(matches!(
            CurveFitter::new(0, false, false),
            Err(AlignError::InvalidConfig(_))
        ));
    }

    #[test]
    fn mismatched_azimuths_rejected() {
        let fitter = CurveFitter::new(2, false, false).unwrap();
        assert!(matches!(
            fitter.fit(&[1.0, 2.0], &[0.0]),
            Err(AlignError::CountMismatch { .. })
        ));
    }
}
