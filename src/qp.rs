//! A small dense solver for linearly constrained least squares:
//!
//! ```text
//! minimise    |A x - y|^2
//! subject to  E x = e
//!             G x <= h
//! ```
//!
//! The equalities are removed with a null-space basis. What is left is a
//! least squares problem with inequalities only, which becomes a least
//! distance problem and is solved through its dual, a non-negative least
//! squares problem (Lawson and Hanson, *Solving Least Squares Problems*,
//! chapters 20 to 23). Dependent or redundant inequalities that are active
//! together, as happens when many integer delays touch a lower envelope, only
//! change which dual variables are zero.
//!
//! A solution is only returned once the KKT conditions have been checked at
//! the final point; anything else is a [SolveFailure].

use crate::error::SolveFailure;

use nalgebra::{DMatrix, DVector};

/// Singular values below this fraction of the largest are treated as zero.
const RANK_TOL: f64 = 1e-12;
/// Tolerance on primal feasibility and stationarity, relative to the size of
/// the problem data.
const KKT_TOL: f64 = 1e-8;
/// Slack below which an inequality may carry a multiplier.
const ACTIVE_TOL: f64 = 1e-7;

/// A least squares problem with linear constraints. Build it with
/// [LeastSquares::new] and add constraints with the builder methods.
#[derive(Debug, Clone)]
pub struct LeastSquares {
    a: DMatrix<f64>,
    y: DVector<f64>,
    eq: DMatrix<f64>,
    eq_rhs: DVector<f64>,
    ineq: DMatrix<f64>,
    ineq_rhs: DVector<f64>,
}

/// The certified optimum of a [LeastSquares] problem.
#[derive(Debug, Clone, PartialEq)]
pub struct Solution {
    /// the minimiser
    pub x: DVector<f64>,
    /// `|A x - y|^2` at `x`
    pub objective: f64,
}

impl LeastSquares {
    /// Minimise `|a x - y|^2` with no constraints yet.
    pub fn new(a: DMatrix<f64>, y: DVector<f64>) -> Self {
        let n = a.ncols();
        Self {
            a,
            y,
            eq: DMatrix::zeros(0, n),
            eq_rhs: DVector::zeros(0),
            ineq: DMatrix::zeros(0, n),
            ineq_rhs: DVector::zeros(0),
        }
    }

    /// Adds the constraints `eq x = eq_rhs`.
    pub fn with_equalities(mut self, eq: DMatrix<f64>, eq_rhs: DVector<f64>) -> Self {
        self.eq = stack_rows(&self.eq, &eq);
        self.eq_rhs = stack_vec(&self.eq_rhs, &eq_rhs);
        self
    }

    /// Adds the constraints `ineq x <= ineq_rhs`.
    pub fn with_upper_bounds(mut self, ineq: DMatrix<f64>, ineq_rhs: DVector<f64>) -> Self {
        self.ineq = stack_rows(&self.ineq, &ineq);
        self.ineq_rhs = stack_vec(&self.ineq_rhs, &ineq_rhs);
        self
    }

    /// Number of variables.
    pub fn n(&self) -> usize {
        self.a.ncols()
    }

    /// Solves the problem. Directions that change neither the objective nor
    /// any constraint are left at zero.
    pub fn solve(&self) -> Result<Solution, SolveFailure> {
        let (x0, null) = self.eliminate_equalities()?;

        // with x = x0 + null z, the objective is |reduced z - resid|^2
        let reduced = &self.a * &null;
        let resid = &self.y - &self.a * &x0;

        // reduced = U S V^T; substituting w = S V^T z - U^T resid leaves
        // |w|^2 plus a constant
        let svd = reduced.svd(true, true);
        let (u, v_t) = match (svd.u, svd.v_t) {
            (Some(u), Some(v_t)) => (u, v_t),
            _ => return Err(SolveFailure::Singular),
        };
        let sv = svd.singular_values;
        let s_max = sv.iter().copied().fold(0.0, f64::max);
        let kept: Vec<usize> = (0..sv.len()).filter(|&i| sv[i] > RANK_TOL * s_max).collect();

        let inv_s = DVector::from_iterator(kept.len(), kept.iter().map(|&i| 1.0 / sv[i]));
        let to_z = v_t.select_rows(&kept).transpose() * DMatrix::from_diagonal(&inv_s);
        let shift = u.select_columns(&kept).transpose() * &resid;

        // G (x0 + null to_z (w + shift)) <= h, as g w <= d
        let g = &self.ineq * &null * &to_z;
        let d = &self.ineq_rhs - &self.ineq * (&x0 + &null * (&to_z * &shift));
        let w = least_distance(&g, &d)?;

        let x = x0 + &null * (to_z * (w + shift));
        self.certify(&x, &null)?;

        let objective = (&self.a * &x - &self.y).norm_squared();
        Ok(Solution { x, objective })
    }

    /// A point satisfying the equalities and an orthonormal basis of their
    /// null space.
    fn eliminate_equalities(&self) -> Result<(DVector<f64>, DMatrix<f64>), SolveFailure> {
        let n = self.n();
        if self.eq.nrows() == 0 {
            return Ok((DVector::zeros(n), DMatrix::identity(n, n)));
        }

        let x0 = self
            .eq
            .clone()
            .svd(true, true)
            .solve(&self.eq_rhs, RANK_TOL * (1.0 + self.eq.norm()))
            .map_err(|_| SolveFailure::Singular)?;
        let tol = KKT_TOL * (1.0 + self.eq.norm() + self.eq_rhs.norm());
        if (&self.eq * &x0 - &self.eq_rhs).iter().any(|r| r.abs() > tol) {
            return Err(SolveFailure::Infeasible);
        }

        let eig = (self.eq.transpose() * &self.eq).symmetric_eigen();
        let largest = eig.eigenvalues.iter().copied().fold(0.0, f64::max);
        let null: Vec<usize> = (0..n)
            .filter(|&i| eig.eigenvalues[i].abs() <= RANK_TOL * (1.0 + largest))
            .collect();
        Ok((x0, eig.eigenvectors.select_columns(&null)))
    }

    fn feasible(&self, x: &DVector<f64>, tol: f64) -> bool {
        let eq_ok = (&self.eq * x - &self.eq_rhs).iter().all(|r| r.abs() <= tol);
        let ineq_ok = (&self.ineq * x - &self.ineq_rhs).iter().all(|r| *r <= tol);
        eq_ok && ineq_ok
    }

    /// Checks the KKT conditions at `x`: feasibility, and a projected
    /// gradient that non-negative multipliers of the active inequalities
    /// cancel. The equality multipliers absorb everything outside `null`.
    fn certify(&self, x: &DVector<f64>, null: &DMatrix<f64>) -> Result<(), SolveFailure> {
        let hess = self.a.transpose() * &self.a * 2.0;
        let lin = self.a.transpose() * &self.y * -2.0;
        let tol = KKT_TOL * (1.0 + hess.norm() + lin.norm());

        if !self.feasible(x, tol) {
            return Err(SolveFailure::Uncertified);
        }

        let active: Vec<usize> = (0..self.ineq.nrows())
            .filter(|&i| {
                self.ineq_rhs[i] - row_dot(&self.ineq, i, x)
                    <= ACTIVE_TOL * (1.0 + self.ineq_rhs[i].abs())
            })
            .collect();

        let grad = null.transpose() * (&hess * x + lin);
        let normals = (self.ineq.select_rows(&active) * null).transpose();
        let multipliers = nnls(&normals, &(-&grad))?;
        let stationarity = &normals * multipliers + grad;

        if stationarity.iter().all(|v| v.abs() <= tol) {
            Ok(())
        } else {
            Err(SolveFailure::Uncertified)
        }
    }
}

/// Minimises `|w|` subject to `g w <= d`, through the dual problem of
/// fitting the unit vector with non-negative combinations of `[-g^T; -d^T]`.
fn least_distance(g: &DMatrix<f64>, d: &DVector<f64>) -> Result<DVector<f64>, SolveFailure> {
    let (m, k) = g.shape();
    if m == 0 {
        return Ok(DVector::zeros(k));
    }

    let mut dual = DMatrix::zeros(k + 1, m);
    dual.view_mut((0, 0), (k, m)).copy_from(&(-g.transpose()));
    dual.row_mut(k).copy_from(&(-d.transpose()));
    let mut unit = DVector::zeros(k + 1);
    unit[k] = 1.0;

    let u = nnls(&dual, &unit)?;
    let r = &dual * u - unit;
    // |r|^2 = -r[k] at the optimum, and it is zero only when g w <= d has
    // no solution
    if r[k] > -RANK_TOL {
        return Err(SolveFailure::Infeasible);
    }
    Ok(DVector::from_iterator(k, (0..k).map(|j| -r[j] / r[k])))
}

/// Minimises `|a x - b|` subject to `x >= 0`, with Lawson and Hanson's
/// active-set method.
fn nnls(a: &DMatrix<f64>, b: &DVector<f64>) -> Result<DVector<f64>, SolveFailure> {
    let n = a.ncols();
    let tol = 10.0
        * f64::EPSILON
        * (1.0 + a.norm())
        * (1.0 + b.norm())
        * a.nrows().max(n).max(1) as f64;

    let mut x = DVector::zeros(n);
    let mut passive = vec![false; n];
    let mut grad = a.transpose() * b;

    for _ in 0..3 * n + 30 {
        let entering = (0..n)
            .filter(|&j| !passive[j] && grad[j] > tol)
            .max_by(|&i, &j| grad[i].total_cmp(&grad[j]));
        let Some(t) = entering else {
            return Ok(x);
        };
        passive[t] = true;

        let mut first = true;
        loop {
            let s = passive_solve(a, b, &passive)?;

            if first && s[t] <= 0.0 {
                // rounding: t cannot enter after all, so skip it this round
                passive[t] = false;
                grad[t] = 0.0;
                break;
            }
            first = false;

            let blocking = (0..n)
                .filter(|&j| passive[j] && s[j] <= 0.0)
                .map(|j| {
                    let gap = x[j] - s[j];
                    (j, if gap > 0.0 { x[j] / gap } else { 0.0 })
                })
                .min_by(|p, q| p.1.total_cmp(&q.1));

            let Some((leaving, alpha)) = blocking else {
                x = s;
                grad = a.transpose() * (b - a * &x);
                break;
            };

            x += (s - &x) * alpha;
            x[leaving] = 0.0;
            passive[leaving] = false;
            for j in 0..n {
                if passive[j] && x[j] <= 0.0 {
                    passive[j] = false;
                    x[j] = 0.0;
                }
            }
        }
    }

    Err(SolveFailure::IterationLimit)
}

/// Least squares over the passive columns of `a`; the rest stay at zero.
fn passive_solve(
    a: &DMatrix<f64>,
    b: &DVector<f64>,
    passive: &[bool],
) -> Result<DVector<f64>, SolveFailure> {
    let cols: Vec<usize> = (0..passive.len()).filter(|&j| passive[j]).collect();
    let svd = a.select_columns(&cols).svd(true, true);
    let eps = RANK_TOL * svd.singular_values.iter().copied().fold(0.0, f64::max);
    let sub = svd.solve(b, eps).map_err(|_| SolveFailure::Singular)?;
    if sub.iter().any(|v| !v.is_finite()) {
        return Err(SolveFailure::Singular);
    }

    let mut full = DVector::zeros(passive.len());
    for (c, &j) in cols.iter().enumerate() {
        full[j] = sub[c];
    }
    Ok(full)
}

fn row_dot(m: &DMatrix<f64>, i: usize, v: &DVector<f64>) -> f64 {
    m.row(i).iter().zip(v.iter()).map(|(a, b)| a * b).sum()
}

fn stack_rows(top: &DMatrix<f64>, bottom: &DMatrix<f64>) -> DMatrix<f64> {
    let n = top.ncols();
    let mut out = DMatrix::zeros(top.nrows() + bottom.nrows(), n);
    out.view_mut((0, 0), (top.nrows(), n)).copy_from(top);
    out.view_mut((top.nrows(), 0), (bottom.nrows(), n))
        .copy_from(bottom);
    out
}

fn stack_vec(top: &DVector<f64>, bottom: &DVector<f64>) -> DVector<f64> {
    DVector::from_iterator(
        top.len() + bottom.len(),
        top.iter().chain(bottom.iter()).copied(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unconstrained_matches_normal_equations() {
        // fit a line to three points
        let a = DMatrix::from_row_slice(3, 2, &[1.0, 0.0, 1.0, 1.0, 1.0, 2.0]);
        let y = DVector::from_vec(vec![1.0, 2.0, 4.0]);
        let sol = LeastSquares::new(a, y).solve().unwrap();

        assert!((sol.x[0] - 5.0 / 6.0).abs() < 1e-9);
        assert!((sol.x[1] - 1.5).abs() < 1e-9);
        assert!((sol.objective - 1.0 / 6.0).abs() < 1e-9);
    }

    #[test]
    fn equality_is_held() {
        // minimise (x0 - 1)^2 + (x1 - 3)^2 with x0 = x1
        let a = DMatrix::identity(2, 2);
        let y = DVector::from_vec(vec![1.0, 3.0]);
        let sol = LeastSquares::new(a, y)
            .with_equalities(
                DMatrix::from_row_slice(1, 2, &[1.0, -1.0]),
                DVector::zeros(1),
            )
            .solve()
            .unwrap();

        assert!((sol.x[0] - 2.0).abs() < 1e-9);
        assert!((sol.x[1] - 2.0).abs() < 1e-9);
    }

    #[test]
    fn inhomogeneous_equality_is_held() {
        // minimise x0^2 + x1^2 with x0 + x1 = 2
        let a = DMatrix::identity(2, 2);
        let y = DVector::zeros(2);
        let sol = LeastSquares::new(a, y)
            .with_equalities(
                DMatrix::from_row_slice(1, 2, &[1.0, 1.0]),
                DVector::from_vec(vec![2.0]),
            )
            .solve()
            .unwrap();

        assert!((sol.x[0] - 1.0).abs() < 1e-9);
        assert!((sol.x[1] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn inequality_becomes_active() {
        // minimise (x0 - 2)^2 + (x1 - 2)^2 with x0 + x1 <= 2
        let a = DMatrix::identity(2, 2);
        let y = DVector::from_vec(vec![2.0, 2.0]);
        let sol = LeastSquares::new(a, y)
            .with_upper_bounds(
                DMatrix::from_row_slice(1, 2, &[1.0, 1.0]),
                DVector::from_vec(vec![2.0]),
            )
            .solve()
            .unwrap();

        assert!((sol.x[0] - 1.0).abs() < 1e-9);
        assert!((sol.x[1] - 1.0).abs() < 1e-9);
        assert!((sol.objective - 2.0).abs() < 1e-9);
    }

    #[test]
    fn nearest_bound_blocks() {
        // x <= 5 and x <= 0.5; the optimum sits on the tighter bound
        let a = DMatrix::identity(1, 1);
        let y = DVector::from_vec(vec![3.0]);
        let sol = LeastSquares::new(a, y)
            .with_upper_bounds(
                DMatrix::from_row_slice(2, 1, &[1.0, 1.0]),
                DVector::from_vec(vec![5.0, 0.5]),
            )
            .solve()
            .unwrap();
        assert!((sol.x[0] - 0.5).abs() < 1e-9);
    }

    #[test]
    fn inactive_bound_keeps_free_optimum() {
        // minimise (x0 + 1)^2 + (x1 + 2)^2 + (x0 + x1 + 4)^2 with x0 <= 0;
        // the optimum is in the interior
        let a = DMatrix::from_row_slice(3, 2, &[1.0, 0.0, 0.0, 1.0, 1.0, 1.0]);
        let y = DVector::from_vec(vec![-1.0, -2.0, -4.0]);
        let sol = LeastSquares::new(a.clone(), y.clone())
            .with_upper_bounds(DMatrix::from_row_slice(1, 2, &[1.0, 0.0]), DVector::zeros(1))
            .solve()
            .unwrap();

        let free = LeastSquares::new(a, y).solve().unwrap();
        assert!(free.x[0] < 0.0);
        assert!((sol.x - free.x).amax() < 1e-9);
    }

    #[test]
    fn dependent_active_bounds_are_certified() {
        // x0 + x1 <= 2 three times over, scaled once, plus x0 <= 1 and
        // x1 <= 1: five bounds active at (1, 1) in two dimensions
        let a = DMatrix::identity(2, 2);
        let y = DVector::from_vec(vec![2.0, 2.0]);
        let ineq = DMatrix::from_row_slice(
            5,
            2,
            &[1.0, 1.0, 1.0, 1.0, 2.0, 2.0, 1.0, 0.0, 0.0, 1.0],
        );
        let rhs = DVector::from_vec(vec![2.0, 2.0, 4.0, 1.0, 1.0]);
        let sol = LeastSquares::new(a, y)
            .with_upper_bounds(ineq, rhs)
            .solve()
            .unwrap();

        assert!((sol.x[0] - 1.0).abs() < 1e-9);
        assert!((sol.x[1] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn line_under_level_points_touches_all() {
        // a line that must stay under four equal samples and equal its value
        // at both ends: every sample bound is active at the optimum
        let a = DMatrix::from_row_slice(4, 2, &[1.0, -1.0, 1.0, -0.5, 1.0, 0.0, 1.0, 0.5]);
        let y = DVector::from_vec(vec![3.0; 4]);
        let sol = LeastSquares::new(a.clone(), y.clone())
            .with_equalities(DMatrix::from_row_slice(1, 2, &[0.0, 2.0]), DVector::zeros(1))
            .with_upper_bounds(a, y)
            .solve()
            .unwrap();

        assert!((sol.x[0] - 3.0).abs() < 1e-9);
        assert!(sol.x[1].abs() < 1e-9);
        assert!(sol.objective < 1e-12);
    }

    #[test]
    fn infeasible_bounds_are_reported() {
        // x <= 0 and x >= 1
        let a = DMatrix::identity(1, 1);
        let y = DVector::from_vec(vec![0.0]);
        let res = LeastSquares::new(a, y)
            .with_upper_bounds(
                DMatrix::from_row_slice(2, 1, &[1.0, -1.0]),
                DVector::from_vec(vec![0.0, -1.0]),
            )
            .solve();
        assert_eq!(res, Err(SolveFailure::Infeasible));
    }

    #[test]
    fn nnls_clamps_negative_components() {
        // the free solution is (2, -1); with x >= 0 the second is held at 0
        let a = DMatrix::from_row_slice(3, 2, &[1.0, 0.0, 0.0, 1.0, 1.0, 1.0]);
        let b = DVector::from_vec(vec![2.0, -1.0, 1.0]);
        let x = nnls(&a, &b).unwrap();
        assert!((x[0] - 1.5).abs() < 1e-12);
        assert_eq!(x[1], 0.0);
    }
}
