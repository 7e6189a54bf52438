//! Dormand-Prince 5(4) adaptive Runge-Kutta solver.
//!
//! Seven stages, fifth-order propagation with an embedded fourth-order
//! error estimate. Only accepted steps are sampled.

use dk_core::{Real, Tolerances, Value};
use dk_model::{
    OdeFn, OdeSolver, Solver, SolverError, SolverOptions, SolverResult, TimeSpan, Trajectory,
};
use nalgebra::DVector;
use tracing::debug;

use crate::steps;

const DEFAULT_REL_TOL: Real = 1e-6;
const DEFAULT_ABS_TOL: Real = 1e-8;
const SAFETY: Real = 0.9;

/// Evaluation points of the stages.
const C: [Real; 7] = [0.0, 1.0 / 5.0, 3.0 / 10.0, 4.0 / 5.0, 8.0 / 9.0, 1.0, 1.0];

#[rustfmt::skip]
const A: [&[Real]; 6] = [
    &[1.0 / 5.0],
    &[3.0 / 40.0, 9.0 / 40.0],
    &[44.0 / 45.0, -56.0 / 15.0, 32.0 / 9.0],
    &[19372.0 / 6561.0, -25360.0 / 2187.0, 64448.0 / 6561.0, -212.0 / 729.0],
    &[9017.0 / 3168.0, -355.0 / 33.0, 46732.0 / 5247.0, 49.0 / 176.0, -5103.0 / 18656.0],
    &[35.0 / 384.0, 0.0, 500.0 / 1113.0, 125.0 / 192.0, -2187.0 / 6784.0, 11.0 / 84.0],
];

/// Difference between the fifth- and fourth-order weights.
const E: [Real; 7] = [
    71.0 / 57600.0,
    0.0,
    -71.0 / 16695.0,
    71.0 / 1920.0,
    -17253.0 / 339200.0,
    22.0 / 525.0,
    -1.0 / 40.0,
];

#[derive(Clone, Copy, Debug, Default)]
pub struct Dopri45;

fn combine(y: &DVector<Real>, h: Real, coefs: &[Real], k: &[DVector<Real>]) -> DVector<Real> {
    let mut out = y.clone();
    for (c, ki) in coefs.iter().zip(k) {
        if *c != 0.0 {
            out.axpy(h * c, ki, 1.0);
        }
    }
    out
}

fn positive_or(value: Option<Real>, default: Real, what: &str) -> SolverResult<Real> {
    match value {
        None => Ok(default),
        Some(x) if x.is_finite() && x > 0.0 => Ok(x),
        Some(x) => Err(SolverError::InvalidArg {
            what: format!("{what} must be positive and finite, got {x}"),
        }),
    }
}

impl Solver for Dopri45 {
    fn name(&self) -> &str {
        "dopri45"
    }

    fn as_ode(&self) -> Option<&dyn OdeSolver> {
        Some(self)
    }
}

impl OdeSolver for Dopri45 {
    fn solve_ode(
        &self,
        rhs: &OdeFn,
        tspan: TimeSpan,
        y0: &[Real],
        options: &SolverOptions,
        params: &[Value],
    ) -> SolverResult<Trajectory> {
        steps::check_tspan(tspan)?;
        let mut y = steps::initial_state(y0, tspan.t0)?;
        let dim = y.len();
        let duration = tspan.duration();
        if duration == 0.0 {
            return Ok(Trajectory::from_columns(vec![tspan.t0], &[y0.to_vec()], dim));
        }

        let tol = Tolerances::new(
            positive_or(options.abs_tol, DEFAULT_ABS_TOL, "abs_tol")?,
            positive_or(options.rel_tol, DEFAULT_REL_TOL, "rel_tol")?,
        );
        let h_max = positive_or(options.max_step, duration, "max_step")?;
        let mut h = positive_or(options.initial_step, duration / 100.0, "initial_step")?
            .min(h_max);
        let max_steps = options.max_steps.unwrap_or(steps::DEFAULT_MAX_STEPS);

        let f = |t: Real, y: &DVector<Real>| steps::eval_ode(rhs, t, y, params);

        let mut t = tspan.t0;
        let mut times = vec![t];
        let mut columns = vec![y.as_slice().to_vec()];
        let mut attempts = 0_usize;
        let mut rejected = 0_usize;

        while t < tspan.tf {
            if attempts >= max_steps {
                return Err(SolverError::MaxSteps { max_steps, t });
            }
            attempts += 1;

            let last = t + h >= tspan.tf;
            if last {
                h = tspan.tf - t;
            }

            let mut k: Vec<DVector<Real>> = Vec::with_capacity(7);
            k.push(f(t, &y)?);
            for (stage, row) in A.iter().enumerate() {
                let ys = combine(&y, h, row, &k);
                k.push(f(t + C[stage + 1] * h, &ys)?);
            }
            // Stage 7 is evaluated at the fifth-order solution.
            let y_next = combine(&y, h, A[5], &k[..6]);

            let err = combine(&DVector::zeros(dim), h, &E, &k);
            let norm = err
                .iter()
                .zip(y.iter().zip(y_next.iter()))
                .map(|(e, (a, b))| tol.error_ratio(*e, *a, *b))
                .fold(0.0, Real::max)
                .max(1e-16);

            let factor = (SAFETY * norm.powf(-1.0 / 5.0)).clamp(0.1, 10.0);

            if norm <= 1.0 {
                t = if last { tspan.tf } else { t + h };
                y = y_next;
                steps::ensure_finite_state(t, &y)?;
                times.push(t);
                columns.push(y.as_slice().to_vec());
            } else {
                rejected += 1;
            }

            h = (h * factor).min(h_max);
            if h <= 16.0 * Real::EPSILON * t.abs().max(1.0) && t < tspan.tf {
                return Err(SolverError::StepSizeUnderflow { t, h });
            }
        }

        debug!(accepted = times.len() - 1, rejected, "dopri45 finished");
        Ok(Trajectory::from_columns(times, &columns, dim))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dk_core::{Tolerances, nearly_equal};

    fn last(traj: &Trajectory, row: usize) -> Real {
        traj.y[(row, traj.y.ncols() - 1)]
    }

    #[test]
    fn exponential_growth_within_tolerance() {
        let rhs = OdeFn::new(|_, y, p| vec![p[0].first() * y[0]]);
        let traj = Dopri45
            .solve_ode(
                &rhs,
                TimeSpan::new(0.0, 1.0),
                &[1.0],
                &SolverOptions::default(),
                &[Value::scalar(2.0)],
            )
            .unwrap();
        let tol = Tolerances {
            abs: 1e-6,
            rel: 1e-4,
        };
        assert!(nearly_equal(last(&traj, 0), 2.0_f64.exp(), tol));
        assert_eq!(traj.t.last(), Some(&1.0));
        assert!(traj.t.len() < 200, "took {} samples", traj.t.len());
        assert!(traj.t.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn oscillator_returns_after_one_period() {
        let rhs = OdeFn::new(|_, y, _| vec![y[1], -y[0]]);
        let opts = SolverOptions {
            rel_tol: Some(1e-9),
            abs_tol: Some(1e-12),
            ..SolverOptions::default()
        };
        let period = 2.0 * std::f64::consts::PI;
        let traj = Dopri45
            .solve_ode(&rhs, TimeSpan::new(0.0, period), &[1.0, 0.0], &opts, &[])
            .unwrap();
        assert!((last(&traj, 0) - 1.0).abs() < 1e-6);
        assert!(last(&traj, 1).abs() < 1e-6);
    }

    #[test]
    fn step_budget_is_enforced() {
        let rhs = OdeFn::new(|t, _, _| vec![(50.0 * t).sin()]);
        let opts = SolverOptions {
            max_steps: Some(5),
            ..SolverOptions::default()
        };
        let err = Dopri45
            .solve_ode(&rhs, TimeSpan::new(0.0, 100.0), &[0.0], &opts, &[])
            .unwrap_err();
        assert!(matches!(err, SolverError::MaxSteps { max_steps: 5, .. }));
    }

    #[test]
    fn rejects_non_positive_tolerance() {
        let rhs = OdeFn::new(|_, y, _| y.to_vec());
        let opts = SolverOptions {
            rel_tol: Some(0.0),
            ..SolverOptions::default()
        };
        assert!(Dopri45
            .solve_ode(&rhs, TimeSpan::new(0.0, 1.0), &[1.0], &opts, &[])
            .is_err());
    }
}
