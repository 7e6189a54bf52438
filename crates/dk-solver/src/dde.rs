//! Fixed-step delay differential equation solver (method of steps).
//!
//! The state before `t0` is held constant at `Y0`. Lagged states inside the
//! solved interval are linearly interpolated from the accepted samples;
//! stage times beyond the last accepted sample use that sample.

use dk_core::{Real, Value};
use dk_model::{
    DdeFn, DdeSolver, Solver, SolverError, SolverOptions, SolverResult, TimeSpan, Trajectory,
};
use nalgebra::{DMatrix, DVector};

use crate::fixed::{Integrator, Rk4};
use crate::steps;

#[derive(Clone, Copy, Debug, Default)]
pub struct DdeRk4;

/// Accepted samples of the solution so far.
struct History {
    times: Vec<Real>,
    states: Vec<DVector<Real>>,
}

impl History {
    fn new(t0: Real, y0: DVector<Real>) -> Self {
        Self {
            times: vec![t0],
            states: vec![y0],
        }
    }

    fn push(&mut self, t: Real, y: DVector<Real>) {
        self.times.push(t);
        self.states.push(y);
    }

    fn at(&self, t: Real) -> DVector<Real> {
        let k = self.times.partition_point(|&s| s < t);
        if k == 0 {
            return self.states[0].clone();
        }
        if k >= self.times.len() {
            return self.states[self.states.len() - 1].clone();
        }
        if self.times[k] == t {
            return self.states[k].clone();
        }
        let (t0, t1) = (self.times[k - 1], self.times[k]);
        let w = (t - t0) / (t1 - t0);
        &self.states[k - 1] * (1.0 - w) + &self.states[k] * w
    }

    /// Column `j` is the state at `t - lags[j]`.
    fn lagged(&self, t: Real, lags: &[Real]) -> DMatrix<Real> {
        let n = self.states[0].len();
        let mut z = DMatrix::zeros(n, lags.len());
        for (j, lag) in lags.iter().enumerate() {
            z.set_column(j, &self.at(t - lag));
        }
        z
    }

    fn into_trajectory(self) -> Trajectory {
        let dim = self.states[0].len();
        let columns: Vec<Vec<Real>> = self.states.iter().map(|s| s.as_slice().to_vec()).collect();
        Trajectory::from_columns(self.times, &columns, dim)
    }
}

impl Solver for DdeRk4 {
    fn name(&self) -> &str {
        "dde-rk4"
    }

    fn as_dde(&self) -> Option<&dyn DdeSolver> {
        Some(self)
    }
}

impl DdeSolver for DdeRk4 {
    fn solve_dde(
        &self,
        rhs: &DdeFn,
        lags: &[Real],
        y0: &[Real],
        tspan: TimeSpan,
        options: &SolverOptions,
        params: &[Value],
    ) -> SolverResult<Trajectory> {
        if let Some(bad) = lags.iter().find(|l| !l.is_finite() || **l < 0.0) {
            return Err(SolverError::InvalidArg {
                what: format!("lags must be non-negative and finite, got {bad}"),
            });
        }

        // Keep the step no longer than the shortest positive lag so lagged
        // states come from accepted samples.
        let mut grid_options = options.clone();
        if options.initial_step.is_none() {
            let default_h = tspan.duration() / steps::DEFAULT_FIXED_STEPS as Real;
            let shortest = lags
                .iter()
                .copied()
                .filter(|l| *l > 0.0)
                .fold(Real::INFINITY, Real::min);
            if shortest < default_h {
                grid_options.initial_step = Some(shortest);
            }
        }

        let grid = steps::fixed_grid(tspan, &grid_options)?;
        let y = steps::initial_state(y0, tspan.t0)?;
        let n = y.len();
        let mut history = History::new(tspan.t0, y.clone());

        let mut y = y;
        for w in grid.windows(2) {
            let (t, t_next) = (w[0], w[1]);
            let f = |s: Real, ys: &DVector<Real>| {
                let z = history.lagged(s, lags);
                steps::checked(s, rhs.call(s, ys.as_slice(), &z, params), n)
            };
            y = Rk4.step(f, t, &y, t_next - t)?;
            steps::ensure_finite_state(t_next, &y)?;
            history.push(t_next, y.clone());
        }

        Ok(history.into_trajectory())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at_time(traj: &Trajectory, t: Real) -> Real {
        let k = traj
            .t
            .iter()
            .position(|s| (s - t).abs() < 1e-9)
            .unwrap();
        traj.y[(0, k)]
    }

    #[test]
    fn delayed_decay_matches_method_of_steps() {
        // y' = -y(t - 1), y = 1 for t <= 0.
        let rhs = DdeFn::new(|_, _, z, _| vec![-z[(0, 0)]]);
        let opts = SolverOptions {
            initial_step: Some(1e-3),
            ..SolverOptions::default()
        };
        let traj = DdeRk4
            .solve_dde(&rhs, &[1.0], &[1.0], TimeSpan::new(0.0, 2.0), &opts, &[])
            .unwrap();

        assert!((at_time(&traj, 0.5) - 0.5).abs() < 1e-9);
        assert!(at_time(&traj, 1.0).abs() < 1e-9);
        assert!((at_time(&traj, 2.0) + 0.5).abs() < 1e-5);
    }

    #[test]
    fn lag_matrix_has_one_column_per_lag() {
        let rhs = DdeFn::new(|_, y, z, _| {
            assert_eq!(z.ncols(), 2);
            assert_eq!(z.nrows(), y.len());
            vec![0.0; y.len()]
        });
        let traj = DdeRk4
            .solve_dde(
                &rhs,
                &[0.5, 1.0],
                &[1.0, 2.0],
                TimeSpan::new(0.0, 1.0),
                &SolverOptions::default(),
                &[],
            )
            .unwrap();
        assert_eq!(traj.y.nrows(), 2);
        assert_eq!(traj.y[(1, traj.y.ncols() - 1)], 2.0);
    }

    #[test]
    fn short_lags_shrink_the_default_step() {
        let rhs = DdeFn::new(|_, _, z, _| vec![-z[(0, 0)]]);
        let traj = DdeRk4
            .solve_dde(
                &rhs,
                &[1e-4],
                &[1.0],
                TimeSpan::new(0.0, 1.0),
                &SolverOptions::default(),
                &[],
            )
            .unwrap();
        assert_eq!(traj.t.len(), 10_001);
    }

    #[test]
    fn negative_lag_is_rejected() {
        let rhs = DdeFn::new(|_, y, _, _| y.to_vec());
        let err = DdeRk4
            .solve_dde(
                &rhs,
                &[-1.0],
                &[1.0],
                TimeSpan::new(0.0, 1.0),
                &SolverOptions::default(),
                &[],
            )
            .unwrap_err();
        assert!(matches!(err, SolverError::InvalidArg { .. }));
    }
}
