//! Fixed-step explicit ODE integrators.

use dk_core::{Real, Value};
use dk_model::{OdeFn, OdeSolver, Solver, SolverOptions, SolverResult, TimeSpan, Trajectory};
use nalgebra::DVector;

use crate::steps;

/// One explicit step of a time integrator.
pub trait Integrator {
    /// Advance `y` from `t` by `dt` using the derivative `f`.
    fn step<F>(&self, f: F, t: Real, y: &DVector<Real>, dt: Real) -> SolverResult<DVector<Real>>
    where
        F: Fn(Real, &DVector<Real>) -> SolverResult<DVector<Real>>;
}

/// Forward Euler (explicit, 1st order).
#[derive(Clone, Copy, Debug, Default)]
pub struct Euler;

impl Integrator for Euler {
    fn step<F>(&self, f: F, t: Real, y: &DVector<Real>, dt: Real) -> SolverResult<DVector<Real>>
    where
        F: Fn(Real, &DVector<Real>) -> SolverResult<DVector<Real>>,
    {
        let ydot = f(t, y)?;
        Ok(y + ydot * dt)
    }
}

/// Classical RK4 (Runge-Kutta 4th order).
#[derive(Clone, Copy, Debug, Default)]
pub struct Rk4;

impl Integrator for Rk4 {
    fn step<F>(&self, f: F, t: Real, y: &DVector<Real>, dt: Real) -> SolverResult<DVector<Real>>
    where
        F: Fn(Real, &DVector<Real>) -> SolverResult<DVector<Real>>,
    {
        let half = 0.5 * dt;
        let k1 = f(t, y)?;
        let k2 = f(t + half, &(y + &k1 * half))?;
        let k3 = f(t + half, &(y + &k2 * half))?;
        let k4 = f(t + dt, &(y + &k3 * dt))?;

        // y + dt/6 * (k1 + 2 k2 + 2 k3 + k4)
        Ok(y + (k1 + k2 * 2.0 + k3 * 2.0 + k4) * (dt / 6.0))
    }
}

/// March `f` across `grid` with `integrator`, sampling every grid point.
pub(crate) fn march<I, F>(
    integrator: &I,
    f: F,
    grid: Vec<Real>,
    y0: DVector<Real>,
) -> SolverResult<Trajectory>
where
    I: Integrator,
    F: Fn(Real, &DVector<Real>) -> SolverResult<DVector<Real>>,
{
    let dim = y0.len();
    let mut columns = Vec::with_capacity(grid.len());
    let mut y = y0;
    columns.push(y.as_slice().to_vec());
    for w in grid.windows(2) {
        let (t, t_next) = (w[0], w[1]);
        y = integrator.step(&f, t, &y, t_next - t)?;
        steps::ensure_finite_state(t_next, &y)?;
        columns.push(y.as_slice().to_vec());
    }
    Ok(Trajectory::from_columns(grid, &columns, dim))
}

fn solve_fixed<I: Integrator>(
    integrator: &I,
    rhs: &OdeFn,
    tspan: TimeSpan,
    y0: &[Real],
    options: &SolverOptions,
    params: &[Value],
) -> SolverResult<Trajectory> {
    let grid = steps::fixed_grid(tspan, options)?;
    let y0 = steps::initial_state(y0, tspan.t0)?;
    march(integrator, |t, y| steps::eval_ode(rhs, t, y, params), grid, y0)
}

impl Solver for Euler {
    fn name(&self) -> &str {
        "euler"
    }

    fn as_ode(&self) -> Option<&dyn OdeSolver> {
        Some(self)
    }
}

impl OdeSolver for Euler {
    fn solve_ode(
        &self,
        rhs: &OdeFn,
        tspan: TimeSpan,
        y0: &[Real],
        options: &SolverOptions,
        params: &[Value],
    ) -> SolverResult<Trajectory> {
        solve_fixed(self, rhs, tspan, y0, options, params)
    }
}

impl Solver for Rk4 {
    fn name(&self) -> &str {
        "rk4"
    }

    fn as_ode(&self) -> Option<&dyn OdeSolver> {
        Some(self)
    }
}

impl OdeSolver for Rk4 {
    fn solve_ode(
        &self,
        rhs: &OdeFn,
        tspan: TimeSpan,
        y0: &[Real],
        options: &SolverOptions,
        params: &[Value],
    ) -> SolverResult<Trajectory> {
        solve_fixed(self, rhs, tspan, y0, options, params)
    }
}
