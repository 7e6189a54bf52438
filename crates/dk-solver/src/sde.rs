//! Fixed-step stochastic solvers.
//!
//! Noise increments are drawn up front from a seeded `StdRng`, one column
//! per step, so both schemes see the same Wiener path for the same seed.

use dk_core::{Real, Value};
use dk_model::{
    OdeFn, SdeFn, SdeOptions, SdeSolver, SdeTrajectory, Solver, SolverError, SolverResult,
    TimeSpan, Trajectory,
};
use nalgebra::{DMatrix, DVector};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, StandardNormal};
use tracing::debug;

use crate::steps;

/// Euler-Maruyama (Ito, strong order 1/2).
#[derive(Clone, Copy, Debug, Default)]
pub struct EulerMaruyama;

/// Stochastic Heun (Stratonovich, strong order 1/2 for multiplicative noise).
#[derive(Clone, Copy, Debug, Default)]
pub struct StratonovichHeun;

/// Wiener increments for each step of `grid`: `m` rows, one column per step.
pub fn wiener_increments(grid: &[Real], m: usize, seed: Option<u64>) -> DMatrix<Real> {
    let mut rng = match seed {
        Some(s) => StdRng::seed_from_u64(s),
        None => StdRng::from_entropy(),
    };
    let steps = grid.len().saturating_sub(1);
    let mut dw = DMatrix::zeros(m, steps);
    for (j, w) in grid.windows(2).enumerate() {
        let scale = (w[1] - w[0]).sqrt();
        for i in 0..m {
            let z: Real = StandardNormal.sample(&mut rng);
            dw[(i, j)] = z * scale;
        }
    }
    dw
}

/// Checked diffusion evaluation: must be `n` x `m`.
fn diffusion_at(
    diffusion: &SdeFn,
    t: Real,
    y: &DVector<Real>,
    params: &[Value],
    m: usize,
) -> SolverResult<DMatrix<Real>> {
    let g = diffusion.call(t, y.as_slice(), params);
    if g.nrows() != y.len() || g.ncols() != m {
        return Err(SolverError::InvalidArg {
            what: format!(
                "diffusion returned a {}x{} matrix, expected {}x{}",
                g.nrows(),
                g.ncols(),
                y.len(),
                m
            ),
        });
    }
    if g.iter().any(|x| !x.is_finite()) {
        return Err(SolverError::NonFinite { t });
    }
    Ok(g)
}

/// Shared driver; `step` advances one increment given `(t, y, h, dW)`.
fn integrate<S>(
    name: &str,
    tspan: TimeSpan,
    y0: &[Real],
    options: &SdeOptions,
    step: S,
) -> SolverResult<SdeTrajectory>
where
    S: Fn(Real, &DVector<Real>, Real, &DVector<Real>) -> SolverResult<DVector<Real>>,
{
    let grid = steps::fixed_grid(tspan, &options.common)?;
    let mut y = steps::initial_state(y0, tspan.t0)?;
    let dim = y.len();
    let m = options.noise_sources.unwrap_or(dim);
    if m == 0 {
        return Err(SolverError::InvalidArg {
            what: "noise_sources must be at least 1".to_string(),
        });
    }

    let dw = wiener_increments(&grid, m, options.seed);
    debug!(
        solver = name,
        steps = dw.ncols(),
        noise_sources = m,
        seeded = options.seed.is_some(),
        "drew wiener increments"
    );

    let mut columns = Vec::with_capacity(grid.len());
    columns.push(y.as_slice().to_vec());
    for (j, w) in grid.windows(2).enumerate() {
        let (t, t_next) = (w[0], w[1]);
        let dwj: DVector<Real> = dw.column(j).into_owned();
        y = step(t, &y, t_next - t, &dwj)?;
        steps::ensure_finite_state(t_next, &y)?;
        columns.push(y.as_slice().to_vec());
    }

    Ok(SdeTrajectory {
        trajectory: Trajectory::from_columns(grid, &columns, dim),
        dw,
    })
}

impl Solver for EulerMaruyama {
    fn name(&self) -> &str {
        "euler-maruyama"
    }

    fn as_sde(&self) -> Option<&dyn SdeSolver> {
        Some(self)
    }
}

impl SdeSolver for EulerMaruyama {
    fn solve_sde(
        &self,
        drift: &OdeFn,
        diffusion: &SdeFn,
        tspan: TimeSpan,
        y0: &[Real],
        options: &SdeOptions,
        params: &[Value],
    ) -> SolverResult<SdeTrajectory> {
        let m = options.noise_sources.unwrap_or(y0.len());
        integrate(self.name(), tspan, y0, options, |t, y, h, dw| {
            let f = steps::eval_ode(drift, t, y, params)?;
            let g = diffusion_at(diffusion, t, y, params, m)?;
            Ok(y + f * h + g * dw)
        })
    }
}

impl Solver for StratonovichHeun {
    fn name(&self) -> &str {
        "stratonovich-heun"
    }

    fn as_sde(&self) -> Option<&dyn SdeSolver> {
        Some(self)
    }
}

impl SdeSolver for StratonovichHeun {
    fn solve_sde(
        &self,
        drift: &OdeFn,
        diffusion: &SdeFn,
        tspan: TimeSpan,
        y0: &[Real],
        options: &SdeOptions,
        params: &[Value],
    ) -> SolverResult<SdeTrajectory> {
        let m = options.noise_sources.unwrap_or(y0.len());
        integrate(self.name(), tspan, y0, options, |t, y, h, dw| {
            let f0 = steps::eval_ode(drift, t, y, params)?;
            let g0 = diffusion_at(diffusion, t, y, params, m)?;
            let predictor = y + &f0 * h + &g0 * dw;

            let t1 = t + h;
            let f1 = steps::eval_ode(drift, t1, &predictor, params)?;
            let g1 = diffusion_at(diffusion, t1, &predictor, params, m)?;
            Ok(y + (f0 + f1) * (0.5 * h) + (g0 + g1) * dw * 0.5)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dk_model::SolverOptions;

    fn ou() -> (OdeFn, SdeFn) {
        let drift = OdeFn::new(|_, y, p| vec![-p[0].first() * y[0]]);
        let diffusion = SdeFn::new(|_, _, p| DMatrix::from_element(1, 1, p[1].first()));
        (drift, diffusion)
    }

    fn options(seed: Option<u64>) -> SdeOptions {
        SdeOptions {
            noise_sources: Some(1),
            seed,
            common: SolverOptions {
                initial_step: Some(0.01),
                ..SolverOptions::default()
            },
        }
    }

    #[test]
    fn seeded_runs_are_reproducible() {
        let (drift, diffusion) = ou();
        let params = [Value::scalar(1.0), Value::scalar(0.5)];
        let a = EulerMaruyama
            .solve_sde(&drift, &diffusion, TimeSpan::new(0.0, 1.0), &[1.0], &options(Some(7)), &params)
            .unwrap();
        let b = EulerMaruyama
            .solve_sde(&drift, &diffusion, TimeSpan::new(0.0, 1.0), &[1.0], &options(Some(7)), &params)
            .unwrap();
        assert_eq!(a, b);
        assert_eq!(a.dw.nrows(), 1);
        assert_eq!(a.dw.ncols(), a.trajectory.t.len() - 1);
    }

    #[test]
    fn different_seeds_differ() {
        let (drift, diffusion) = ou();
        let params = [Value::scalar(1.0), Value::scalar(0.5)];
        let a = EulerMaruyama
            .solve_sde(&drift, &diffusion, TimeSpan::new(0.0, 1.0), &[1.0], &options(Some(1)), &params)
            .unwrap();
        let b = EulerMaruyama
            .solve_sde(&drift, &diffusion, TimeSpan::new(0.0, 1.0), &[1.0], &options(Some(2)), &params)
            .unwrap();
        assert_ne!(a.dw, b.dw);
    }

    #[test]
    fn zero_noise_reduces_to_euler() {
        let (drift, diffusion) = ou();
        let params = [Value::scalar(1.0), Value::scalar(0.0)];
        let sol = EulerMaruyama
            .solve_sde(&drift, &diffusion, TimeSpan::new(0.0, 1.0), &[1.0], &options(Some(3)), &params)
            .unwrap();
        let expected = 0.99_f64.powi(100);
        let last = sol.trajectory.y[(0, sol.trajectory.y.ncols() - 1)];
        assert!((last - expected).abs() < 1e-12);
    }

    #[test]
    fn schemes_share_the_wiener_path() {
        let (drift, diffusion) = ou();
        let params = [Value::scalar(1.0), Value::scalar(0.5)];
        let em = EulerMaruyama
            .solve_sde(&drift, &diffusion, TimeSpan::new(0.0, 1.0), &[1.0], &options(Some(11)), &params)
            .unwrap();
        let heun = StratonovichHeun
            .solve_sde(&drift, &diffusion, TimeSpan::new(0.0, 1.0), &[1.0], &options(Some(11)), &params)
            .unwrap();
        assert_eq!(em.dw, heun.dw);
    }

    #[test]
    fn diffusion_shape_is_checked() {
        let drift = OdeFn::new(|_, y, _| vec![0.0; y.len()]);
        let diffusion = SdeFn::new(|_, _, _| DMatrix::zeros(1, 3));
        let err = EulerMaruyama
            .solve_sde(&drift, &diffusion, TimeSpan::new(0.0, 1.0), &[1.0], &options(Some(0)), &[])
            .unwrap_err();
        assert!(matches!(err, SolverError::InvalidArg { .. }));
    }

    #[test]
    fn increments_have_unit_variance_per_time() {
        let grid: Vec<Real> = (0..=20_000).map(|k| k as Real * 0.01).collect();
        let dw = wiener_increments(&grid, 1, Some(42));
        let n = dw.ncols() as Real;
        let mean = dw.iter().sum::<Real>() / n;
        let var = dw.iter().map(|x| (x - mean).powi(2)).sum::<Real>() / n;
        assert!(mean.abs() < 5e-3);
        assert!((var / 0.01 - 1.0).abs() < 0.05);
    }
}
