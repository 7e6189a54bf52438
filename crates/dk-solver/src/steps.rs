//! Shared plumbing for the built-in solvers: step grids and checked
//! right-hand-side evaluation.

use dk_core::{Real, Value, first_non_finite};
use dk_model::{OdeFn, SolverError, SolverOptions, SolverResult, TimeSpan};
use nalgebra::DVector;

/// Steps used by fixed-step solvers when no `initial_step` is given.
pub(crate) const DEFAULT_FIXED_STEPS: usize = 1000;

/// Step budget when `max_steps` is not given.
pub(crate) const DEFAULT_MAX_STEPS: usize = 100_000;

fn positive(what: &str, x: Real) -> SolverResult<Real> {
    if x.is_finite() && x > 0.0 {
        Ok(x)
    } else {
        Err(SolverError::InvalidArg {
            what: format!("{what} must be positive and finite, got {x}"),
        })
    }
}

pub(crate) fn check_tspan(tspan: TimeSpan) -> SolverResult<()> {
    if !tspan.t0.is_finite() || !tspan.tf.is_finite() || tspan.t0 > tspan.tf {
        return Err(SolverError::InvalidArg {
            what: format!("time span [{}, {}] is not ordered", tspan.t0, tspan.tf),
        });
    }
    Ok(())
}

/// Uniform grid over `tspan`. The last step is shortened to land on `tf`.
pub(crate) fn fixed_grid(tspan: TimeSpan, options: &SolverOptions) -> SolverResult<Vec<Real>> {
    check_tspan(tspan)?;
    let duration = tspan.duration();
    if duration == 0.0 {
        return Ok(vec![tspan.t0]);
    }

    let mut h = match options.initial_step {
        Some(h) => positive("initial_step", h)?,
        None => duration / DEFAULT_FIXED_STEPS as Real,
    };
    if let Some(max) = options.max_step {
        h = h.min(positive("max_step", max)?);
    }

    // Absorb rounding so an exact multiple does not grow a sliver step.
    let n = ((duration / h) - 1e-9).ceil().max(1.0) as usize;
    let max_steps = options.max_steps.unwrap_or(DEFAULT_MAX_STEPS);
    if n > max_steps {
        return Err(SolverError::MaxSteps {
            max_steps,
            t: tspan.t0,
        });
    }

    Ok((0..=n)
        .map(|k| {
            if k == n {
                tspan.tf
            } else {
                tspan.t0 + k as Real * h
            }
        })
        .collect())
}

pub(crate) fn initial_state(y0: &[Real], t0: Real) -> SolverResult<DVector<Real>> {
    if y0.is_empty() {
        return Err(SolverError::InvalidArg {
            what: "initial state is empty".to_string(),
        });
    }
    if y0.iter().any(|x| !x.is_finite()) {
        return Err(SolverError::NonFinite { t: t0 });
    }
    Ok(DVector::from_column_slice(y0))
}

/// Length and finiteness check of a right-hand-side result.
pub(crate) fn checked(t: Real, out: Vec<Real>, n: usize) -> SolverResult<DVector<Real>> {
    if out.len() != n {
        return Err(SolverError::Rhs {
            expected: n,
            actual: out.len(),
        });
    }
    if out.iter().any(|x| !x.is_finite()) {
        return Err(SolverError::NonFinite { t });
    }
    Ok(DVector::from_vec(out))
}

pub(crate) fn eval_ode(
    rhs: &OdeFn,
    t: Real,
    y: &DVector<Real>,
    params: &[Value],
) -> SolverResult<DVector<Real>> {
    checked(t, rhs.call(t, y.as_slice(), params), y.len())
}

pub(crate) fn ensure_finite_state(t: Real, y: &DVector<Real>) -> SolverResult<()> {
    match first_non_finite(y.as_slice()) {
        None => Ok(()),
        Some(_) => Err(SolverError::NonFinite { t }),
    }
}
