//! Solve orchestration: default resolution, family dispatch and auxiliary
//! outputs. A solve never mutates the system description it is given.

use dk_core::timing::Timer;
use dk_core::{Real, Value};
use dk_model::{
    Family, Solution, SolverError, SolverHandle, SystemDef, TimeSpan, classify, codec,
    default_solver,
};
use tracing::{debug, warn};

use crate::error::{AppError, AppResult};

/// Request to solve a system. Every field is optional.
#[derive(Debug, Clone)]
pub struct SolveRequest {
    /// Overrides the description's `tspan`.
    pub tspan: Option<TimeSpan>,
    /// Defaults to the first enumerated solver.
    pub solver: Option<SolverHandle>,
    /// Forces a family. Without it the solver is classified by declaration.
    pub family: Option<Family>,
    /// Number of values the caller expects back. Only the solution is
    /// returned, so anything above one is rejected.
    pub requested_outputs: usize,
    /// Noise seed used when `sdeoption.seed` is not set.
    pub seed: Option<u64>,
}

impl Default for SolveRequest {
    fn default() -> Self {
        Self {
            tspan: None,
            solver: None,
            family: None,
            requested_outputs: 1,
            seed: None,
        }
    }
}

impl SolveRequest {
    pub fn with_solver(solver: SolverHandle) -> Self {
        Self {
            solver: Some(solver),
            ..Self::default()
        }
    }
}

/// Solver and family a request resolves to.
pub fn resolve_solver(sys: &SystemDef, request: &SolveRequest) -> AppResult<(SolverHandle, Family)> {
    match (&request.solver, request.family) {
        (None, None) => default_solver(sys)
            .map(|entry| (entry.handle, entry.family))
            .ok_or_else(|| AppError::unsupported_solver("<none>", "the system declares no solvers")),
        (None, Some(family)) => sys
            .solvers
            .family(family)
            .first()
            .map(|handle| (handle.clone(), family))
            .ok_or_else(|| {
                AppError::unsupported_solver("<none>", format!("no {} declared", family.field()))
            }),
        (Some(handle), None) => classify(sys, handle)
            .map(|family| (handle.clone(), family))
            .ok_or_else(|| {
                AppError::unsupported_solver(
                    handle.name(),
                    "not declared in odesolver, ddesolver or sdesolver and no family was given",
                )
            }),
        (Some(handle), Some(family)) => {
            if handle.supports(family) {
                Ok((handle.clone(), family))
            } else {
                Err(AppError::unsupported_solver(
                    handle.name(),
                    format!("does not implement the {family} calling convention"),
                ))
            }
        }
    }
}

pub fn solve(sys: &SystemDef, request: &SolveRequest) -> AppResult<Solution> {
    if request.requested_outputs > 1 {
        return Err(AppError::TooManyOutputs {
            requested: request.requested_outputs,
        });
    }

    let tspan = request.tspan.unwrap_or(sys.data.tspan);
    let (handle, family) = resolve_solver(sys, request)?;
    debug!(solver = handle.name(), %family, t0 = tspan.t0, tf = tspan.tf, "solving");

    let timer = Timer::start("solve");
    let y0 = codec::flatten(&sys.data.vardef);
    let params = sys.param_values();
    let vars = codec::index_map(&sys.data.vardef);
    let solver_err = |source: SolverError| AppError::Solver {
        solver: handle.name().to_string(),
        source,
    };
    let missing = |function: &str| {
        AppError::unsupported_solver(
            handle.name(),
            format!("{family} family needs {function}, which the system does not declare"),
        )
    };
    let convention = || {
        AppError::unsupported_solver(
            handle.name(),
            format!("does not implement the {family} calling convention"),
        )
    };

    let mut solution = match family {
        Family::Ode => {
            let rhs = sys.functions.odefun.as_ref().ok_or_else(|| missing("odefun"))?;
            let solver = handle.solver().as_ode().ok_or_else(convention)?;
            let traj = solver
                .solve_ode(rhs, tspan, &y0, &sys.data.odeoption, &params)
                .map_err(solver_err)?;
            Solution::new(family, handle.name(), traj, vars)
        }
        Family::Dde => {
            let rhs = sys.functions.ddefun.as_ref().ok_or_else(|| missing("ddefun"))?;
            let solver = handle.solver().as_dde().ok_or_else(convention)?;
            let lags = codec::flatten(&sys.data.lagdef);
            let traj = solver
                .solve_dde(rhs, &lags, &y0, tspan, &sys.data.ddeoption, &params)
                .map_err(solver_err)?;
            Solution::new(family, handle.name(), traj, vars)
        }
        Family::Sde => {
            let drift = sys.functions.odefun.as_ref().ok_or_else(|| missing("odefun"))?;
            let diffusion = sys.functions.sdefun.as_ref().ok_or_else(|| missing("sdefun"))?;
            let solver = handle.solver().as_sde().ok_or_else(convention)?;
            let mut options = sys.data.sdeoption.clone();
            options.seed = options.seed.or(request.seed);
            options.noise_sources = Some(sys.noise_sources());
            let out = solver
                .solve_sde(drift, diffusion, tspan, &y0, &options, &params)
                .map_err(solver_err)?;
            let mut solution = Solution::new(family, handle.name(), out.trajectory, vars);
            solution.dw = Some(out.dw);
            solution
        }
    };

    attach_aux(sys, &mut solution, &params);
    let elapsed = timer.stop_and_log();
    debug!(samples = solution.len(), elapsed_s = elapsed, "solve finished");
    Ok(solution)
}

/// Evaluate the auxiliary function, if any. A failure is recorded on the
/// solution and never discards the primary trajectory.
fn attach_aux(sys: &SystemDef, solution: &mut Solution, params: &[Value]) {
    let Some(auxfun) = &sys.functions.auxfun else {
        return;
    };
    let auxmap = codec::index_map(&sys.data.auxdef);
    match auxfun.call(solution, params) {
        Ok(aux) if aux.nrows() == auxmap.len() && aux.ncols() == solution.len() => {
            solution.aux = Some(aux);
            solution.auxmap = Some(auxmap);
        }
        Ok(aux) => {
            let message = format!(
                "auxfun returned a {}x{} matrix, expected {}x{}",
                aux.nrows(),
                aux.ncols(),
                auxmap.len(),
                solution.len()
            );
            warn!(%message, "discarding auxiliary outputs");
            solution.aux_error = Some(message);
        }
        Err(err) => {
            warn!(error = %err, "auxiliary function failed");
            solution.aux_error = Some(err.to_string());
        }
    }
}

/// Final state of a solution as a `vardef`-shaped flat vector.
pub fn final_state(solution: &Solution) -> AppResult<Vec<Real>> {
    solution
        .final_state()
        .ok_or_else(|| AppError::InvalidInput("solution has no samples".to_string()))
}
