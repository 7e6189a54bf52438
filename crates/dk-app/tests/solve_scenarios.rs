//! End-to-end solve scenarios through the dk-app service layer.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use dk_core::{Real, Value};
use dk_model::{
    Family, OdeFn, OdeSolver, RawSystem, Solver, SolverError, SolverHandle, SolverOptions,
    SolverResult, SystemDef, TimeSpan, Trajectory, find_by_name, validate,
};
use dk_solver::{Euler, Rk4};
use proptest::prelude::*;
use serde_json::json;

use dk_app::{AppError, SolveRequest, series_by_label, solve};

fn growth(k: Real) -> SystemDef {
    let raw = RawSystem::new(json!({
        "pardef": [{"name": "k", "value": k}],
        "vardef": [{"name": "y", "value": 1.0}],
        "tspan": [0, 1]
    }))
    .odefun(|_, y, p| vec![p[0].first() * y[0]])
    .solver(Family::Ode, SolverHandle::new(Rk4));
    validate(&raw).expect("growth model validates")
}

#[test]
fn fixed_step_growth_reaches_e_squared() {
    let sys = growth(2.0);
    let rk4 = find_by_name(&sys, "rk4", Some(Family::Ode)).unwrap();
    let sol = solve(&sys, &SolveRequest::with_solver(rk4.handle)).unwrap();

    assert_eq!(sol.t.first(), Some(&0.0));
    assert_eq!(sol.t.last(), Some(&1.0));
    let y_end = sol.final_state().unwrap()[0];
    assert!((y_end - 2.0_f64.exp()).abs() < 1e-6, "y(1) = {y_end}");

    let series = series_by_label(&sol, "y").unwrap();
    assert_eq!(series.len(), sol.len());
}

/// Solver that counts how often it is asked to integrate.
struct Counting(Arc<AtomicUsize>);

impl Solver for Counting {
    fn name(&self) -> &str {
        "counting"
    }

    fn as_ode(&self) -> Option<&dyn OdeSolver> {
        Some(self)
    }
}

impl OdeSolver for Counting {
    fn solve_ode(
        &self,
        _rhs: &OdeFn,
        tspan: TimeSpan,
        y0: &[Real],
        _options: &SolverOptions,
        _params: &[Value],
    ) -> SolverResult<Trajectory> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(Trajectory::from_columns(
            vec![tspan.t0],
            &[y0.to_vec()],
            y0.len(),
        ))
    }
}

#[test]
fn undeclared_solver_without_family_is_unsupported_and_never_runs() {
    let sys = growth(2.0);
    let calls = Arc::new(AtomicUsize::new(0));
    let stranger = SolverHandle::new(Counting(Arc::clone(&calls)));

    let err = solve(&sys, &SolveRequest::with_solver(stranger.clone())).unwrap_err();
    assert!(err.is_unsupported_solver(), "{err}");
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    // Stating the family is enough to use it.
    let request = SolveRequest {
        family: Some(Family::Ode),
        ..SolveRequest::with_solver(stranger)
    };
    let sol = solve(&sys, &request).unwrap();
    assert_eq!(sol.solver, "counting");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn solver_failure_names_the_solver() {
    // Euler at k = 1e5 grows by 101x per step and overflows long before t = 1.
    let sys = growth(1e5);
    let request = SolveRequest {
        family: Some(Family::Ode),
        ..SolveRequest::with_solver(SolverHandle::new(Euler))
    };
    match solve(&sys, &request).unwrap_err() {
        AppError::Solver { solver, source } => {
            assert_eq!(solver, "euler");
            assert!(matches!(source, SolverError::NonFinite { .. }), "{source}");
        }
        other => panic!("expected a solver failure, got {other}"),
    }
}

proptest! {
    #[test]
    fn solving_never_changes_the_description(k in -3.0_f64..3.0, tf in 0.1_f64..2.0) {
        let sys = growth(k);
        let before = sys.clone();
        let request = SolveRequest {
            tspan: Some(TimeSpan::new(0.0, tf)),
            ..SolveRequest::default()
        };
        let sol = solve(&sys, &request).unwrap();
        prop_assert_eq!(sol.t.last().copied(), Some(tf));
        prop_assert_eq!(&sys, &before);
    }
}
