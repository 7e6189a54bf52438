//! Interactive session over one system description.
//!
//! The session owns the current description, the selected solver, the halt
//! flag and the latest solution. Every edit is atomic: while running, the
//! edited description is solved first and committed only if the solve
//! succeeds. While halted, edits are committed and the solution is marked
//! stale until the halt flag is cleared.

use dk_core::{Real, Value};
use dk_model::{
    Bounds, CollectionKind, Family, Solution, SolverHandle, SystemDef, TimeSpan, codec,
};
use tracing::{debug, info};

use crate::error::{AppError, AppResult};
use crate::orchestrate::{self, SolveRequest};

pub struct Session {
    sys: SystemDef,
    solver: SolverHandle,
    family: Family,
    halted: bool,
    stale: bool,
    solution: Option<Solution>,
    seed: Option<u64>,
}

impl Session {
    /// Open a session with the default solver and solve once.
    pub fn new(sys: SystemDef) -> AppResult<Self> {
        Self::with_solver(sys, None, None)
    }

    /// Open a session with an explicit solver and/or family, then solve once.
    pub fn with_solver(
        sys: SystemDef,
        solver: Option<SolverHandle>,
        family: Option<Family>,
    ) -> AppResult<Self> {
        let request = SolveRequest {
            solver,
            family,
            ..SolveRequest::default()
        };
        let (solver, family) = orchestrate::resolve_solver(&sys, &request)?;

        // Fix the noise realisation for the whole session so that editing a
        // parameter does not also resample the noise.
        let seed = match (&sys.functions.sdefun, sys.data.sdeoption.seed) {
            (Some(_), None) => Some(rand::random::<u64>()),
            _ => None,
        };

        let mut session = Self {
            sys,
            solver,
            family,
            halted: false,
            stale: true,
            solution: None,
            seed,
        };
        session.refresh()?;
        Ok(session)
    }

    pub fn system(&self) -> &SystemDef {
        &self.sys
    }

    pub fn solver(&self) -> &SolverHandle {
        &self.solver
    }

    pub fn family(&self) -> Family {
        self.family
    }

    pub fn seed(&self) -> Option<u64> {
        self.seed
    }

    /// Latest solution. It may be stale while halted.
    pub fn solution(&self) -> Option<&Solution> {
        self.solution.as_ref()
    }

    /// True when the description changed after the last solve.
    pub fn is_stale(&self) -> bool {
        self.stale
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// Set or clear the halt flag. Clearing it re-solves a stale session.
    pub fn set_halt(&mut self, halt: bool) -> AppResult<()> {
        self.halted = halt;
        debug!(halt, "halt flag changed");
        if !halt && self.stale {
            self.refresh()?;
        }
        Ok(())
    }

    /// Solve the current description again.
    pub fn refresh(&mut self) -> AppResult<&Solution> {
        if self.halted {
            return Err(AppError::Halted);
        }
        let solution = orchestrate::solve(&self.sys, &self.request(&self.solver, self.family))?;
        self.stale = false;
        Ok(self.solution.insert(solution))
    }

    fn request(&self, solver: &SolverHandle, family: Family) -> SolveRequest {
        SolveRequest {
            solver: Some(solver.clone()),
            family: Some(family),
            seed: self.seed,
            ..SolveRequest::default()
        }
    }

    /// Commit a candidate description, solving it first unless halted.
    fn commit(&mut self, candidate: SystemDef) -> AppResult<()> {
        if self.halted {
            self.sys = candidate;
            self.stale = true;
            return Ok(());
        }
        let solution = orchestrate::solve(&candidate, &self.request(&self.solver, self.family))?;
        self.sys = candidate;
        self.solution = Some(solution);
        self.stale = false;
        Ok(())
    }

    pub fn set_value(&mut self, kind: CollectionKind, name: &str, value: Value) -> AppResult<()> {
        let candidate = self.sys.set(kind, name, value)?;
        self.commit(candidate)
    }

    pub fn set_param(&mut self, name: &str, value: Value) -> AppResult<()> {
        self.set_value(CollectionKind::Par, name, value)
    }

    pub fn set_var(&mut self, name: &str, value: Value) -> AppResult<()> {
        self.set_value(CollectionKind::Var, name, value)
    }

    /// Lags must be non-negative. The check lives in the store, so it also
    /// covers `set_value` and `set_element` edits of `lagdef`.
    pub fn set_lag(&mut self, name: &str, value: Value) -> AppResult<()> {
        self.set_value(CollectionKind::Lag, name, value)
    }

    /// Edit one element of a multi-element entry.
    pub fn set_element(
        &mut self,
        kind: CollectionKind,
        name: &str,
        offset: usize,
        x: Real,
    ) -> AppResult<()> {
        let updated = codec::set_element(self.sys.collection(kind), name, offset, x)?;
        let candidate = self.sys.with_collection(updated);
        self.commit(candidate)
    }

    /// Limits never affect the trajectory, so bound edits do not re-solve.
    pub fn set_bounds(&mut self, kind: CollectionKind, name: &str, bounds: Bounds) -> AppResult<()> {
        let updated = self.sys.collection(kind).set_bounds(name, bounds)?;
        self.sys = self.sys.with_collection(updated);
        Ok(())
    }

    pub fn set_min(&mut self, kind: CollectionKind, name: &str, min: Real) -> AppResult<()> {
        let updated = self.sys.collection(kind).set_min(name, min)?;
        self.sys = self.sys.with_collection(updated);
        Ok(())
    }

    pub fn set_max(&mut self, kind: CollectionKind, name: &str, max: Real) -> AppResult<()> {
        let updated = self.sys.collection(kind).set_max(name, max)?;
        self.sys = self.sys.with_collection(updated);
        Ok(())
    }

    /// Change the integration window. `tval` is pulled inside the new window.
    pub fn set_tspan(&mut self, tspan: TimeSpan) -> AppResult<()> {
        if !tspan.t0.is_finite() || !tspan.tf.is_finite() || tspan.t0 > tspan.tf {
            return Err(AppError::InvalidInput(format!(
                "time span [{}, {}] must be finite with t0 <= tf",
                tspan.t0, tspan.tf
            )));
        }
        let mut candidate = self.sys.clone();
        candidate.data.tspan = tspan;
        candidate.data.tval = candidate.data.tval.clamp(tspan.t0, tspan.tf);
        self.commit(candidate)
    }

    /// Move the transient cutoff. Presentation only, no re-solve.
    pub fn set_tval(&mut self, tval: Real) -> AppResult<()> {
        let TimeSpan { t0, tf } = self.sys.data.tspan;
        if !(t0..=tf).contains(&tval) {
            return Err(AppError::InvalidInput(format!(
                "tval {tval} lies outside [{t0}, {tf}]"
            )));
        }
        self.sys.data.tval = tval;
        Ok(())
    }

    /// Switch solver. The new solver is used for the next solve; while
    /// running that happens immediately and the switch is undone on failure.
    pub fn select_solver(&mut self, solver: SolverHandle, family: Option<Family>) -> AppResult<()> {
        let request = SolveRequest {
            solver: Some(solver),
            family,
            ..SolveRequest::default()
        };
        let (solver, family) = orchestrate::resolve_solver(&self.sys, &request)?;
        if self.halted {
            self.solver = solver;
            self.family = family;
            self.stale = true;
            return Ok(());
        }
        let solution = orchestrate::solve(&self.sys, &self.request(&solver, family))?;
        info!(solver = solver.name(), %family, "solver selected");
        self.solver = solver;
        self.family = family;
        self.solution = Some(solution);
        self.stale = false;
        Ok(())
    }

    /// Restart from where the current solution ended: the final state
    /// becomes the initial condition and the system is solved again.
    pub fn evolve(&mut self) -> AppResult<()> {
        if self.stale {
            return Err(AppError::InvalidInput(
                "the current solution is stale; clear the halt flag first".to_string(),
            ));
        }
        let solution = self
            .solution
            .as_ref()
            .ok_or_else(|| AppError::InvalidInput("no solution to evolve from".to_string()))?;
        let y_end = orchestrate::final_state(solution)?;
        let vardef = self.sys.data.vardef.set_all(&y_end)?;
        let candidate = self.sys.with_collection(vardef);
        self.commit(candidate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dk_model::{ModelError, RawSystem, validate};
    use dk_solver::Rk4;
    use serde_json::json;

    fn decay() -> SystemDef {
        let raw = RawSystem::new(json!({
            "pardef": [{"name": "k", "value": -1.0, "lim": [-5, 0]}],
            "vardef": [{"name": "y", "value": 1.0}],
            "tspan": [0, 1]
        }))
        .odefun(|_, y, p| vec![p[0].first() * y[0]])
        .solver(Family::Ode, SolverHandle::new(Rk4));
        validate(&raw).unwrap()
    }

    fn last(session: &Session) -> Real {
        session.solution().unwrap().final_state().unwrap()[0]
    }

    #[test]
    fn opens_with_a_solution() {
        let session = Session::new(decay()).unwrap();
        assert!(!session.is_stale());
        assert!((last(&session) - (-1.0_f64).exp()).abs() < 1e-9);
    }

    #[test]
    fn edit_re_solves() {
        let mut session = Session::new(decay()).unwrap();
        session.set_param("k", Value::scalar(-2.0)).unwrap();
        assert!((last(&session) - (-2.0_f64).exp()).abs() < 1e-9);
    }

    #[test]
    fn failed_edit_leaves_state_untouched() {
        let mut session = Session::new(decay()).unwrap();
        let before = session.system().clone();
        assert!(session.set_param("nope", Value::scalar(1.0)).is_err());
        assert!(session.set_param("k", Value::scalar(1e6)).is_err());
        assert_eq!(session.system(), &before);
        assert!((last(&session) - (-1.0_f64).exp()).abs() < 1e-9);
    }

    #[test]
    fn halted_edits_commit_and_go_stale() {
        let mut session = Session::new(decay()).unwrap();
        session.set_halt(true).unwrap();
        session.set_param("k", Value::scalar(0.0)).unwrap();
        assert!(session.is_stale());
        assert!(matches!(session.refresh(), Err(AppError::Halted)));
        assert!((last(&session) - (-1.0_f64).exp()).abs() < 1e-9);

        session.set_halt(false).unwrap();
        assert!(!session.is_stale());
        assert!((last(&session) - 1.0).abs() < 1e-12);
    }

    fn delayed_decay() -> SystemDef {
        let raw = RawSystem::new(json!({
            "vardef": [{"name": "y", "value": 1.0}],
            "lagdef": [{"name": "tau", "value": [0.5, 1.0]}],
            "tspan": [0, 1]
        }))
        .ddefun(|_, _, z, _| vec![-z[(0, 0)] - z[(0, 1)]])
        .solver(Family::Dde, SolverHandle::new(dk_solver::DdeRk4));
        validate(&raw).unwrap()
    }

    #[test]
    fn negative_lags_are_rejected_on_every_edit_path_while_halted() {
        let mut session = Session::new(delayed_decay()).unwrap();
        session.set_halt(true).unwrap();
        let before = session.system().clone();

        let err = session
            .set_element(CollectionKind::Lag, "tau", 1, -1.0)
            .unwrap_err();
        assert!(matches!(
            err,
            AppError::Model(ModelError::InvalidValue { ref field, .. }) if field == "lagdef.tau"
        ));
        let row = Value::row(vec![-0.5, 1.0]).unwrap();
        assert!(
            session
                .set_value(CollectionKind::Lag, "tau", row.clone())
                .is_err()
        );
        assert!(session.set_lag("tau", row).is_err());

        assert_eq!(session.system(), &before);
        assert!(!session.is_stale());
        validate(&session.system().to_raw().unwrap()).unwrap();

        session.set_element(CollectionKind::Lag, "tau", 1, 0.0).unwrap();
        session.set_halt(false).unwrap();
        assert!(!session.is_stale());
    }

    #[test]
    fn non_finite_edits_never_reach_the_solver() {
        let mut session = Session::new(decay()).unwrap();
        let err = session.set_param("k", Value::scalar(f64::NAN)).unwrap_err();
        assert!(matches!(err, AppError::Model(ModelError::InvalidValue { .. })));
        assert!(
            session
                .set_element(CollectionKind::Var, "y", 0, f64::INFINITY)
                .is_err()
        );
    }

    #[test]
    fn evolve_continues_from_final_state() {
        let mut session = Session::new(decay()).unwrap();
        session.evolve().unwrap();
        let y0 = session.system().get(CollectionKind::Var, "y").unwrap().first();
        assert!((y0 - (-1.0_f64).exp()).abs() < 1e-9);
        assert!((last(&session) - (-2.0_f64).exp()).abs() < 1e-9);
    }

    #[test]
    fn bounds_edits_do_not_cross_or_resolve() {
        let mut session = Session::new(decay()).unwrap();
        session.set_min(CollectionKind::Par, "k", 1.0).unwrap();
        let b = session
            .system()
            .collection(CollectionKind::Par)
            .get_bounds("k")
            .unwrap();
        assert_eq!(b, Bounds::new(1.0, 1.0));
    }

    #[test]
    fn tspan_and_tval() {
        let mut session = Session::new(decay()).unwrap();
        session.set_tval(0.5).unwrap();
        assert!(session.set_tval(2.0).is_err());
        session.set_tspan(TimeSpan::new(0.0, 0.25)).unwrap();
        assert_eq!(session.system().data.tval, 0.25);
        assert_eq!(session.solution().unwrap().t.last(), Some(&0.25));
        assert!(session.set_tspan(TimeSpan::new(1.0, 0.0)).is_err());
    }
}
