//! Numerical solver contract.
//!
//! A system description declares the solvers it can be integrated with,
//! grouped by family. Each family has its own calling convention; a solver
//! object opts into a convention by returning itself from `as_ode`,
//! `as_dde` or `as_sde`.

use std::fmt;
use std::sync::Arc;

use dk_core::{Real, Value};
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::functions::{DdeFn, OdeFn, SdeFn};
use crate::schema::{SdeOptions, SolverOptions, TimeSpan};

/// Errors raised by numerical solvers.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SolverError {
    #[error("Invalid argument: {what}")]
    InvalidArg { what: String },

    #[error("Right-hand side returned {actual} values, expected {expected}")]
    Rhs { expected: usize, actual: usize },

    #[error("Non-finite state at t={t}")]
    NonFinite { t: Real },

    #[error("Step size underflow at t={t} (h={h:e})")]
    StepSizeUnderflow { t: Real, h: Real },

    #[error("Maximum number of steps ({max_steps}) reached at t={t}")]
    MaxSteps { max_steps: usize, t: Real },
}

pub type SolverResult<T> = Result<T, SolverError>;

/// Solver family, named after the description field that declares it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Family {
    Ode,
    Dde,
    Sde,
}

impl Family {
    /// Enumeration order: odesolver, ddesolver, sdesolver.
    pub const ALL: [Family; 3] = [Family::Ode, Family::Dde, Family::Sde];

    pub fn field(self) -> &'static str {
        match self {
            Family::Ode => "odesolver",
            Family::Dde => "ddesolver",
            Family::Sde => "sdesolver",
        }
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Family::Ode => "ode",
            Family::Dde => "dde",
            Family::Sde => "sde",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for Family {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ode" | "odesolver" => Ok(Family::Ode),
            "dde" | "ddesolver" => Ok(Family::Dde),
            "sde" | "sdesolver" => Ok(Family::Sde),
            other => Err(format!("unknown solver family '{other}'")),
        }
    }
}

/// Sampled trajectory: `y` has one row per state element, one column per time.
#[derive(Debug, Clone, PartialEq)]
pub struct Trajectory {
    pub t: Vec<Real>,
    pub y: DMatrix<Real>,
}

impl Trajectory {
    /// Assemble from per-sample state columns.
    pub fn from_columns(t: Vec<Real>, columns: &[Vec<Real>], dim: usize) -> Self {
        let mut y = DMatrix::zeros(dim, columns.len());
        for (j, col) in columns.iter().enumerate() {
            for (i, &x) in col.iter().enumerate().take(dim) {
                y[(i, j)] = x;
            }
        }
        Self { t, y }
    }
}

/// SDE trajectory plus the Wiener increments used (m rows, one column per step).
#[derive(Debug, Clone, PartialEq)]
pub struct SdeTrajectory {
    pub trajectory: Trajectory,
    pub dw: DMatrix<Real>,
}

/// `(rhs, tspan, Y0, options, params...) -> trajectory`
pub trait OdeSolver {
    fn solve_ode(
        &self,
        rhs: &OdeFn,
        tspan: TimeSpan,
        y0: &[Real],
        options: &SolverOptions,
        params: &[Value],
    ) -> SolverResult<Trajectory>;
}

/// `(rhs, lags, Y0, tspan, options, params...) -> trajectory`
pub trait DdeSolver {
    fn solve_dde(
        &self,
        rhs: &DdeFn,
        lags: &[Real],
        y0: &[Real],
        tspan: TimeSpan,
        options: &SolverOptions,
        params: &[Value],
    ) -> SolverResult<Trajectory>;
}

/// `(drift, diffusion, tspan, Y0, options, params...) -> trajectory + noise`
pub trait SdeSolver {
    fn solve_sde(
        &self,
        drift: &OdeFn,
        diffusion: &SdeFn,
        tspan: TimeSpan,
        y0: &[Real],
        options: &SdeOptions,
        params: &[Value],
    ) -> SolverResult<SdeTrajectory>;
}

/// A numerical solver exposing one or more family calling conventions.
pub trait Solver: Send + Sync {
    fn name(&self) -> &str;

    fn as_ode(&self) -> Option<&dyn OdeSolver> {
        None
    }

    fn as_dde(&self) -> Option<&dyn DdeSolver> {
        None
    }

    fn as_sde(&self) -> Option<&dyn SdeSolver> {
        None
    }
}

/// Shared reference to a solver. Equality is identity, never name.
#[derive(Clone)]
pub struct SolverHandle(Arc<dyn Solver>);

impl SolverHandle {
    pub fn new(solver: impl Solver + 'static) -> Self {
        Self(Arc::new(solver))
    }

    pub fn name(&self) -> &str {
        self.0.name()
    }

    pub fn solver(&self) -> &dyn Solver {
        self.0.as_ref()
    }

    /// Whether the solver implements the calling convention of `family`.
    pub fn supports(&self, family: Family) -> bool {
        match family {
            Family::Ode => self.0.as_ode().is_some(),
            Family::Dde => self.0.as_dde().is_some(),
            Family::Sde => self.0.as_sde().is_some(),
        }
    }
}

impl PartialEq for SolverHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for SolverHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SolverHandle({})", self.name())
    }
}

/// Solvers declared by a system description, per family, in declaration order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SolverDecls {
    pub odesolver: Vec<SolverHandle>,
    pub ddesolver: Vec<SolverHandle>,
    pub sdesolver: Vec<SolverHandle>,
}

impl SolverDecls {
    pub fn family(&self, family: Family) -> &[SolverHandle] {
        match family {
            Family::Ode => &self.odesolver,
            Family::Dde => &self.ddesolver,
            Family::Sde => &self.sdesolver,
        }
    }

    pub fn family_mut(&mut self, family: Family) -> &mut Vec<SolverHandle> {
        match family {
            Family::Ode => &mut self.odesolver,
            Family::Dde => &mut self.ddesolver,
            Family::Sde => &mut self.sdesolver,
        }
    }

    pub fn is_empty(&self) -> bool {
        Family::ALL.iter().all(|f| self.family(*f).is_empty())
    }
}
