//! Solver output with named access.

use dk_core::{DkError, Real};
use nalgebra::DMatrix;

use crate::codec::IndexMap;
use crate::solver::{Family, Trajectory};
use crate::ModelResult;

/// A sampled trajectory, rebuilt on every solve.
///
/// `y` has one row per flattened state element and one column per entry of
/// `t`. `aux`, when present, has the same column count.
#[derive(Debug, Clone, PartialEq)]
pub struct Solution {
    pub family: Family,
    pub solver: String,
    pub t: Vec<Real>,
    pub y: DMatrix<Real>,
    /// Wiener increments of an SDE solve (noise sources x steps).
    pub dw: Option<DMatrix<Real>>,
    pub aux: Option<DMatrix<Real>>,
    /// Why `aux` is missing when an auxiliary function was declared.
    pub aux_error: Option<String>,
    pub vars: IndexMap,
    pub auxmap: Option<IndexMap>,
}

impl Solution {
    pub fn new(family: Family, solver: impl Into<String>, trajectory: Trajectory, vars: IndexMap) -> Self {
        Self {
            family,
            solver: solver.into(),
            t: trajectory.t,
            y: trajectory.y,
            dw: None,
            aux: None,
            aux_error: None,
            vars,
            auxmap: None,
        }
    }

    /// Number of time samples.
    pub fn len(&self) -> usize {
        self.t.len()
    }

    pub fn is_empty(&self) -> bool {
        self.t.is_empty()
    }

    pub fn dim(&self) -> usize {
        self.y.nrows()
    }

    pub fn final_state(&self) -> Option<Vec<Real>> {
        let last = self.y.ncols().checked_sub(1)?;
        Some(self.y.column(last).iter().copied().collect())
    }

    /// One flattened state row over time.
    pub fn series(&self, row: usize) -> Option<Vec<Real>> {
        (row < self.y.nrows()).then(|| self.y.row(row).iter().copied().collect())
    }

    /// Rows of the named state variable.
    pub fn variable(&self, name: &str) -> Option<DMatrix<Real>> {
        let rows = self.vars.rows_of(name)?;
        Some(self.y.rows(rows.start, rows.len()).into_owned())
    }

    /// Rows of the named auxiliary output, if auxiliary outputs were computed.
    pub fn aux_variable(&self, name: &str) -> Option<DMatrix<Real>> {
        let aux = self.aux.as_ref()?;
        let rows = self.auxmap.as_ref()?.rows_of(name)?;
        Some(aux.rows(rows.start, rows.len()).into_owned())
    }

    /// First sample at or after `tval`; the last sample when `tval` is past the end.
    pub fn tindex(&self, tval: Real) -> Option<usize> {
        if self.t.is_empty() {
            return None;
        }
        Some(
            self.t
                .iter()
                .position(|&t| t >= tval)
                .unwrap_or(self.t.len() - 1),
        )
    }

    /// State at arbitrary times by linear interpolation between samples.
    /// One column per requested time.
    pub fn eval(&self, times: &[Real]) -> ModelResult<DMatrix<Real>> {
        let (Some(&first), Some(&last)) = (self.t.first(), self.t.last()) else {
            return Err(DkError::InvalidArg {
                what: "cannot evaluate an empty solution",
            }
            .into());
        };

        let mut out = DMatrix::zeros(self.dim(), times.len());
        for (j, &t) in times.iter().enumerate() {
            if !(first..=last).contains(&t) {
                return Err(DkError::InvalidArg {
                    what: "evaluation time outside the solution interval",
                }
                .into());
            }
            let k = self.t.partition_point(|&s| s < t);
            if k == 0 || self.t[k] == t {
                out.set_column(j, &self.y.column(k));
                continue;
            }
            let (t0, t1) = (self.t[k - 1], self.t[k]);
            let w = (t - t0) / (t1 - t0);
            let col = self.y.column(k - 1) * (1.0 - w) + self.y.column(k) * w;
            out.set_column(j, &col);
        }
        Ok(out)
    }
}
