//! Query helpers for extracting named data from a solution.

use dk_core::Real;
use dk_model::{Family, Solution};
use serde::Serialize;

use crate::error::{AppError, AppResult};

/// Summary of a solution's time range and size.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SolutionSummary {
    pub family: Family,
    pub solver: String,
    pub time_range: (Real, Real),
    pub sample_count: usize,
    pub state_count: usize,
    pub aux_count: usize,
    pub aux_error: Option<String>,
}

pub fn summary(solution: &Solution) -> AppResult<SolutionSummary> {
    let (Some(&t_min), Some(&t_max)) = (solution.t.first(), solution.t.last()) else {
        return Err(AppError::InvalidInput("No samples in solution".to_string()));
    };

    Ok(SolutionSummary {
        family: solution.family,
        solver: solution.solver.clone(),
        time_range: (t_min, t_max),
        sample_count: solution.len(),
        state_count: solution.dim(),
        aux_count: solution.aux.as_ref().map(|a| a.nrows()).unwrap_or(0),
        aux_error: solution.aux_error.clone(),
    })
}

/// Row labels of the state, followed by auxiliary labels when present.
pub fn list_labels(solution: &Solution) -> Vec<String> {
    let mut labels = solution.vars.labels();
    if solution.aux.is_some()
        && let Some(auxmap) = &solution.auxmap
    {
        labels.extend(auxmap.labels());
    }
    labels
}

/// Time series of one labelled row (`y`, `b_2`, or an auxiliary label).
pub fn series_by_label(solution: &Solution, label: &str) -> AppResult<Vec<(Real, Real)>> {
    if let Some(row) = solution.vars.row_of_label(label) {
        let values = solution.y.row(row);
        return Ok(solution.t.iter().copied().zip(values.iter().copied()).collect());
    }

    let aux_row = solution
        .auxmap
        .as_ref()
        .and_then(|map| map.row_of_label(label));
    match (aux_row, &solution.aux) {
        (Some(row), Some(aux)) => {
            let values = aux.row(row);
            Ok(solution.t.iter().copied().zip(values.iter().copied()).collect())
        }
        _ => match &solution.aux_error {
            Some(reason) => Err(AppError::Aux(format!("'{label}' not found ({reason})"))),
            None => Err(AppError::InvalidInput(format!("Unknown label: {label}"))),
        },
    }
}

/// Samples at or after the transient cutoff `tval`.
pub fn after_transient(solution: &Solution, tval: Real) -> AppResult<Solution> {
    let start = solution
        .tindex(tval)
        .ok_or_else(|| AppError::InvalidInput("No samples in solution".to_string()))?;
    let n = solution.len() - start;

    let mut trimmed = solution.clone();
    trimmed.t = solution.t[start..].to_vec();
    trimmed.y = solution.y.columns(start, n).into_owned();
    trimmed.aux = solution.aux.as_ref().map(|a| a.columns(start, n).into_owned());
    // Noise increments belong to steps, one fewer than samples.
    trimmed.dw = solution.dw.as_ref().map(|dw| {
        let skip = start.min(dw.ncols());
        dw.columns(skip, dw.ncols() - skip).into_owned()
    });
    Ok(trimmed)
}
