//! Solver classification and enumeration.
//!
//! A handle belongs to a family only when it appears in that family's
//! declaration list. Matching is by identity; two distinct solvers with
//! the same name are different solvers.

use crate::schema::SystemDef;
use crate::solver::{Family, SolverHandle};

/// One row of the solver menu.
#[derive(Debug, Clone, PartialEq)]
pub struct SolverEntry {
    pub name: String,
    pub handle: SolverHandle,
    pub family: Family,
}

/// Family whose declaration list contains `handle`, in
/// odesolver, ddesolver, sdesolver order.
pub fn classify(sys: &SystemDef, handle: &SolverHandle) -> Option<Family> {
    Family::ALL
        .into_iter()
        .find(|family| sys.solvers.family(*family).contains(handle))
}

/// Every declared solver, families in odesolver, ddesolver, sdesolver
/// order and declaration order within each family.
pub fn enumerate(sys: &SystemDef) -> Vec<SolverEntry> {
    Family::ALL
        .into_iter()
        .flat_map(|family| {
            sys.solvers.family(family).iter().map(move |handle| SolverEntry {
                name: handle.name().to_string(),
                handle: handle.clone(),
                family,
            })
        })
        .collect()
}

/// First entry of [`enumerate`].
pub fn default_solver(sys: &SystemDef) -> Option<SolverEntry> {
    enumerate(sys).into_iter().next()
}

/// First enumerated solver with exactly this name, optionally restricted
/// to one family.
pub fn find_by_name(sys: &SystemDef, name: &str, family: Option<Family>) -> Option<SolverEntry> {
    enumerate(sys)
        .into_iter()
        .find(|entry| entry.name == name && family.is_none_or(|f| f == entry.family))
}
