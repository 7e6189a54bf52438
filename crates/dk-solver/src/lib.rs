//! Built-in numerical solvers for dynkit systems.
//!
//! Each solver implements the family calling convention(s) from
//! `dk_model::solver` so it can be declared in a system description like
//! any external solver.

pub mod dde;
pub mod dopri;
pub mod fixed;
pub mod sde;
mod steps;

use dk_model::{Family, SolverDecls, SolverHandle};

pub use dde::DdeRk4;
pub use dopri::Dopri45;
pub use fixed::{Euler, Rk4};
pub use sde::{EulerMaruyama, StratonovichHeun};

/// Every built-in solver, declared under each family it supports.
/// Within a family the order is the preferred default first.
pub fn builtin_decls() -> SolverDecls {
    let mut decls = SolverDecls::default();
    let ode = [
        SolverHandle::new(Dopri45),
        SolverHandle::new(Rk4),
        SolverHandle::new(Euler),
    ];
    decls.family_mut(Family::Ode).extend(ode);
    decls.family_mut(Family::Dde).push(SolverHandle::new(DdeRk4));
    decls.family_mut(Family::Sde).extend([
        SolverHandle::new(EulerMaruyama),
        SolverHandle::new(StratonovichHeun),
    ]);
    decls
}

/// Built-in solvers for one family only.
pub fn builtin_for(family: Family) -> Vec<SolverHandle> {
    builtin_decls().family(family).to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_declared_builtin_supports_its_family() {
        let decls = builtin_decls();
        for family in Family::ALL {
            assert!(!decls.family(family).is_empty());
            for handle in decls.family(family) {
                assert!(handle.supports(family), "{} / {family}", handle.name());
            }
        }
    }

    #[test]
    fn names_are_distinct() {
        let decls = builtin_decls();
        let mut names: Vec<_> = Family::ALL
            .iter()
            .flat_map(|f| decls.family(*f).iter().map(|h| h.name().to_string()))
            .collect();
        let n = names.len();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), n);
    }
}
