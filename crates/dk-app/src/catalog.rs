//! Built-in demonstration systems.
//!
//! Each model is an ordinary raw description plus closures, declared with
//! the built-in solvers of its family, exactly as user code would write it.

use dk_core::Real;
use dk_model::{AuxFn, Family, RawSystem, SolverDecls, SystemDef, validate};
use dk_solver::builtin_for;
use nalgebra::DMatrix;
use serde::Serialize;
use serde_json::json;

use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ModelInfo {
    pub name: &'static str,
    pub family: Family,
    pub description: &'static str,
}

const MODELS: &[ModelInfo] = &[
    ModelInfo {
        name: "linear",
        family: Family::Ode,
        description: "Linear growth dy/dt = k y",
    },
    ModelInfo {
        name: "fitzhugh-nagumo",
        family: Family::Ode,
        description: "FitzHugh-Nagumo excitable neuron",
    },
    ModelInfo {
        name: "kuramoto",
        family: Family::Ode,
        description: "Kuramoto phase oscillators with coupling matrix and order parameter",
    },
    ModelInfo {
        name: "hutchinson",
        family: Family::Dde,
        description: "Hutchinson delayed logistic equation",
    },
    ModelInfo {
        name: "ornstein-uhlenbeck",
        family: Family::Sde,
        description: "Ornstein-Uhlenbeck process with independent noise per state",
    },
];

pub fn list_models() -> &'static [ModelInfo] {
    MODELS
}

pub fn model_info(name: &str) -> AppResult<ModelInfo> {
    MODELS
        .iter()
        .find(|m| m.name == name)
        .copied()
        .ok_or_else(|| AppError::UnknownModel(name.to_string()))
}

/// Raw (unvalidated) description of a built-in model.
pub fn raw_model(name: &str) -> AppResult<RawSystem> {
    let info = model_info(name)?;
    let raw = match info.name {
        "linear" => linear(),
        "fitzhugh-nagumo" => fitzhugh_nagumo(),
        "kuramoto" => kuramoto(),
        "hutchinson" => hutchinson(),
        "ornstein-uhlenbeck" => ornstein_uhlenbeck(),
        other => return Err(AppError::UnknownModel(other.to_string())),
    };
    Ok(raw)
}

/// Validated description of a built-in model.
pub fn load_model(name: &str) -> AppResult<SystemDef> {
    Ok(validate(&raw_model(name)?)?)
}

fn builtin(family: Family) -> SolverDecls {
    let mut decls = SolverDecls::default();
    *decls.family_mut(family) = builtin_for(family);
    decls
}

fn linear() -> RawSystem {
    RawSystem::new(json!({
        "pardef": [{"name": "k", "value": 2.0, "lim": [-5, 5]}],
        "vardef": [{"name": "y", "value": 1.0, "lim": [0, 10]}],
        "tspan": [0, 1]
    }))
    .odefun(|_, y, p| {
        let k = p[0].first();
        y.iter().map(|yi| k * yi).collect()
    })
    .solvers(builtin(Family::Ode))
}

fn fitzhugh_nagumo() -> RawSystem {
    RawSystem::new(json!({
        "pardef": [
            {"name": "a", "value": 0.7, "lim": [0, 1]},
            {"name": "b", "value": 0.8, "lim": [0, 1]},
            {"name": "tau", "value": 12.5, "lim": [1, 20]},
            {"name": "I", "value": 0.5, "lim": [0, 2]}
        ],
        "vardef": [
            {"name": "V", "value": -1.0, "lim": [-3, 3]},
            {"name": "W", "value": 1.0, "lim": [-1, 3]}
        ],
        "tspan": [0, 300]
    }))
    .odefun(|_, y, p| {
        let (a, b, tau, i_ext) = (p[0].first(), p[1].first(), p[2].first(), p[3].first());
        let (v, w) = (y[0], y[1]);
        vec![v - v.powi(3) / 3.0 - w + i_ext, (v + a - b * w) / tau]
    })
    .solvers(builtin(Family::Ode))
}

const KURAMOTO_N: usize = 5;

fn kuramoto() -> RawSystem {
    let omega: Vec<Real> = (0..KURAMOTO_N).map(|i| 1.0 + 0.1 * i as Real).collect();
    let coupling: Vec<Vec<Real>> = (0..KURAMOTO_N)
        .map(|i| (0..KURAMOTO_N).map(|j| if i == j { 0.0 } else { 1.0 }).collect())
        .collect();
    let theta: Vec<Real> = (0..KURAMOTO_N).map(|i| 1.2 * i as Real).collect();

    let order_parameter = AuxFn::new(|sol, _| {
        let n = sol.dim() as Real;
        Ok(DMatrix::from_fn(1, sol.len(), |_, j| {
            let (c, s) = sol
                .y
                .column(j)
                .iter()
                .fold((0.0, 0.0), |(c, s), th| (c + th.cos(), s + th.sin()));
            (c * c + s * s).sqrt() / n
        }))
    });

    RawSystem::new(json!({
        "pardef": [
            {"name": "K", "value": 1.0, "lim": [0, 10]},
            {"name": "omega", "value": omega, "lim": [0, 2]},
            {"name": "A", "value": coupling, "lim": [0, 1]}
        ],
        "vardef": [{"name": "theta", "value": theta, "lim": [0, 6.3]}],
        "auxdef": [{"name": "R", "value": 0.0, "lim": [0, 1]}],
        "tspan": [0, 50]
    }))
    .odefun(|_, theta, p| {
        let k = p[0].first();
        let omega = p[1].as_slice();
        let a = p[2].as_matrix();
        let n = theta.len();
        (0..n)
            .map(|i| {
                let pull: Real = (0..n).map(|j| a[(i, j)] * (theta[j] - theta[i]).sin()).sum();
                omega[i] + k / n as Real * pull
            })
            .collect()
    })
    .auxfun(order_parameter)
    .solvers(builtin(Family::Ode))
}

fn hutchinson() -> RawSystem {
    RawSystem::new(json!({
        "pardef": [
            {"name": "r", "value": 1.0, "lim": [0, 3]},
            {"name": "K", "value": 1.0, "lim": [0.1, 5]}
        ],
        "vardef": [{"name": "y", "value": 0.5, "lim": [0, 3]}],
        "lagdef": [{"name": "tau", "value": 2.0, "lim": [0, 5]}],
        "tspan": [0, 100]
    }))
    .ddefun(|_, y, z, p| {
        let (r, k) = (p[0].first(), p[1].first());
        vec![r * y[0] * (1.0 - z[(0, 0)] / k)]
    })
    .solvers(builtin(Family::Dde))
}

fn ornstein_uhlenbeck() -> RawSystem {
    RawSystem::new(json!({
        "pardef": [
            {"name": "theta", "value": 1.0, "lim": [0, 5]},
            {"name": "mu", "value": 0.0, "lim": [-2, 2]},
            {"name": "sigma", "value": 0.5, "lim": [0, 2]}
        ],
        "vardef": [{"name": "x", "value": [1.0, -1.0], "lim": [-3, 3]}],
        "tspan": [0, 10]
    }))
    .odefun(|_, x, p| {
        let (theta, mu) = (p[0].first(), p[1].first());
        x.iter().map(|xi| theta * (mu - xi)).collect()
    })
    .sdefun(|_, x, p| DMatrix::identity(x.len(), x.len()) * p[2].first())
    .solvers(builtin(Family::Sde))
}

#[cfg(test)]
mod tests {
    use super::*;
    use dk_model::{ValidateOptions, enumerate, validate_with};

    #[test]
    fn every_model_passes_diagnostic_validation() {
        for info in list_models() {
            let raw = raw_model(info.name).unwrap();
            let sys = validate_with(&raw, &ValidateOptions { diagnostic: true })
                .unwrap_or_else(|e| panic!("{}: {e}", info.name));
            let solvers = enumerate(&sys);
            assert!(!solvers.is_empty());
            assert!(solvers.iter().all(|s| s.family == info.family));
        }
    }

    #[test]
    fn unknown_model_is_reported() {
        assert!(matches!(
            load_model("lorenz"),
            Err(AppError::UnknownModel(ref name)) if name == "lorenz"
        ));
    }

    #[test]
    fn kuramoto_layout() {
        let sys = load_model("kuramoto").unwrap();
        assert_eq!(sys.state_dim(), KURAMOTO_N);
        assert_eq!(sys.data.pardef.numel(), 1 + KURAMOTO_N + KURAMOTO_N * KURAMOTO_N);
        assert_eq!(sys.data.auxdef.numel(), 1);
    }
}
