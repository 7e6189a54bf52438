//! Right-hand-side and auxiliary function handles.
//!
//! Handles are shared (`Arc`) closures. Two handles are equal only when they
//! point at the same closure.

use std::fmt;
use std::sync::Arc;

use dk_core::{Real, Value};
use nalgebra::DMatrix;

use crate::solution::Solution;

/// Error returned by an auxiliary function.
pub type AuxError = Box<dyn std::error::Error + Send + Sync>;

type OdeDyn = dyn Fn(Real, &[Real], &[Value]) -> Vec<Real> + Send + Sync;
type DdeDyn = dyn Fn(Real, &[Real], &DMatrix<Real>, &[Value]) -> Vec<Real> + Send + Sync;
type SdeDyn = dyn Fn(Real, &[Real], &[Value]) -> DMatrix<Real> + Send + Sync;
type AuxDyn = dyn Fn(&Solution, &[Value]) -> Result<DMatrix<Real>, AuxError> + Send + Sync;

/// `dY/dt = f(t, Y, params)`. Also the drift term of an SDE.
#[derive(Clone)]
pub struct OdeFn(Arc<OdeDyn>);

impl OdeFn {
    pub fn new(f: impl Fn(Real, &[Real], &[Value]) -> Vec<Real> + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    pub fn call(&self, t: Real, y: &[Real], params: &[Value]) -> Vec<Real> {
        (self.0)(t, y, params)
    }
}

/// `dY/dt = f(t, Y, Z, params)` where column k of `Z` is `Y(t - lag_k)`.
#[derive(Clone)]
pub struct DdeFn(Arc<DdeDyn>);

impl DdeFn {
    pub fn new(
        f: impl Fn(Real, &[Real], &DMatrix<Real>, &[Value]) -> Vec<Real> + Send + Sync + 'static,
    ) -> Self {
        Self(Arc::new(f))
    }

    pub fn call(&self, t: Real, y: &[Real], z: &DMatrix<Real>, params: &[Value]) -> Vec<Real> {
        (self.0)(t, y, z, params)
    }
}

/// Diffusion term `G(t, Y, params)`, an n x m matrix for m noise sources.
#[derive(Clone)]
pub struct SdeFn(Arc<SdeDyn>);

impl SdeFn {
    pub fn new(
        f: impl Fn(Real, &[Real], &[Value]) -> DMatrix<Real> + Send + Sync + 'static,
    ) -> Self {
        Self(Arc::new(f))
    }

    pub fn call(&self, t: Real, y: &[Real], params: &[Value]) -> DMatrix<Real> {
        (self.0)(t, y, params)
    }
}

/// Auxiliary outputs computed from a finished solution: one row per
/// flattened `auxdef` element, one column per time sample.
#[derive(Clone)]
pub struct AuxFn(Arc<AuxDyn>);

impl AuxFn {
    pub fn new(
        f: impl Fn(&Solution, &[Value]) -> Result<DMatrix<Real>, AuxError> + Send + Sync + 'static,
    ) -> Self {
        Self(Arc::new(f))
    }

    pub fn call(&self, sol: &Solution, params: &[Value]) -> Result<DMatrix<Real>, AuxError> {
        (self.0)(sol, params)
    }
}

macro_rules! identity_handle {
    ($($ty:ident),*) => {$(
        impl PartialEq for $ty {
            fn eq(&self, other: &Self) -> bool {
                Arc::ptr_eq(&self.0, &other.0)
            }
        }

        impl fmt::Debug for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({:p})", stringify!($ty), Arc::as_ptr(&self.0) as *const ())
            }
        }
    )*};
}

identity_handle!(OdeFn, DdeFn, SdeFn, AuxFn);

/// The function handles a system description may declare.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Functions {
    pub odefun: Option<OdeFn>,
    pub ddefun: Option<DdeFn>,
    pub sdefun: Option<SdeFn>,
    pub auxfun: Option<AuxFn>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_is_identity() {
        let f = OdeFn::new(|_, y, _| y.to_vec());
        let g = OdeFn::new(|_, y, _| y.to_vec());
        assert_eq!(f, f.clone());
        assert_ne!(f, g);
    }

    #[test]
    fn call_passes_arguments_through() {
        let f = OdeFn::new(|t, y, p| vec![t + y[0] * p[0].first()]);
        assert_eq!(f.call(1.0, &[2.0], &[Value::scalar(3.0)]), vec![7.0]);
    }
}
