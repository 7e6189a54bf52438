//! System description schema.
//!
//! A system description is split into its declarative data (`SystemData`,
//! serialisable) and its behaviour (right-hand-side functions and declared
//! solvers, held as shared handles).

use std::collections::BTreeMap;

use dk_core::{Real, Value};
use serde::{Deserialize, Serialize, Serializer};

use crate::functions::{AuxFn, DdeFn, Functions, OdeFn, SdeFn};
use crate::solver::{Family, SolverDecls, SolverHandle};
use crate::{ModelError, ModelResult};

/// Range used when a description does not declare `tspan`.
pub const DEFAULT_TSPAN: TimeSpan = TimeSpan { t0: 0.0, tf: 1.0 };

/// Slider limits of an entry. Serialised as `[min, max]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[Real; 2]", into = "[Real; 2]")]
pub struct Bounds {
    pub min: Real,
    pub max: Real,
}

impl Bounds {
    pub fn new(min: Real, max: Real) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, x: Real) -> bool {
        self.min <= x && x <= self.max
    }
}

impl From<[Real; 2]> for Bounds {
    fn from([min, max]: [Real; 2]) -> Self {
        Self { min, max }
    }
}

impl From<Bounds> for [Real; 2] {
    fn from(b: Bounds) -> Self {
        [b.min, b.max]
    }
}

/// One named definition: a parameter, state variable, lag or auxiliary output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub name: String,
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lim: Option<Bounds>,
}

impl Entry {
    pub fn new(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            lim: None,
        }
    }

    pub fn with_lim(mut self, min: Real, max: Real) -> Self {
        self.lim = Some(Bounds::new(min, max));
        self
    }

    /// Declared limits, or a range derived from the current value:
    /// `[floor(min), ceil(max)]`, widened by one when it collapses.
    pub fn bounds_or_default(&self) -> Bounds {
        if let Some(lim) = self.lim {
            return lim;
        }
        let lo = self.value.min().floor();
        let hi = self.value.max().ceil();
        if lo < hi {
            Bounds::new(lo, hi)
        } else {
            Bounds::new(lo - 1.0, hi + 1.0)
        }
    }
}

/// The four kinds of definition collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CollectionKind {
    Par,
    Var,
    Lag,
    Aux,
}

impl CollectionKind {
    pub const ALL: [CollectionKind; 4] = [
        CollectionKind::Par,
        CollectionKind::Var,
        CollectionKind::Lag,
        CollectionKind::Aux,
    ];

    /// Field name in the system description record.
    pub fn field(self) -> &'static str {
        match self {
            CollectionKind::Par => "pardef",
            CollectionKind::Var => "vardef",
            CollectionKind::Lag => "lagdef",
            CollectionKind::Aux => "auxdef",
        }
    }
}

/// Ordered definitions. Order fixes the layout of the flattened vector.
#[derive(Debug, Clone, PartialEq)]
pub struct Collection {
    pub kind: CollectionKind,
    pub entries: Vec<Entry>,
}

impl Collection {
    pub fn new(kind: CollectionKind, entries: Vec<Entry>) -> Self {
        Self { kind, entries }
    }

    pub fn empty(kind: CollectionKind) -> Self {
        Self::new(kind, Vec::new())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total scalar element count across all entries.
    pub fn numel(&self) -> usize {
        self.entries.iter().map(|e| e.value.numel()).sum()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.name.as_str())
    }

    /// Entry values in declaration order, as handed to right-hand-side functions.
    pub fn values(&self) -> Vec<Value> {
        self.entries.iter().map(|e| e.value.clone()).collect()
    }
}

impl Serialize for Collection {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.entries.serialize(serializer)
    }
}

/// Integration window. Serialised as `[t0, tf]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[Real; 2]", into = "[Real; 2]")]
pub struct TimeSpan {
    pub t0: Real,
    pub tf: Real,
}

impl TimeSpan {
    pub fn new(t0: Real, tf: Real) -> Self {
        Self { t0, tf }
    }

    pub fn duration(&self) -> Real {
        self.tf - self.t0
    }
}

impl From<[Real; 2]> for TimeSpan {
    fn from([t0, tf]: [Real; 2]) -> Self {
        Self { t0, tf }
    }
}

impl From<TimeSpan> for [Real; 2] {
    fn from(ts: TimeSpan) -> Self {
        [ts.t0, ts.tf]
    }
}

/// Options shared by every solver family. Keys the typed fields do not
/// cover are passed through to the solver untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SolverOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rel_tol: Option<Real>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abs_tol: Option<Real>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_step: Option<Real>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_step: Option<Real>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_steps: Option<usize>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// SDE options: the common set plus the noise configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SdeOptions {
    /// Number of independent Wiener processes (columns of the diffusion matrix).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub noise_sources: Option<usize>,
    /// Fixed seed; with it, repeated solves reuse the same noise realisation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    #[serde(flatten)]
    pub common: SolverOptions,
}

/// Declarative part of a validated system description.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemData {
    pub pardef: Collection,
    pub vardef: Collection,
    pub lagdef: Collection,
    pub auxdef: Collection,
    pub tspan: TimeSpan,
    pub tval: Real,
    pub odeoption: SolverOptions,
    pub ddeoption: SolverOptions,
    pub sdeoption: SdeOptions,
    /// Frontend panel configuration, carried through untouched.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub panels: Option<serde_json::Value>,
}

/// A raw, unvalidated system description as supplied by user code.
#[derive(Debug, Clone, Default)]
pub struct RawSystem {
    pub data: serde_json::Value,
    pub functions: Functions,
    pub solvers: SolverDecls,
}

impl RawSystem {
    pub fn new(data: serde_json::Value) -> Self {
        Self {
            data,
            ..Self::default()
        }
    }

    pub fn odefun(
        mut self,
        f: impl Fn(Real, &[Real], &[Value]) -> Vec<Real> + Send + Sync + 'static,
    ) -> Self {
        self.functions.odefun = Some(OdeFn::new(f));
        self
    }

    pub fn ddefun(
        mut self,
        f: impl Fn(Real, &[Real], &nalgebra::DMatrix<Real>, &[Value]) -> Vec<Real>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        self.functions.ddefun = Some(DdeFn::new(f));
        self
    }

    pub fn sdefun(
        mut self,
        f: impl Fn(Real, &[Real], &[Value]) -> nalgebra::DMatrix<Real> + Send + Sync + 'static,
    ) -> Self {
        self.functions.sdefun = Some(SdeFn::new(f));
        self
    }

    pub fn auxfun(mut self, f: AuxFn) -> Self {
        self.functions.auxfun = Some(f);
        self
    }

    pub fn solver(mut self, family: Family, handle: SolverHandle) -> Self {
        self.solvers.family_mut(family).push(handle);
        self
    }

    pub fn solvers(mut self, decls: SolverDecls) -> Self {
        self.solvers = decls;
        self
    }
}

/// A validated system description.
#[derive(Debug, Clone, PartialEq)]
pub struct SystemDef {
    pub data: SystemData,
    pub functions: Functions,
    pub solvers: SolverDecls,
}

impl SystemDef {
    pub fn collection(&self, kind: CollectionKind) -> &Collection {
        match kind {
            CollectionKind::Par => &self.data.pardef,
            CollectionKind::Var => &self.data.vardef,
            CollectionKind::Lag => &self.data.lagdef,
            CollectionKind::Aux => &self.data.auxdef,
        }
    }

    /// Copy of this description with one collection replaced.
    pub fn with_collection(&self, collection: Collection) -> SystemDef {
        let mut next = self.clone();
        match collection.kind {
            CollectionKind::Par => next.data.pardef = collection,
            CollectionKind::Var => next.data.vardef = collection,
            CollectionKind::Lag => next.data.lagdef = collection,
            CollectionKind::Aux => next.data.auxdef = collection,
        }
        next
    }

    /// Length of the flattened state vector.
    pub fn state_dim(&self) -> usize {
        self.data.vardef.numel()
    }

    /// Parameter values in `pardef` order.
    pub fn param_values(&self) -> Vec<Value> {
        self.data.pardef.values()
    }

    /// Declared noise-source count (validation always fills it in).
    pub fn noise_sources(&self) -> usize {
        self.data
            .sdeoption
            .noise_sources
            .unwrap_or_else(|| self.state_dim())
    }

    /// Back to raw form, so the result can be validated again.
    pub fn to_raw(&self) -> ModelResult<RawSystem> {
        let data = serde_json::to_value(&self.data)
            .map_err(|e| ModelError::Serialize(e.to_string()))?;
        Ok(RawSystem {
            data,
            functions: self.functions.clone(),
            solvers: self.solvers.clone(),
        })
    }
}
