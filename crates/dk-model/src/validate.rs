//! System description validation.
//!
//! One pass over a raw description: shape of the record, definition
//! collections, obsolete fields, defaults, declaration cross-checks and an
//! optional diagnostic trial call of the declared functions. The result is either
//! a complete `SystemDef` or the first violation found.

use std::collections::HashSet;

use dk_core::{Real, Value};
use nalgebra::DMatrix;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value as Json};
use tracing::{debug, warn};

use crate::codec;
use crate::functions::Functions;
use crate::obsolete;
use crate::schema::{
    Bounds, Collection, CollectionKind, DEFAULT_TSPAN, Entry, RawSystem, SdeOptions,
    SolverOptions, SystemData, SystemDef, TimeSpan,
};
use crate::solver::{Family, SolverDecls};

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum SchemaError {
    #[error("System description must be a record, got {found}")]
    NotARecord { found: &'static str },

    #[error("Missing {field}: {reason}")]
    Missing { field: String, reason: String },

    #[error("Invalid value: {field} = {value} ({reason})")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Duplicate name: '{name}' in {field}")]
    DuplicateName { name: String, field: String },

    #[error("Obsolete field: {field} is no longer supported ({replacement})")]
    Obsolete { field: String, replacement: String },

    #[error("{declared} is declared but {missing} is missing")]
    MissingCounterpart { declared: String, missing: String },

    #[error("{function} returned {actual}, expected {expected}")]
    RhsShape {
        function: String,
        expected: String,
        actual: String,
    },
}

impl SchemaError {
    /// The description field the error is about.
    pub fn field(&self) -> &str {
        match self {
            SchemaError::NotARecord { .. } => "sys",
            SchemaError::Missing { field, .. }
            | SchemaError::InvalidValue { field, .. }
            | SchemaError::DuplicateName { field, .. }
            | SchemaError::Obsolete { field, .. } => field,
            SchemaError::MissingCounterpart { missing, .. } => missing,
            SchemaError::RhsShape { function, .. } => function,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ValidateOptions {
    /// Call every declared function once with the initial state and check
    /// the shape of what comes back.
    pub diagnostic: bool,
}

const KNOWN_FIELDS: &[&str] = &[
    "pardef",
    "vardef",
    "lagdef",
    "auxdef",
    "tspan",
    "tval",
    "odeoption",
    "ddeoption",
    "sdeoption",
    "panels",
];

const ENTRY_FIELDS: &[&str] = &["name", "value", "lim"];

pub fn validate(raw: &RawSystem) -> Result<SystemDef, SchemaError> {
    validate_with(raw, &ValidateOptions::default())
}

pub fn validate_with(raw: &RawSystem, options: &ValidateOptions) -> Result<SystemDef, SchemaError> {
    let record = raw.data.as_object().ok_or(SchemaError::NotARecord {
        found: json_kind(&raw.data),
    })?;

    obsolete::check_fields(record)?;
    for key in record.keys() {
        if !KNOWN_FIELDS.contains(&key.as_str()) {
            warn!(field = %key, "ignoring unknown system description field");
        }
    }

    let pardef = parse_collection(record, CollectionKind::Par)?;
    let vardef = parse_collection(record, CollectionKind::Var)?;
    let lagdef = parse_collection(record, CollectionKind::Lag)?;
    let auxdef = parse_collection(record, CollectionKind::Aux)?;

    if vardef.is_empty() {
        return Err(SchemaError::Missing {
            field: "vardef".to_string(),
            reason: "at least one state variable is required".to_string(),
        });
    }
    check_lags(&lagdef)?;

    let tspan = parse_tspan(record)?;
    let tval = parse_tval(record, tspan)?;
    let odeoption: SolverOptions = parse_options(record, "odeoption")?;
    let ddeoption: SolverOptions = parse_options(record, "ddeoption")?;
    let mut sdeoption: SdeOptions = parse_options(record, "sdeoption")?;

    if raw.functions.sdefun.is_some() {
        match sdeoption.noise_sources {
            Some(0) => {
                return Err(SchemaError::InvalidValue {
                    field: "sdeoption.noise_sources".to_string(),
                    value: "0".to_string(),
                    reason: "at least one noise source is required".to_string(),
                });
            }
            Some(_) => {}
            None => {
                let m = vardef.numel();
                debug!(noise_sources = m, "defaulting sdeoption.noise_sources to state dimension");
                sdeoption.noise_sources = Some(m);
            }
        }
    }

    let panels = record.get("panels").filter(|p| !p.is_null()).cloned();

    check_declarations(&raw.functions, &raw.solvers, &lagdef, &auxdef)?;

    let sys = SystemDef {
        data: SystemData {
            pardef,
            vardef,
            lagdef,
            auxdef,
            tspan,
            tval,
            odeoption,
            ddeoption,
            sdeoption,
            panels,
        },
        functions: raw.functions.clone(),
        solvers: raw.solvers.clone(),
    };

    if options.diagnostic {
        trial_call_functions(&sys)?;
    }

    Ok(sys)
}

fn json_kind(v: &Json) -> &'static str {
    match v {
        Json::Null => "null",
        Json::Bool(_) => "boolean",
        Json::Number(_) => "number",
        Json::String(_) => "string",
        Json::Array(_) => "list",
        Json::Object(_) => "record",
    }
}

fn invalid(field: impl Into<String>, value: impl ToString, reason: impl Into<String>) -> SchemaError {
    SchemaError::InvalidValue {
        field: field.into(),
        value: value.to_string(),
        reason: reason.into(),
    }
}

fn parse_collection(
    record: &Map<String, Json>,
    kind: CollectionKind,
) -> Result<Collection, SchemaError> {
    let field = kind.field();
    let items = match record.get(field) {
        None | Some(Json::Null) => return Ok(Collection::empty(kind)),
        Some(Json::Array(items)) => items,
        Some(other) => {
            return Err(invalid(
                field,
                json_kind(other),
                "must be a list of {name, value, lim} records",
            ));
        }
    };

    obsolete::check_collection_shape(kind, items)?;

    let mut seen = HashSet::new();
    let mut entries = Vec::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        let entry = parse_entry(field, i, item)?;
        if !seen.insert(entry.name.clone()) {
            return Err(SchemaError::DuplicateName {
                name: entry.name,
                field: field.to_string(),
            });
        }
        entries.push(entry);
    }

    Ok(Collection::new(kind, entries))
}

fn parse_entry(field: &str, index: usize, item: &Json) -> Result<Entry, SchemaError> {
    let at = format!("{field}[{index}]");
    let obj = item
        .as_object()
        .ok_or_else(|| invalid(&at, json_kind(item), "definitions must be records"))?;

    let name = match obj.get("name") {
        Some(Json::String(s)) if !s.trim().is_empty() => s.clone(),
        Some(Json::String(_)) => return Err(invalid(format!("{at}.name"), "\"\"", "names must not be empty")),
        Some(other) => return Err(invalid(format!("{at}.name"), other, "names must be strings")),
        None => {
            return Err(SchemaError::Missing {
                field: format!("{at}.name"),
                reason: "every definition needs a name".to_string(),
            });
        }
    };

    let raw_value = obj.get("value").ok_or_else(|| SchemaError::Missing {
        field: format!("{field}.{name}.value"),
        reason: "every definition needs a numeric value".to_string(),
    })?;
    let value: Value = serde_json::from_value(raw_value.clone()).map_err(|e| {
        invalid(
            format!("{field}.{name}.value"),
            raw_value,
            format!("expected a number, list or matrix of numbers ({e})"),
        )
    })?;
    if !value.is_finite() {
        return Err(invalid(format!("{field}.{name}.value"), &value, "values must be finite"));
    }

    let lim = match obj.get("lim") {
        None | Some(Json::Null) => None,
        Some(raw_lim) => Some(parse_bounds(&format!("{field}.{name}.lim"), raw_lim)?),
    };

    for key in obj.keys() {
        if !ENTRY_FIELDS.contains(&key.as_str()) {
            warn!(field = %at, key = %key, "ignoring unknown definition key");
        }
    }

    Ok(Entry { name, value, lim })
}

fn parse_bounds(field: &str, raw: &Json) -> Result<Bounds, SchemaError> {
    let [min, max]: [Real; 2] = serde_json::from_value(raw.clone())
        .map_err(|_| invalid(field, raw, "limits must be a [min, max] pair"))?;
    if !min.is_finite() || !max.is_finite() {
        return Err(invalid(field, raw, "limits must be finite"));
    }
    if min > max {
        return Err(invalid(field, raw, "min must not exceed max"));
    }
    Ok(Bounds::new(min, max))
}

fn check_lags(lagdef: &Collection) -> Result<(), SchemaError> {
    for entry in &lagdef.entries {
        if entry.value.as_slice().iter().any(|&lag| lag < 0.0) {
            return Err(invalid(
                format!("lagdef.{}.value", entry.name),
                &entry.value,
                "lags must be non-negative",
            ));
        }
    }
    Ok(())
}

fn parse_tspan(record: &Map<String, Json>) -> Result<TimeSpan, SchemaError> {
    let raw = match record.get("tspan") {
        None | Some(Json::Null) => {
            debug!(t0 = DEFAULT_TSPAN.t0, tf = DEFAULT_TSPAN.tf, "defaulting tspan");
            return Ok(DEFAULT_TSPAN);
        }
        Some(raw) => raw,
    };
    let [t0, tf]: [Real; 2] = serde_json::from_value(raw.clone())
        .map_err(|_| invalid("tspan", raw, "must be a [t0, tf] pair"))?;
    if !t0.is_finite() || !tf.is_finite() {
        return Err(invalid("tspan", raw, "times must be finite"));
    }
    if t0 > tf {
        return Err(invalid("tspan", raw, "t0 must not exceed tf"));
    }
    Ok(TimeSpan::new(t0, tf))
}

fn parse_tval(record: &Map<String, Json>, tspan: TimeSpan) -> Result<Real, SchemaError> {
    match record.get("tval") {
        None | Some(Json::Null) => {
            debug!(tval = tspan.t0, "defaulting tval to t0");
            Ok(tspan.t0)
        }
        Some(raw) => {
            let tval = raw
                .as_f64()
                .ok_or_else(|| invalid("tval", raw, "must be a number"))?;
            if !(tspan.t0..=tspan.tf).contains(&tval) {
                return Err(invalid(
                    "tval",
                    tval,
                    format!("must lie within tspan [{}, {}]", tspan.t0, tspan.tf),
                ));
            }
            Ok(tval)
        }
    }
}

fn parse_options<T: DeserializeOwned + Default>(
    record: &Map<String, Json>,
    field: &str,
) -> Result<T, SchemaError> {
    match record.get(field) {
        None | Some(Json::Null) => Ok(T::default()),
        Some(raw @ Json::Object(_)) => serde_json::from_value(raw.clone())
            .map_err(|e| invalid(field, raw, format!("malformed options ({e})"))),
        Some(other) => Err(invalid(field, json_kind(other), "options must be a record")),
    }
}

fn counterpart(declared: &str, missing: &str) -> SchemaError {
    SchemaError::MissingCounterpart {
        declared: declared.to_string(),
        missing: missing.to_string(),
    }
}

fn check_declarations(
    functions: &Functions,
    solvers: &SolverDecls,
    lagdef: &Collection,
    auxdef: &Collection,
) -> Result<(), SchemaError> {
    let has_ode = functions.odefun.is_some();
    let has_dde = functions.ddefun.is_some();
    let has_sde = functions.sdefun.is_some();

    if !has_ode && !has_dde && !has_sde {
        return Err(SchemaError::Missing {
            field: "odefun".to_string(),
            reason: "a system needs an odefun, ddefun or sdefun".to_string(),
        });
    }

    if has_dde {
        if lagdef.is_empty() {
            return Err(counterpart("ddefun", "lagdef"));
        }
        if solvers.ddesolver.is_empty() {
            return Err(counterpart("ddefun", "ddesolver"));
        }
    }
    if has_sde {
        if !has_ode {
            return Err(counterpart("sdefun", "odefun"));
        }
        if solvers.sdesolver.is_empty() {
            return Err(counterpart("sdefun", "sdesolver"));
        }
    }
    if has_ode && !has_sde && solvers.odesolver.is_empty() {
        return Err(counterpart("odefun", "odesolver"));
    }

    if !lagdef.is_empty() && !has_dde {
        return Err(counterpart("lagdef", "ddefun"));
    }
    if !solvers.ddesolver.is_empty() && !has_dde {
        return Err(counterpart("ddesolver", "ddefun"));
    }
    if !solvers.sdesolver.is_empty() && !has_sde {
        return Err(counterpart("sdesolver", "sdefun"));
    }
    if !solvers.odesolver.is_empty() && !has_ode {
        return Err(counterpart("odesolver", "odefun"));
    }

    if functions.auxfun.is_some() && auxdef.is_empty() {
        return Err(counterpart("auxfun", "auxdef"));
    }
    if !auxdef.is_empty() && functions.auxfun.is_none() {
        return Err(counterpart("auxdef", "auxfun"));
    }

    for family in Family::ALL {
        for (i, handle) in solvers.family(family).iter().enumerate() {
            if !handle.supports(family) {
                return Err(invalid(
                    format!("{}[{}]", family.field(), i),
                    handle.name(),
                    format!("solver does not implement the {family} calling convention"),
                ));
            }
        }
    }

    Ok(())
}

fn trial_call_functions(sys: &SystemDef) -> Result<(), SchemaError> {
    let y0 = codec::flatten(&sys.data.vardef);
    let n = y0.len();
    let params = sys.param_values();
    let t0 = sys.data.tspan.t0;

    let check_column = |function: &str, out: &[Real]| -> Result<(), SchemaError> {
        if out.len() != n {
            return Err(SchemaError::RhsShape {
                function: function.to_string(),
                expected: format!("a column of {n} values"),
                actual: format!("{} values", out.len()),
            });
        }
        if out.iter().any(|x| !x.is_finite()) {
            warn!(function, "trial call returned non-finite values at the initial state");
        }
        Ok(())
    };

    if let Some(f) = &sys.functions.odefun {
        check_column("odefun", &f.call(t0, &y0, &params))?;
    }

    if let Some(f) = &sys.functions.ddefun {
        let nlags = sys.data.lagdef.numel();
        let z = DMatrix::from_fn(n, nlags, |i, _| y0[i]);
        check_column("ddefun", &f.call(t0, &y0, &z, &params))?;
    }

    if let Some(f) = &sys.functions.sdefun {
        let m = sys.noise_sources();
        let g = f.call(t0, &y0, &params);
        if g.nrows() != n || g.ncols() != m {
            return Err(SchemaError::RhsShape {
                function: "sdefun".to_string(),
                expected: format!("a {n}x{m} matrix"),
                actual: format!("a {}x{} matrix", g.nrows(), g.ncols()),
            });
        }
    }

    debug!(dim = n, "diagnostic trial call passed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solver::{OdeSolver, Solver, SolverHandle, SolverResult, Trajectory};
    use serde_json::json;

    struct Dummy;

    impl Solver for Dummy {
        fn name(&self) -> &str {
            "dummy"
        }

        fn as_ode(&self) -> Option<&dyn OdeSolver> {
            Some(self)
        }
    }

    impl OdeSolver for Dummy {
        fn solve_ode(
            &self,
            _rhs: &crate::functions::OdeFn,
            tspan: TimeSpan,
            y0: &[Real],
            _options: &SolverOptions,
            _params: &[Value],
        ) -> SolverResult<Trajectory> {
            Ok(Trajectory::from_columns(vec![tspan.t0], &[y0.to_vec()], y0.len()))
        }
    }

    fn ode_raw(data: Json) -> RawSystem {
        RawSystem::new(data)
            .odefun(|_, y, _| y.to_vec())
            .solver(Family::Ode, SolverHandle::new(Dummy))
    }

    #[test]
    fn rejects_non_record() {
        let err = validate(&ode_raw(json!([1, 2]))).unwrap_err();
        assert_eq!(err, SchemaError::NotARecord { found: "list" });
    }

    #[test]
    fn fills_defaults() {
        let sys = validate(&ode_raw(json!({"vardef": [{"name": "y", "value": 1.0}]}))).unwrap();
        assert_eq!(sys.data.tspan, DEFAULT_TSPAN);
        assert_eq!(sys.data.tval, 0.0);
        assert_eq!(sys.data.odeoption, SolverOptions::default());
        assert!(sys.data.pardef.is_empty());
    }

    #[test]
    fn rejects_duplicate_names() {
        let err = validate(&ode_raw(json!({
            "vardef": [{"name": "y", "value": 1.0}, {"name": "y", "value": 2.0}]
        })))
        .unwrap_err();
        assert!(matches!(err, SchemaError::DuplicateName { ref name, .. } if name == "y"));
    }

    #[test]
    fn rejects_non_string_name_and_bad_value() {
        let err = validate(&ode_raw(json!({"vardef": [{"name": 3, "value": 1.0}]}))).unwrap_err();
        assert_eq!(err.field(), "vardef[0].name");

        let err =
            validate(&ode_raw(json!({"vardef": [{"name": "y", "value": "one"}]}))).unwrap_err();
        assert_eq!(err.field(), "vardef.y.value");
    }

    #[test]
    fn accepts_vectors_and_matrices() {
        let sys = validate(&ode_raw(json!({
            "pardef": [{"name": "K", "value": [[1, 2], [3, 4]], "lim": [0, 5]}],
            "vardef": [{"name": "y", "value": [1, 2, 3]}]
        })))
        .unwrap();
        assert_eq!(sys.data.pardef.numel(), 4);
        assert_eq!(sys.state_dim(), 3);
    }

    #[test]
    fn rejects_crossed_limits() {
        let err = validate(&ode_raw(json!({
            "vardef": [{"name": "y", "value": 1.0, "lim": [2, 1]}]
        })))
        .unwrap_err();
        assert_eq!(err.field(), "vardef.y.lim");
    }

    #[test]
    fn rejects_tval_outside_tspan() {
        let err = validate(&ode_raw(json!({
            "vardef": [{"name": "y", "value": 1.0}],
            "tspan": [0, 10],
            "tval": 11
        })))
        .unwrap_err();
        assert_eq!(err.field(), "tval");
    }

    #[test]
    fn rejects_reversed_tspan() {
        let err = validate(&ode_raw(json!({
            "vardef": [{"name": "y", "value": 1.0}],
            "tspan": [5, 1]
        })))
        .unwrap_err();
        assert_eq!(err.field(), "tspan");
    }

    #[test]
    fn obsolete_pair_list_fails_hard() {
        let err = validate(&ode_raw(json!({"vardef": [["y", 1.0]]}))).unwrap_err();
        assert!(matches!(err, SchemaError::Obsolete { .. }));
    }

    #[test]
    fn odefun_without_solver_is_rejected() {
        let raw = RawSystem::new(json!({"vardef": [{"name": "y", "value": 1.0}]}))
            .odefun(|_, y, _| y.to_vec());
        let err = validate(&raw).unwrap_err();
        assert_eq!(err, counterpart("odefun", "odesolver"));
    }

    #[test]
    fn solver_without_function_is_rejected() {
        let raw = RawSystem::new(json!({"vardef": [{"name": "y", "value": 1.0}]}))
            .solver(Family::Ode, SolverHandle::new(Dummy));
        let err = validate(&raw).unwrap_err();
        assert!(matches!(err, SchemaError::Missing { .. }));
    }

    #[test]
    fn diagnostic_trial_call_checks_rhs_length() {
        let raw = RawSystem::new(json!({"vardef": [{"name": "y", "value": [1, 2]}]}))
            .odefun(|_, _, _| vec![0.0])
            .solver(Family::Ode, SolverHandle::new(Dummy));
        assert!(validate(&raw).is_ok());
        let err = validate_with(&raw, &ValidateOptions { diagnostic: true }).unwrap_err();
        assert!(matches!(err, SchemaError::RhsShape { ref function, .. } if function == "odefun"));
    }

    #[test]
    fn solver_must_implement_family_convention() {
        struct Bare;
        impl Solver for Bare {
            fn name(&self) -> &str {
                "bare"
            }
        }
        let raw = RawSystem::new(json!({"vardef": [{"name": "y", "value": 1.0}]}))
            .odefun(|_, y, _| y.to_vec())
            .solver(Family::Ode, SolverHandle::new(Bare));
        let err = validate(&raw).unwrap_err();
        assert_eq!(err.field(), "odesolver[0]");
    }
}
