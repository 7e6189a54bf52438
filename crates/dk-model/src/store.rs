//! Named read/write access to definition collections.
//!
//! `get` is an optional lookup and reports a miss as `None`. `set` is a
//! contract: writing a name that does not exist is an error. All writers
//! return a new collection and leave the receiver untouched, and every
//! value they store passes [`Collection::check_value`].

use dk_core::{Real, Value, first_non_finite};

use crate::codec;
use crate::schema::{Bounds, Collection, CollectionKind, SystemDef};
use crate::{ModelError, ModelResult};

impl Collection {
    /// Value and position of the named entry, or `None`.
    pub fn get(&self, name: &str) -> Option<(&Value, usize)> {
        self.entries
            .iter()
            .enumerate()
            .find(|(_, e)| e.name == name)
            .map(|(i, e)| (&e.value, i))
    }

    /// Like [`Collection::get`], but a miss is an error.
    pub fn require(&self, name: &str) -> ModelResult<(&Value, usize)> {
        self.get(name).ok_or_else(|| self.not_found(name))
    }

    /// Replace the named entry's value. The new value must keep the entry's
    /// shape so the flattened layout does not move.
    pub fn set(&self, name: &str, value: Value) -> ModelResult<Collection> {
        let (current, index) = self.require(name)?;
        if current.shape() != value.shape() {
            return Err(ModelError::SizeMismatch {
                what: format!("{} '{}'", self.kind.field(), name),
                expected: current.shape().to_string(),
                actual: value.shape().to_string(),
            });
        }
        self.check_value(name, &value)?;
        let mut next = self.clone();
        next.entries[index].value = value;
        Ok(next)
    }

    pub fn get_bounds(&self, name: &str) -> Option<Bounds> {
        self.entries
            .iter()
            .find(|e| e.name == name)
            .map(|e| e.bounds_or_default())
    }

    /// Replace both limits at once. Crossed limits are rejected.
    pub fn set_bounds(&self, name: &str, bounds: Bounds) -> ModelResult<Collection> {
        if bounds.min.is_nan() || bounds.max.is_nan() || bounds.min > bounds.max {
            return Err(ModelError::InvalidBounds {
                name: name.to_string(),
                min: bounds.min,
                max: bounds.max,
            });
        }
        let (_, index) = self.require(name)?;
        let mut next = self.clone();
        next.entries[index].lim = Some(bounds);
        Ok(next)
    }

    /// Move the lower limit; the upper limit follows when it would be crossed.
    pub fn set_min(&self, name: &str, min: Real) -> ModelResult<Collection> {
        let (_, index) = self.require(name)?;
        let current = self.entries[index].bounds_or_default();
        let max = if min > current.max { min } else { current.max };
        self.set_bounds(name, Bounds::new(min, max))
    }

    /// Move the upper limit; the lower limit follows when it would be crossed.
    pub fn set_max(&self, name: &str, max: Real) -> ModelResult<Collection> {
        let (_, index) = self.require(name)?;
        let current = self.entries[index].bounds_or_default();
        let min = if max < current.min { max } else { current.min };
        self.set_bounds(name, Bounds::new(min, max))
    }

    pub fn get_all(&self) -> Vec<Real> {
        codec::flatten(self)
    }

    pub fn set_all(&self, flat: &[Real]) -> ModelResult<Collection> {
        codec::unflatten(self, flat)
    }

    /// Element rules every stored value obeys: finite everywhere, and
    /// non-negative in `lagdef`.
    pub fn check_value(&self, name: &str, value: &Value) -> ModelResult<()> {
        let invalid = |value: Real, reason| ModelError::InvalidValue {
            field: format!("{}.{}", self.kind.field(), name),
            value,
            reason,
        };
        if let Some((_, x)) = first_non_finite(value.as_slice()) {
            return Err(invalid(x, "values must be finite"));
        }
        if self.kind == CollectionKind::Lag
            && let Some(&lag) = value.as_slice().iter().find(|lag| **lag < 0.0)
        {
            return Err(invalid(lag, "lags must be non-negative"));
        }
        Ok(())
    }

    fn not_found(&self, name: &str) -> ModelError {
        ModelError::NotFound {
            collection: self.kind.field(),
            name: name.to_string(),
        }
    }
}

impl SystemDef {
    pub fn get(&self, kind: CollectionKind, name: &str) -> Option<&Value> {
        self.collection(kind).get(name).map(|(v, _)| v)
    }

    /// Copy of the description with one value replaced.
    pub fn set(&self, kind: CollectionKind, name: &str, value: Value) -> ModelResult<SystemDef> {
        let updated = self.collection(kind).set(name, value)?;
        Ok(self.with_collection(updated))
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use crate::schema::Entry;
    use proptest::prelude::*;

    #[derive(Debug, Clone)]
    enum Edit {
        Min(f64),
        Max(f64),
    }

    fn arb_edit() -> impl Strategy<Value = Edit> {
        prop_oneof![
            (-100.0_f64..100.0).prop_map(Edit::Min),
            (-100.0_f64..100.0).prop_map(Edit::Max),
        ]
    }

    proptest! {
        #[test]
        fn bounds_never_cross(edits in prop::collection::vec(arb_edit(), 1..20)) {
            let mut c = Collection::new(
                CollectionKind::Par,
                vec![Entry::new("k", 0.5).with_lim(0.0, 1.0)],
            );
            for edit in edits {
                c = match edit {
                    Edit::Min(x) => c.set_min("k", x).unwrap(),
                    Edit::Max(x) => c.set_max("k", x).unwrap(),
                };
                let b = c.get_bounds("k").unwrap();
                prop_assert!(b.min <= b.max);
            }
        }
    }
}
