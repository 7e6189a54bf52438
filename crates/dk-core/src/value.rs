//! Shaped real values.
//!
//! Every parameter, variable, lag and auxiliary definition carries a `Value`:
//! a scalar, a row vector, a column vector or a matrix. Storage is a
//! column-major `DMatrix`, which is also the order elements take when a value
//! is flattened into a solver vector.

use core::fmt;
use core::str::FromStr;

use nalgebra::DMatrix;

use crate::{DkError, DkResult, Real, ensure_finite};

/// Orientation of a value, preserved across flatten/unflatten round trips.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Shape {
    Scalar,
    Row(usize),
    Column(usize),
    Matrix(usize, usize),
}

impl Shape {
    pub fn from_dims(rows: usize, cols: usize) -> Self {
        match (rows, cols) {
            (1, 1) => Shape::Scalar,
            (1, n) => Shape::Row(n),
            (n, 1) => Shape::Column(n),
            (r, c) => Shape::Matrix(r, c),
        }
    }

    pub fn dims(self) -> (usize, usize) {
        match self {
            Shape::Scalar => (1, 1),
            Shape::Row(n) => (1, n),
            Shape::Column(n) => (n, 1),
            Shape::Matrix(r, c) => (r, c),
        }
    }

    pub fn numel(self) -> usize {
        let (r, c) = self.dims();
        r * c
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (r, c) = self.dims();
        write!(f, "{r}x{c}")
    }
}

/// A non-empty real scalar, vector or matrix.
#[derive(Clone, Debug, PartialEq)]
pub struct Value(DMatrix<Real>);

impl Value {
    pub fn scalar(x: Real) -> Self {
        Self(DMatrix::from_element(1, 1, x))
    }

    /// Row vector, the shape a flat list of numbers takes.
    pub fn row(xs: impl Into<Vec<Real>>) -> DkResult<Self> {
        let xs = xs.into();
        non_empty(xs.len())?;
        Ok(Self(DMatrix::from_row_slice(1, xs.len(), &xs)))
    }

    pub fn column(xs: impl Into<Vec<Real>>) -> DkResult<Self> {
        let xs = xs.into();
        non_empty(xs.len())?;
        Ok(Self(DMatrix::from_column_slice(xs.len(), 1, &xs)))
    }

    /// Build from a list of rows; every row must have the same length.
    pub fn from_rows(rows: &[Vec<Real>]) -> DkResult<Self> {
        let nrows = rows.len();
        let ncols = rows.first().map(Vec::len).unwrap_or(0);
        non_empty(nrows * ncols)?;
        if let Some(bad) = rows.iter().find(|r| r.len() != ncols) {
            return Err(DkError::ShapeMismatch {
                what: "matrix rows must have equal length",
                expected: ncols.to_string(),
                actual: bad.len().to_string(),
            });
        }
        let flat: Vec<Real> = rows.iter().flatten().copied().collect();
        Ok(Self(DMatrix::from_row_slice(nrows, ncols, &flat)))
    }

    /// Rebuild a value of the given shape from column-major data.
    pub fn from_column_major(shape: Shape, data: &[Real]) -> DkResult<Self> {
        if data.len() != shape.numel() {
            return Err(DkError::ShapeMismatch {
                what: "element count",
                expected: shape.numel().to_string(),
                actual: data.len().to_string(),
            });
        }
        non_empty(data.len())?;
        let (r, c) = shape.dims();
        Ok(Self(DMatrix::from_column_slice(r, c, data)))
    }

    pub fn from_matrix(m: DMatrix<Real>) -> DkResult<Self> {
        non_empty(m.len())?;
        Ok(Self(m))
    }

    pub fn shape(&self) -> Shape {
        Shape::from_dims(self.0.nrows(), self.0.ncols())
    }

    pub fn numel(&self) -> usize {
        self.0.len()
    }

    /// The value as a plain number, if it has exactly one element.
    pub fn as_scalar(&self) -> Option<Real> {
        (self.numel() == 1).then(|| self.0[0])
    }

    /// First element in column-major order. Values are never empty.
    pub fn first(&self) -> Real {
        self.0[0]
    }

    /// Elements in column-major order.
    pub fn as_slice(&self) -> &[Real] {
        self.0.as_slice()
    }

    pub fn as_matrix(&self) -> &DMatrix<Real> {
        &self.0
    }

    pub fn get(&self, index: usize) -> Option<Real> {
        self.as_slice().get(index).copied()
    }

    pub fn min(&self) -> Real {
        self.0.iter().copied().fold(Real::INFINITY, Real::min)
    }

    pub fn max(&self) -> Real {
        self.0.iter().copied().fold(Real::NEG_INFINITY, Real::max)
    }

    pub fn is_finite(&self) -> bool {
        self.0.iter().all(|x| x.is_finite())
    }

    /// Same shape, new column-major contents.
    pub fn with_data(&self, data: &[Real]) -> DkResult<Self> {
        Self::from_column_major(self.shape(), data)
    }

    /// Copy with one element replaced.
    pub fn with_element(&self, index: usize, x: Real) -> DkResult<Self> {
        if index >= self.numel() {
            return Err(DkError::InvalidArg {
                what: "element offset out of range",
            });
        }
        let mut m = self.0.clone();
        m[index] = x;
        Ok(Self(m))
    }

    fn rows(&self) -> Vec<Vec<Real>> {
        self.0
            .row_iter()
            .map(|r| r.iter().copied().collect())
            .collect()
    }
}

impl From<Real> for Value {
    fn from(x: Real) -> Self {
        Value::scalar(x)
    }
}

fn non_empty(n: usize) -> DkResult<()> {
    if n == 0 {
        Err(DkError::InvalidArg {
            what: "values must have at least one element",
        })
    } else {
        Ok(())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.shape() {
            Shape::Scalar => write!(f, "{}", self.first()),
            Shape::Row(_) | Shape::Column(_) => {
                let parts: Vec<String> = self.0.iter().map(|x| x.to_string()).collect();
                write!(f, "[{}]", parts.join(", "))
            }
            Shape::Matrix(..) => {
                let rows: Vec<String> = self
                    .rows()
                    .iter()
                    .map(|r| {
                        r.iter()
                            .map(|x| x.to_string())
                            .collect::<Vec<_>>()
                            .join(", ")
                    })
                    .collect();
                write!(f, "[{}]", rows.join("; "))
            }
        }
    }
}

/// Parses `2`, `1,2,3` (row) and `1,2;3,4` (matrix, rows split by `;`).
impl FromStr for Value {
    type Err = DkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parse_row = |row: &str| -> DkResult<Vec<Real>> {
            row.split(',')
                .map(|tok| {
                    let x = tok.trim().parse::<Real>().map_err(|_| DkError::InvalidArg {
                        what: "malformed number",
                    })?;
                    ensure_finite(x, "value")
                })
                .collect()
        };
        let rows = s
            .trim()
            .trim_start_matches('[')
            .trim_end_matches(']')
            .split(';')
            .map(parse_row)
            .collect::<DkResult<Vec<_>>>()?;
        match rows.as_slice() {
            [single] if single.len() == 1 => Ok(Value::scalar(single[0])),
            [single] => Value::row(single.clone()),
            _ => Value::from_rows(&rows),
        }
    }
}

#[cfg(feature = "serde")]
mod serde_impl {
    use super::*;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Serialize, Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Scalar(Real),
        Flat(Vec<Real>),
        Rows(Vec<Vec<Real>>),
    }

    impl Serialize for Value {
        fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
            let repr = match self.shape() {
                Shape::Scalar => Repr::Scalar(self.first()),
                Shape::Row(_) => Repr::Flat(self.as_slice().to_vec()),
                Shape::Column(_) | Shape::Matrix(..) => Repr::Rows(self.rows()),
            };
            repr.serialize(serializer)
        }
    }

    impl<'de> Deserialize<'de> for Value {
        fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
            let value = match Repr::deserialize(deserializer)? {
                Repr::Scalar(x) => Ok(Value::scalar(x)),
                Repr::Flat(xs) => Value::row(xs),
                Repr::Rows(rows) => Value::from_rows(&rows),
            };
            value.map_err(serde::de::Error::custom)
        }
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn column_major_rebuild_is_exact(rows in 1_usize..4, cols in 1_usize..4, seed in -100.0_f64..100.0) {
            let data: Vec<Real> = (0..rows * cols).map(|i| seed + i as Real).collect();
            let shape = Shape::from_dims(rows, cols);
            let v = Value::from_column_major(shape, &data).unwrap();
            prop_assert_eq!(v.shape(), shape);
            prop_assert_eq!(v.as_slice(), data.as_slice());
        }
    }
}
