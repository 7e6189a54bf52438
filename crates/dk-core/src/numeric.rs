use crate::DkError;

/// Floating point type used for every state, parameter and time value.
pub type Real = f64;

/// Mixed absolute/relative tolerance.
///
/// The same weighting serves float comparisons in tests and the local
/// error control of adaptive solvers: an error `e` between `a` and `b` is
/// acceptable when `|e| <= abs + rel * max(|a|, |b|)`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Tolerances {
    pub abs: Real,
    pub rel: Real,
}

impl Default for Tolerances {
    fn default() -> Self {
        Self {
            abs: 1e-12,
            rel: 1e-9,
        }
    }
}

impl Tolerances {
    pub fn new(abs: Real, rel: Real) -> Self {
        Self { abs, rel }
    }

    /// Acceptable error magnitude around `a` and `b`.
    pub fn scale(&self, a: Real, b: Real) -> Real {
        self.abs + self.rel * a.abs().max(b.abs())
    }

    /// `|err|` measured in units of [`Tolerances::scale`]. At most 1 means
    /// within tolerance.
    pub fn error_ratio(&self, err: Real, a: Real, b: Real) -> Real {
        err.abs() / self.scale(a, b)
    }
}

pub fn nearly_equal(a: Real, b: Real, tol: Tolerances) -> bool {
    tol.error_ratio(a - b, a, b) <= 1.0
}

pub fn ensure_finite(v: Real, what: &'static str) -> Result<Real, DkError> {
    if v.is_finite() {
        Ok(v)
    } else {
        Err(DkError::NonFinite { what, value: v })
    }
}

/// Position and value of the first NaN or infinite element.
pub fn first_non_finite(values: &[Real]) -> Option<(usize, Real)> {
    values
        .iter()
        .copied()
        .enumerate()
        .find(|(_, v)| !v.is_finite())
}
