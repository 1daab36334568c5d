use std::fmt::{Debug, Display};

use num_traits::{Float as NumFloat, FloatConst, FromPrimitive};

/// Marker trait for the numeric types a graph can be evaluated in (`f32`, `f64`).
///
/// Bundles the numeric and utility traits needed by the evaluator and the
/// code-generation interpreter.
pub trait Float:
    NumFloat + FloatConst + FromPrimitive + Copy + Send + Sync + Default + Debug + Display + 'static
{
}

impl Float for f32 {}
impl Float for f64 {}

/// Convert a graph constant (always stored as `f64`) into the evaluation type.
#[inline]
pub(crate) fn cast<F: Float>(v: f64) -> F {
    F::from_f64(v).unwrap_or_else(F::nan)
}
