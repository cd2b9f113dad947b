//! Hill-type saturation: diminishing returns of accumulated media pressure.

use ndarray::{Array1, ArrayView1};

/// Floor applied to the input so that a zero input does not divide by zero
pub const EPSILON: f64 = 1e-9;

/// Smallest and largest values [hill] returns
pub const HILL_RANGE: (f64, f64) = (f64::MIN_POSITIVE, 1.0 - f64::EPSILON);

/// Hill saturation of a single value.
///
/// Formula: `1 / (1 + (kappa / x)^slope)`, with `x` floored at [EPSILON].
///
/// - `kappa` is the half-saturation point: `hill(kappa, s, kappa) == 0.5` for every slope
/// - `slope` controls the steepness (1 is Michaelis-Menten)
///
/// Far from `kappa` a steep curve leaves the range of `f64`: `(kappa / x)^slope` overflows
/// or vanishes. The result is then clamped to [HILL_RANGE] so it stays strictly inside (0, 1).
pub fn hill(x: f64, slope: f64, kappa: f64) -> f64 {
    let x = x.max(EPSILON);
    (1.0 / (1.0 + (kappa / x).powf(slope))).clamp(HILL_RANGE.0, HILL_RANGE.1)
}

/// Derivative of [hill] with respect to its input
pub fn hill_derivative(x: f64, slope: f64, kappa: f64) -> f64 {
    let x = x.max(EPSILON);
    let r = (kappa / x).powf(slope);
    let denom = 1.0 + r;
    slope * r / (x * denom * denom)
}

/// Element-wise [hill] over a series
pub fn hill_saturation(x: &ArrayView1<f64>, slope: f64, kappa: f64) -> Array1<f64> {
    x.mapv(|v| hill(v, slope, kappa))
}
