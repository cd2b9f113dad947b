//! Geometric adstock: carryover of media spend into later periods.

use ndarray::{Array1, ArrayView1};

/// Geometric (exponential decay) adstock.
///
/// `adstock[0] = x[0]` and `adstock[t] = x[t] + alpha * adstock[t-1]`.
///
/// The recursion is evaluated strictly in time order. `alpha = 0` returns the input unchanged,
/// values close to 1 approach the cumulative sum.
pub fn geometric_adstock(x: &ArrayView1<f64>, alpha: f64) -> Array1<f64> {
    let mut result = Array1::zeros(x.len());
    let mut carry = 0.0;
    for (out, &value) in result.iter_mut().zip(x.iter()) {
        carry = value + alpha * carry;
        *out = carry;
    }
    result
}

/// Adstock level reached when `spend` is held constant indefinitely
pub fn steady_state_adstock(spend: f64, alpha: f64) -> f64 {
    spend / (1.0 - alpha)
}
