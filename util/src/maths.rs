//! Utility maths functions

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use num_traits::Float;

/// Clamp a value into the range [min, max].
///
/// NaN values are mapped to zero if zero lies in the range, otherwise to `min`.
pub fn clamp<T>(value: &T, min: &T, max: &T) -> T
where
    T: Float
{
    if value.is_nan() {
        return if *min <= T::zero() && T::zero() <= *max { T::zero() } else { *min }
    }

    let mut ret = *value;

    if ret > *max {
        ret = *max
    }
    if ret < *min {
        ret = *min
    }

    ret
}
