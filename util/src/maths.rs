//! Utility maths functions

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use num_traits::Float;

/// Map a value from one range into another.
///
/// The value is not restricted to the source range, values outside it are extrapolated along the
/// same line.
pub fn lin_map<T>(source_range: (T, T), target_range: (T, T), value: T) -> T
where 
    T: Float 
{
    target_range.0 
        + ((value - source_range.0) 
        * (target_range.1 - target_range.0) 
        / (source_range.1 - source_range.0))
}

/// Linearly interpolate between `a` and `b`, `t = 0` giving `a` and `t = 1` giving `b`.
///
/// Unlike [`lin_map`] both ends of the range are reproduced exactly. Values of `t` outside
/// `[0, 1]` extrapolate.
pub fn lerp<T>(a: T, b: T, t: T) -> T
where
    T: Float
{
    a * (T::one() - t) + b * t
}

/// Restrict a value to the range `[min, max]`.
///
/// NaN is passed through unchanged.
pub fn clamp<T>(value: T, min: T, max: T) -> T 
where
    T: Float
{
    let mut ret = value;

    if ret > max {
        ret = max
    }
    if ret < min {
        ret = min
    }

    ret
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_lin_map() {
        assert_eq!(lin_map((0f64, 10f64), (0f64, 100f64), 5f64), 50f64);
        assert_eq!(lin_map((90f64, 100f64), (0f64, 0.28f64), 90f64), 0f64);
        assert!((lin_map((90f64, 100f64), (0f64, 0.28f64), 100f64) - 0.28).abs() < 1e-12);

        // Extrapolation past the end of the source range
        assert_eq!(lin_map((0f64, 1f64), (0f64, 2f64), 3f64), 6f64);
    }

    #[test]
    fn test_lerp() {
        assert_eq!(lerp(0.28f64, 0.4f64, 0f64), 0.28);
        assert_eq!(lerp(0.28f64, 0.4f64, 1f64), 0.4);
        assert!((lerp(0.28f64, 0.4f64, 0.5f64) - 0.34).abs() < 1e-12);
        assert!((lerp(0.4f64, 0.5f64, 1.5f64) - 0.55).abs() < 1e-12);
    }

    #[test]
    fn test_clamp() {
        assert_eq!(clamp(150f64, 0f64, 100f64), 100f64);
        assert_eq!(clamp(-1f64, 0f64, 100f64), 0f64);
        assert_eq!(clamp(42f64, 0f64, 100f64), 42f64);
        assert!(clamp(f64::NAN, 0f64, 100f64).is_nan());
    }
}
