//! Numeric conversion helpers centralizing safe numeric casts.

use num_traits::cast::cast;

/// Convert a count to f64 while allowing precision loss in a single location.
#[must_use]
pub fn count_to_f64(value: usize) -> f64 {
    cast::<usize, f64>(value).unwrap_or(f64::MAX)
}

/// Convert a period or path counter to f64.
#[must_use]
pub fn u32_to_f64(value: u32) -> f64 {
    f64::from(value)
}

/// Narrow a dense index to u16, returning `None` when it does not fit.
#[must_use]
pub fn index_to_u16(value: usize) -> Option<u16> {
    cast::<usize, u16>(value)
}

/// Narrow a dense index to u8, returning `None` when it does not fit.
#[must_use]
pub fn index_to_u8(value: usize) -> Option<u8> {
    cast::<usize, u8>(value)
}

/// Round a parsed feature value to u8, rejecting negatives, NaN and values above 255.
#[must_use]
pub fn feature_from_f64(value: f64) -> Option<u8> {
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    cast::<f64, u8>(value.round())
}

/// Binarize a count against a strict threshold: 1 when `count > threshold`.
#[must_use]
pub fn binarize(count: usize, threshold: u32) -> u8 {
    u8::from(count > threshold as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_conversion_is_exact_for_small_values() {
        assert!((count_to_f64(7) - 7.0).abs() < f64::EPSILON);
        assert!((u32_to_f64(3) - 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn narrowing_fails_out_of_range() {
        assert_eq!(index_to_u8(300), None);
        assert_eq!(index_to_u16(70_000), None);
        assert_eq!(index_to_u8(12), Some(12));
    }

    #[test]
    fn feature_parsing_rejects_bad_values() {
        assert_eq!(feature_from_f64(1.0), Some(1));
        assert_eq!(feature_from_f64(-1.0), None);
        assert_eq!(feature_from_f64(f64::NAN), None);
        assert_eq!(feature_from_f64(256.0), None);
    }

    #[test]
    fn binarize_is_strict() {
        assert_eq!(binarize(4, 4), 0);
        assert_eq!(binarize(5, 4), 1);
        assert_eq!(binarize(1, 0), 1);
        assert_eq!(binarize(0, 0), 0);
    }
}
