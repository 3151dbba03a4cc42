//! Vector normalization and similarity metrics

/// Guard added to norms before division, so zero rows stay finite
pub const NORM_EPSILON: f32 = 1e-10;

/// L2 norm of a vector
pub fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Scale a vector to unit length in place
///
/// Idempotent for vectors that are already unit length. A zero vector stays
/// zero.
pub fn l2_normalize_in_place(v: &mut [f32]) {
    let norm = l2_norm(v) + NORM_EPSILON;
    for x in v.iter_mut() {
        *x /= norm;
    }
}

/// Return a unit-length copy of a vector
pub fn l2_normalize(v: &[f32]) -> Vec<f32> {
    let mut out = v.to_vec();
    l2_normalize_in_place(&mut out);
    out
}

/// Inner product of two vectors
///
/// # Panics
/// Panics if vectors have different dimensions
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    assert_eq!(
        a.len(),
        b.len(),
        "Vectors must have same dimension: {} vs {}",
        a.len(),
        b.len()
    );

    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_normalize_unit_length() {
        let v = l2_normalize(&[3.0, 4.0]);
        assert_relative_eq!(v[0], 0.6, epsilon = 1e-6);
        assert_relative_eq!(v[1], 0.8, epsilon = 1e-6);
        assert_relative_eq!(l2_norm(&v), 1.0, epsilon = 1e-5);
    }

    #[test]
    fn test_normalize_idempotent() {
        let once = l2_normalize(&[1.0, 2.0, 3.0]);
        let twice = l2_normalize(&once);
        for (a, b) in once.iter().zip(twice.iter()) {
            assert_relative_eq!(a, b, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_normalize_zero_vector_stays_zero() {
        let v = l2_normalize(&[0.0, 0.0, 0.0]);
        assert!(v.iter().all(|x| *x == 0.0));
    }

    #[test]
    #[should_panic(expected = "Vectors must have same dimension")]
    fn test_dot_different_dimensions() {
        dot(&[1.0, 2.0], &[1.0, 2.0, 3.0]);
    }
}
