//! Distance functions for embedding comparison
//!
//! These functions use iterator patterns that LLVM auto-vectorizes when
//! compiled with `-C target-cpu=native`.
//!
//! Face embeddings are matched in Euclidean (L2) space; the resolver's
//! threshold is expressed in the same metric.

/// Compute squared L2 (Euclidean) distance between two vectors
///
/// Returns ||a - b||² (no square root for performance).
#[inline(always)]
pub fn l2_distance_squared(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "Vector length mismatch");

    a.iter().zip(b).map(|(x, y)| (x - y).powi(2)).sum()
}

/// Compute L2 (Euclidean) distance between two vectors
///
/// Returns ||a - b||
#[inline(always)]
pub fn l2_distance(a: &[f32], b: &[f32]) -> f32 {
    l2_distance_squared(a, b).sqrt()
}

/// L2 normalize a vector, returning a new vector
///
/// Zero vectors are returned unchanged to avoid division by zero.
pub fn l2_normalized(v: &[f32]) -> Vec<f32> {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        v.iter().map(|x| x / norm).collect()
    } else {
        v.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_l2_distance() {
        let a = [0.0, 0.0, 0.0];
        let b = [3.0, 4.0, 0.0];

        // 3-4-5 triangle
        assert!((l2_distance(&a, &b) - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_l2_distance_same_point() {
        let a = [1.0f32, 2.0, 3.0, 4.0];
        assert!((l2_distance(&a, &a) - 0.0).abs() < 1e-6);
    }

    #[test]
    fn test_l2_distance_squared_symmetry() {
        let a = [1.0f32, 2.0, 3.0];
        let b = [4.0f32, 5.0, 6.0];
        assert!((l2_distance_squared(&a, &b) - l2_distance_squared(&b, &a)).abs() < 1e-6);
    }

    #[test]
    fn test_l2_normalized() {
        let v = l2_normalized(&[3.0, 4.0]);

        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);

        // Direction preserved: 3/5, 4/5
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_l2_normalized_zero_vector() {
        let v = vec![0.0f32; 64];
        let result = l2_normalized(&v);

        assert!(result.iter().all(|&x| x == 0.0), "Zero vector should remain zero");
    }

    #[test]
    fn test_large_dimension() {
        // VGG-Face scale embeddings
        let a: Vec<f32> = (0..4096).map(|i| (i as f32) / 4096.0).collect();
        let b: Vec<f32> = (0..4096).map(|i| ((4096 - i) as f32) / 4096.0).collect();

        let result = l2_distance(&a, &b);
        assert!(result.is_finite(), "Result should be finite");
    }
}
