use thiserror::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimilarityError {
    #[error("embedding length mismatch: {left} vs {right}")]
    LengthMismatch { left: usize, right: usize },
}

/// Cosine similarity of two equal-length vectors, in [-1, 1].
///
/// A zero-norm vector has no direction; comparing against it yields 0.0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f64, SimilarityError> {
    if a.len() != b.len() {
        return Err(SimilarityError::LengthMismatch {
            left: a.len(),
            right: b.len(),
        });
    }
    let dot: f64 = a.iter().zip(b).map(|(x, y)| *x as f64 * *y as f64).sum();
    let norm_a: f64 = a.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    let norm_b: f64 = b.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return Ok(0.0);
    }
    Ok((dot / (norm_a * norm_b)).clamp(-1.0, 1.0))
}

/// Element-wise mean. Vectors whose length differs from the first are skipped.
pub fn mean_vector<'a>(vectors: impl IntoIterator<Item = &'a [f32]>) -> Vec<f32> {
    let mut iter = vectors.into_iter();
    let Some(first) = iter.next() else {
        return Vec::new();
    };
    let mut sum: Vec<f64> = first.iter().map(|x| *x as f64).collect();
    let mut count = 1usize;
    for v in iter {
        if v.len() != sum.len() {
            tracing::warn!(
                expected = sum.len(),
                got = v.len(),
                "Skipping embedding with mismatched length in mean"
            );
            continue;
        }
        for (s, x) in sum.iter_mut().zip(v) {
            *s += *x as f64;
        }
        count += 1;
    }
    sum.into_iter().map(|s| (s / count as f64) as f32).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_vectors_score_one() {
        let v = [0.3f32, -1.2, 4.0, 0.01];
        let sim = cosine_similarity(&v, &v).unwrap();
        assert!((sim - 1.0).abs() < 1e-9, "got {sim}");
    }

    #[test]
    fn opposite_vectors_score_minus_one() {
        let sim = cosine_similarity(&[1.0, 2.0], &[-1.0, -2.0]).unwrap();
        assert!((sim + 1.0).abs() < 1e-9);
    }

    #[test]
    fn orthogonal_vectors_score_zero() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).unwrap(), 0.0);
    }

    #[test]
    fn zero_vector_scores_zero_not_nan() {
        let sim = cosine_similarity(&[0.0, 0.0, 0.0], &[1.0, 2.0, 3.0]).unwrap();
        assert_eq!(sim, 0.0);
        assert_eq!(cosine_similarity(&[], &[]).unwrap(), 0.0);
    }

    #[test]
    fn length_mismatch_is_an_error() {
        assert_eq!(
            cosine_similarity(&[1.0, 2.0], &[1.0, 2.0, 3.0]),
            Err(SimilarityError::LengthMismatch { left: 2, right: 3 })
        );
    }

    #[test]
    fn mean_of_vectors() {
        let a = [1.0f32, 3.0];
        let b = [3.0f32, 5.0];
        assert_eq!(mean_vector([&a[..], &b[..]]), vec![2.0, 4.0]);
    }

    #[test]
    fn mean_skips_mismatched_and_handles_empty() {
        let a = [2.0f32, 2.0];
        let odd = [9.0f32];
        assert_eq!(mean_vector([&a[..], &odd[..]]), vec![2.0, 2.0]);
        assert!(mean_vector(std::iter::empty::<&[f32]>()).is_empty());
    }
}
