use std::cmp::Ordering;

use crate::core::errors::IndexError;

pub fn cosine_similarity(query: &[f32], candidate: &[f32]) -> Result<f32, IndexError> {
    if query.len() != candidate.len() {
        return Err(IndexError::DimensionMismatch {
            expected: candidate.len(),
            actual: query.len(),
        });
    }
    if query.is_empty() {
        return Ok(0.0);
    }

    let dot: f32 = query.iter().zip(candidate).map(|(a, b)| a * b).sum();
    let denom = l2_norm(query) * l2_norm(candidate);
    if denom <= f32::EPSILON {
        return Ok(0.0);
    }

    Ok(dot / denom)
}

/// Maps a cosine value into `[0, 1]`. Opposed vectors count as no similarity.
pub fn similarity_score(cosine: f32) -> f32 {
    if cosine.is_nan() {
        return 0.0;
    }
    cosine.clamp(0.0, 1.0)
}

/// Scores every candidate against `query` and sorts best first.
///
/// The sort is stable, so equal scores keep the order in which candidates
/// were supplied.
pub fn rank_descending_by_cosine<'a, I>(
    query: &[f32],
    candidates: I,
) -> Result<Vec<(usize, f32)>, IndexError>
where
    I: IntoIterator<Item = &'a [f32]>,
{
    let mut scores = Vec::new();
    for (idx, candidate) in candidates.into_iter().enumerate() {
        let score = similarity_score(cosine_similarity(query, candidate)?);
        scores.push((idx, score));
    }

    scores.sort_by(|left, right| right.1.partial_cmp(&left.1).unwrap_or(Ordering::Equal));
    Ok(scores)
}

fn l2_norm(values: &[f32]) -> f32 {
    values.iter().map(|v| v * v).sum::<f32>().sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx_eq(left: f32, right: f32) -> bool {
        (left - right).abs() < 1e-5
    }

    #[test]
    fn cosine_is_one_for_identical_vectors() {
        let vec = vec![1.0, 2.0, 3.0, 4.0];
        let score = cosine_similarity(&vec, &vec).expect("cosine should work");
        assert!(approx_eq(score, 1.0));
    }

    #[test]
    fn cosine_is_zero_for_orthogonal_vectors() {
        let score = cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).expect("cosine should work");
        assert!(approx_eq(score, 0.0));
    }

    #[test]
    fn zero_vector_scores_zero() {
        let score = cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]).expect("cosine should work");
        assert_eq!(score, 0.0);
    }

    #[test]
    fn length_mismatch_is_an_error() {
        let err = cosine_similarity(&[1.0], &[1.0, 0.0]).unwrap_err();
        assert!(matches!(
            err,
            IndexError::DimensionMismatch {
                expected: 2,
                actual: 1
            }
        ));
    }

    #[test]
    fn negative_cosine_maps_to_zero() {
        let cosine = cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]).unwrap();
        assert!(approx_eq(cosine, -1.0));
        assert_eq!(similarity_score(cosine), 0.0);
    }

    #[test]
    fn ranking_returns_highest_similarity_first() {
        let query = vec![1.0, 0.0];
        let candidates = vec![vec![0.8, 0.2], vec![0.1, 0.9], vec![0.9, 0.0]];
        let ranked = rank_descending_by_cosine(&query, candidates.iter().map(Vec::as_slice))
            .expect("ranking should work");

        assert_eq!(ranked.len(), 3);
        assert_eq!(ranked[0].0, 2);
        assert_eq!(ranked[2].0, 1);
    }

    #[test]
    fn ranking_keeps_supplied_order_for_ties() {
        let query = vec![1.0, 0.0];
        let candidates = vec![vec![0.0, 1.0], vec![2.0, 0.0], vec![0.0, 3.0], vec![1.0, 0.0]];
        let ranked = rank_descending_by_cosine(&query, candidates.iter().map(Vec::as_slice))
            .expect("ranking should work");

        let order: Vec<usize> = ranked.iter().map(|(idx, _)| *idx).collect();
        assert_eq!(order, vec![1, 3, 0, 2]);
    }
}
