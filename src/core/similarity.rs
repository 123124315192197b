use std::cmp::Ordering;

use ndarray::ArrayView1;
use serde::Serialize;

use crate::error::{AppError, Result};
use crate::models::store::EmbeddingStore;

/// One ranked search result
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    /// File name of the stored image
    pub name: String,
    /// Cosine similarity to the query, in [-1, 1]
    pub score: f32,
}

/// Compute cosine similarity between two embeddings.
///
/// Returns 0 when either vector has zero norm; otherwise the result is
/// clamped to [-1, 1].
pub fn cosine_similarity(a: ArrayView1<'_, f32>, b: ArrayView1<'_, f32>) -> f32 {
    let dot_product = a.dot(&b);
    let norm_a = a.dot(&a).sqrt();
    let norm_b = b.dot(&b).sqrt();

    if norm_a > 0.0 && norm_b > 0.0 {
        (dot_product / (norm_a * norm_b)).min(1.0).max(-1.0)
    } else {
        0.0
    }
}

/// Normalize a vector in-place and return whether the norm was non-zero.
pub fn normalize_l2_in_place(values: &mut [f32]) -> bool {
    let sum: f32 = values.iter().map(|v| v * v).sum();
    if !sum.is_finite() || sum <= 0.0 {
        return false;
    }
    let norm = sum.sqrt();
    for value in values {
        *value /= norm;
    }
    true
}

/// Normalize `values` to unit length, or replace them with `fallback(len)`
/// normalized when their norm is zero or not finite.
///
/// Returns `true` when the fallback was used. Errors if the fallback does
/// not produce a non-zero vector of the same length.
pub fn normalize_l2_or_else<F>(values: &mut Vec<f32>, fallback: F) -> Result<bool>
where
    F: FnOnce(usize) -> Result<Vec<f32>>,
{
    if normalize_l2_in_place(values) {
        return Ok(false);
    }
    let mut replacement = fallback(values.len())?;
    if replacement.len() != values.len() {
        return Err(AppError::DimensionMismatch {
            expected: values.len(),
            found: replacement.len(),
        });
    }
    if !normalize_l2_in_place(&mut replacement) {
        return Err(AppError::Internal("fallback embedding has zero norm".into()));
    }
    *values = replacement;
    Ok(true)
}

/// Rank every vector in `store` against `query` and keep the best `top_k`.
///
/// This is a single linear pass; there is no index. An empty store yields
/// an empty result, and `top_k` is clamped to the number of stored vectors.
pub fn search_similar(query: &[f32], store: &EmbeddingStore, top_k: usize) -> Result<Vec<SearchHit>> {
    if store.is_empty() {
        log::warn!("Embedding database is empty, nothing to search");
        return Ok(Vec::new());
    }

    let mut top_k = top_k;
    if store.len() < top_k {
        top_k = store.len();
        log::warn!(
            "Database only holds {} images, reducing top_k to {}",
            store.len(),
            top_k
        );
    }
    if top_k == 0 {
        return Ok(Vec::new());
    }

    if let Some(expected) = store.dimension() {
        if query.len() != expected {
            return Err(AppError::DimensionMismatch {
                expected,
                found: query.len(),
            });
        }
    }

    log::debug!("Query shape: [{}], DB shape: [{}, {}]", query.len(), store.len(), query.len());

    let query = ArrayView1::from(query);
    let mut hits: Vec<SearchHit> = store
        .iter()
        .map(|(name, vector)| SearchHit {
            name: name.to_string(),
            score: cosine_similarity(query, ArrayView1::from(vector)),
        })
        .collect();

    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.name.cmp(&b.name))
    });
    hits.truncate(top_k);
    Ok(hits)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array1;

    fn store_of(entries: &[(&str, Vec<f32>)]) -> EmbeddingStore {
        let mut store = EmbeddingStore::new("test");
        for (name, vector) in entries {
            store.insert(*name, vector.clone()).unwrap();
        }
        store
    }

    #[test]
    fn test_cosine_similarity() {
        // Test with identical vectors
        let a = Array1::from(vec![1.0, 0.0, 0.0]);
        let b = Array1::from(vec![1.0, 0.0, 0.0]);
        assert!((cosine_similarity(a.view(), b.view()) - 1.0).abs() < 1e-6);

        // Test with orthogonal vectors
        let a = Array1::from(vec![1.0, 0.0]);
        let b = Array1::from(vec![0.0, 1.0]);
        assert!((cosine_similarity(a.view(), b.view()) - 0.0).abs() < 1e-6);

        // Test with opposite vectors
        let a = Array1::from(vec![1.0, 0.0]);
        let b = Array1::from(vec![-1.0, 0.0]);
        assert!((cosine_similarity(a.view(), b.view()) - (-1.0)).abs() < 1e-6);

        // Zero vector
        let a = Array1::from(vec![0.0, 0.0]);
        let b = Array1::from(vec![3.0, 4.0]);
        assert_eq!(cosine_similarity(a.view(), b.view()), 0.0);
    }

    #[test]
    fn test_self_similarity_is_one_for_unnormalized_vectors() {
        let v = Array1::from(vec![0.3, -7.5, 2.25, 10.0]);
        assert!((cosine_similarity(v.view(), v.view()) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_normalize_l2_in_place() {
        let mut v = vec![3.0, 4.0];
        assert!(normalize_l2_in_place(&mut v));
        assert!((v[0] - 0.6).abs() < 1e-6 && (v[1] - 0.8).abs() < 1e-6);

        let mut zero = vec![0.0; 4];
        assert!(!normalize_l2_in_place(&mut zero));
        assert_eq!(zero, vec![0.0; 4]);
    }

    #[test]
    fn test_search_ranks_descending() {
        let store = store_of(&[
            ("far.png", vec![-1.0, 0.0]),
            ("near.png", vec![1.0, 0.1]),
            ("side.png", vec![0.0, 1.0]),
        ]);

        let hits = search_similar(&[1.0, 0.0], &store, 2).unwrap();
        let names: Vec<&str> = hits.iter().map(|h| h.name.as_str()).collect();
        assert_eq!(names, vec!["near.png", "side.png"]);
        assert!(hits[0].score >= hits[1].score);
    }

    #[test]
    fn test_search_clamps_top_k_and_breaks_ties_by_name() {
        let store = store_of(&[("b.png", vec![1.0, 0.0]), ("a.png", vec![2.0, 0.0])]);
        let hits = search_similar(&[1.0, 0.0], &store, 10).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].name, "a.png");
    }

    #[test]
    fn test_search_edge_cases() {
        let empty = EmbeddingStore::new("test");
        assert!(search_similar(&[1.0], &empty, 5).unwrap().is_empty());

        let store = store_of(&[("a.png", vec![1.0, 0.0])]);
        assert!(search_similar(&[1.0, 0.0], &store, 0).unwrap().is_empty());

        let err = search_similar(&[1.0, 0.0, 0.0], &store, 1).unwrap_err();
        assert!(matches!(err, AppError::DimensionMismatch { expected: 2, found: 3 }));
    }

    #[test]
    fn test_normalize_or_else_keeps_nonzero_vectors() {
        let mut values = vec![3.0, 4.0];
        let used = normalize_l2_or_else(&mut values, |_| panic!("fallback must not run")).unwrap();
        assert!(!used);
        assert_eq!(values, vec![0.6, 0.8]);
    }

    #[test]
    fn test_normalize_or_else_replaces_zero_vector() {
        let mut values = vec![0.0; 4];
        let used = normalize_l2_or_else(&mut values, |len| Ok(vec![0.01; len])).unwrap();
        assert!(used);
        for v in &values {
            assert!((v - 0.5).abs() < 1e-6);
        }

        let mut values = vec![0.0; 4];
        assert!(normalize_l2_or_else(&mut values, |_| Ok(vec![0.0; 4])).is_err());
        assert!(matches!(
            normalize_l2_or_else(&mut values, |_| Ok(vec![1.0; 3])),
            Err(AppError::DimensionMismatch { expected: 4, found: 3 })
        ));
    }
}
