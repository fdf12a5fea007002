use anyhow::{Context, Result};
use async_trait::async_trait;
use datepulse_core::Embedding;

/// External embedding service: one vector per input, order preserved.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    fn name(&self) -> &str;

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>>;
}

/// Check a raw provider response against the request: one finite vector per
/// input, all of the same dimension.
pub fn validate_batch(expected: usize, raw: Vec<Vec<f32>>) -> Result<Vec<Embedding>> {
    if raw.len() != expected {
        anyhow::bail!(
            "Embedding service returned {} vectors for {} inputs",
            raw.len(),
            expected
        );
    }

    let mut vectors = Vec::with_capacity(raw.len());
    let mut dimension = None;
    for (index, values) in raw.into_iter().enumerate() {
        let embedding = match dimension {
            None => Embedding::new(values),
            Some(dim) => Embedding::with_dimension(values, dim),
        }
        .with_context(|| format!("Invalid embedding at position {}", index))?;
        dimension = Some(embedding.dim());
        vectors.push(embedding);
    }
    Ok(vectors)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_batch_accepts_uniform_vectors() {
        let out = validate_batch(2, vec![vec![0.1, 0.2], vec![0.3, 0.4]]).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[1].as_slice(), &[0.3, 0.4]);
    }

    #[test]
    fn test_validate_batch_rejects_count_and_dimension_mismatch() {
        assert!(validate_batch(3, vec![vec![0.1], vec![0.2]]).is_err());
        assert!(validate_batch(2, vec![vec![0.1, 0.2], vec![0.3]]).is_err());
        assert!(validate_batch(1, vec![vec![]]).is_err());
    }
}
