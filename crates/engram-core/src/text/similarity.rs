//! Vector similarity

use crate::error::EngineError;

/// Cosine similarity between two vectors.
///
/// Errors with [`EngineError::DimensionMismatch`] when the inputs differ in
/// length. A zero-magnitude operand yields 0.0.
pub fn cosine_similarity(a: &[f64], b: &[f64]) -> Result<f64, EngineError> {
    if a.len() != b.len() {
        return Err(EngineError::DimensionMismatch {
            left: a.len(),
            right: b.len(),
        });
    }

    let mut dot = 0.0;
    let mut norm_a = 0.0;
    let mut norm_b = 0.0;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom == 0.0 {
        return Ok(0.0);
    }
    Ok(dot / denom)
}
