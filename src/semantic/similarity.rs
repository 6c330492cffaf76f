//! Cosine similarity over raw embedding slices.
//!
//! Accumulates in `f64` so that long (3072-dim) vectors of small components
//! don't lose precision before the division.

/// Two vectors that were expected to share a dimensionality did not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Dimension mismatch: expected {expected}, got {got}")]
pub struct DimensionMismatch {
    pub expected: usize,
    pub got: usize,
}

/// Compute L2 norm of a vector.
pub fn l2_norm(v: &[f32]) -> f32 {
    v.iter()
        .map(|x| f64::from(*x) * f64::from(*x))
        .sum::<f64>()
        .sqrt() as f32
}

/// Cosine similarity between `a` and `b`.
///
/// Returns 0.0 when either vector has zero magnitude ("no similarity"), and
/// [`DimensionMismatch`] when the lengths differ. `expected` is always the
/// length of `a`.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32, DimensionMismatch> {
    if a.len() != b.len() {
        return Err(DimensionMismatch {
            expected: a.len(),
            got: b.len(),
        });
    }

    let mut dot = 0.0_f64;
    let mut norm_a = 0.0_f64;
    let mut norm_b = 0.0_f64;
    for (x, y) in a.iter().zip(b.iter()) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return Ok(0.0);
    }

    let score = dot / (norm_a.sqrt() * norm_b.sqrt());
    Ok(score.clamp(-1.0, 1.0) as f32)
}
