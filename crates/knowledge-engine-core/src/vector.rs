//! Dimension-checked vector arithmetic.
//!
//! [`Vector`] is an immutable, fixed-length sequence of `f32` values. Every
//! binary operation requires both operands to have the same dimension and
//! fails with [`EngineError::DimensionMismatch`] otherwise. All functions are
//! pure: they never mutate their inputs and always return fresh vectors.
//!
//! # Example
//!
//! ```rust
//! use knowledge_engine_core::vector::{cosine_similarity, normalize, Vector};
//!
//! let a = Vector::new(vec![3.0, 4.0]);
//! let unit = normalize(&a);
//! assert!((unit.values()[0] - 0.6).abs() < 1e-6);
//! assert!((cosine_similarity(&a, &unit).unwrap() - 1.0).abs() < 1e-6);
//! ```

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// A fixed-length float vector. The dimension is the number of components.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Vector {
    values: Vec<f32>,
}

impl Vector {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn into_values(self) -> Vec<f32> {
        self.values
    }

    /// Fail unless this vector has exactly `expected` components.
    pub fn check_dim(&self, expected: usize) -> Result<()> {
        if self.dim() != expected {
            return Err(EngineError::DimensionMismatch {
                expected,
                actual: self.dim(),
            });
        }
        Ok(())
    }
}

impl From<Vec<f32>> for Vector {
    fn from(values: Vec<f32>) -> Self {
        Self::new(values)
    }
}

fn ensure_same_dim(a: &Vector, b: &Vector) -> Result<()> {
    b.check_dim(a.dim())
}

pub fn dot_product(a: &Vector, b: &Vector) -> Result<f32> {
    ensure_same_dim(a, b)?;
    Ok(a.values.iter().zip(b.values.iter()).map(|(x, y)| x * y).sum())
}

/// L2 magnitude.
pub fn norm(a: &Vector) -> f32 {
    a.values.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Cosine similarity in `[-1.0, 1.0]`.
///
/// Returns `0.0` (not an error) when either vector has zero magnitude.
pub fn cosine_similarity(a: &Vector, b: &Vector) -> Result<f32> {
    ensure_same_dim(a, b)?;

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.values.iter().zip(b.values.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return Ok(0.0);
    }

    Ok(dot / (norm_a.sqrt() * norm_b.sqrt()))
}

/// Scale `a` to unit length. A zero vector is returned unchanged.
pub fn normalize(a: &Vector) -> Vector {
    let n = norm(a);
    if n == 0.0 {
        return a.clone();
    }
    Vector::new(a.values.iter().map(|x| x / n).collect())
}

pub fn add(a: &Vector, b: &Vector) -> Result<Vector> {
    ensure_same_dim(a, b)?;
    Ok(Vector::new(
        a.values.iter().zip(b.values.iter()).map(|(x, y)| x + y).collect(),
    ))
}

pub fn subtract(a: &Vector, b: &Vector) -> Result<Vector> {
    ensure_same_dim(a, b)?;
    Ok(Vector::new(
        a.values.iter().zip(b.values.iter()).map(|(x, y)| x - y).collect(),
    ))
}

pub fn scale(a: &Vector, factor: f32) -> Vector {
    Vector::new(a.values.iter().map(|x| x * factor).collect())
}

pub fn zero(dim: usize) -> Vector {
    Vector::new(vec![0.0; dim])
}

/// Uniformly random components in `[min, max]`. Bounds are swapped if inverted.
pub fn random(dim: usize, min: f32, max: f32) -> Vector {
    let (lo, hi) = if min <= max { (min, max) } else { (max, min) };
    let mut rng = rand::thread_rng();
    Vector::new((0..dim).map(|_| rng.gen_range(lo..=hi)).collect())
}

/// Component-wise comparison: every `|a[i] - b[i]| <= tolerance`.
pub fn equals(a: &Vector, b: &Vector, tolerance: f32) -> Result<bool> {
    ensure_same_dim(a, b)?;
    Ok(a.values
        .iter()
        .zip(b.values.iter())
        .all(|(x, y)| (x - y).abs() <= tolerance))
}
