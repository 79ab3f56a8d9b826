//! Text embedding hook used by vector search.
//!
//! Model loading and inference live outside the bridge; callers plug in an
//! implementation.

use crate::error::Result;

pub trait Embedder: Send + Sync {
    /// Fixed-length vector for `text`
    fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

impl<F> Embedder for F
where
    F: Fn(&str) -> Result<Vec<f32>> + Send + Sync,
{
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self(text)
    }
}
