//! Test-only deterministic embedder.
//!
//! Vectors are a hashed bag of lowercase word tokens, L2-normalized, so texts
//! sharing vocabulary land close together under cosine similarity.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::LlmError;
use crate::provider::EmbeddingProvider;

#[derive(Debug, Clone)]
pub struct MockEmbedder {
    pub id: String,
    pub dims: usize,
    /// When `false`, `dimensions()` returns `None` and callers must embed a sample.
    pub advertise_dimensions: bool,
    pub batch_size: usize,
    /// Any batch containing a text with this substring fails.
    pub fail_on: Option<String>,
    calls: Arc<AtomicUsize>,
    texts_embedded: Arc<AtomicUsize>,
}

impl Default for MockEmbedder {
    fn default() -> Self {
        Self {
            id: "mock".into(),
            dims: 64,
            advertise_dimensions: true,
            batch_size: 16,
            fail_on: None,
            calls: Arc::new(AtomicUsize::new(0)),
            texts_embedded: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl MockEmbedder {
    #[must_use]
    pub fn with_dims(dims: usize) -> Self {
        Self {
            dims,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_id(mut self, id: &str) -> Self {
        self.id = id.to_owned();
        self
    }

    #[must_use]
    pub fn failing_on(mut self, needle: &str) -> Self {
        self.fail_on = Some(needle.to_owned());
        self
    }

    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    #[must_use]
    pub fn without_advertised_dimensions(mut self) -> Self {
        self.advertise_dimensions = false;
        self
    }

    /// Number of `embed` calls so far, shared across clones.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }

    /// Total texts embedded so far, shared across clones.
    #[must_use]
    pub fn texts_embedded(&self) -> usize {
        self.texts_embedded.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn vector_for(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dims.max(1)];
        for token in text
            .split(|c: char| !c.is_alphanumeric() && c != '_')
            .filter(|t| !t.is_empty())
        {
            let token = token.to_lowercase();
            let hash = blake3::hash(token.as_bytes());
            let bytes = hash.as_bytes();
            let idx = u64::from_le_bytes([
                bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
            ]);
            #[allow(clippy::cast_possible_truncation)]
            let slot = (idx % v.len() as u64) as usize;
            v[slot] += 1.0;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut v {
                *x /= norm;
            }
        } else {
            v[0] = 1.0;
        }
        v
    }
}

impl EmbeddingProvider for MockEmbedder {
    fn id(&self) -> &str {
        &self.id
    }

    fn dimensions(&self) -> Option<usize> {
        self.advertise_dimensions.then_some(self.dims)
    }

    fn max_batch_size(&self) -> usize {
        self.batch_size
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        if let Some(needle) = &self.fail_on
            && texts.iter().any(|t| t.contains(needle.as_str()))
        {
            return Err(LlmError::Other(format!("mock embed failure on '{needle}'")));
        }
        self.texts_embedded.fetch_add(texts.len(), Ordering::Relaxed);
        Ok(texts.iter().map(|t| self.vector_for(t)).collect())
    }
}
