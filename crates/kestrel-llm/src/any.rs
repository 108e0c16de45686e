use crate::error::LlmError;
#[cfg(feature = "mock")]
use crate::mock::MockEmbedder;
use crate::ollama::OllamaEmbedder;
use crate::openai::OpenAiEmbedder;
use crate::provider::EmbeddingProvider;

/// Generates a match over every `AnyEmbedder` variant, binding the inner
/// embedder to `$p` and evaluating `$expr` for each arm.
macro_rules! delegate_embedder {
    ($self:expr, |$p:ident| $expr:expr) => {
        match $self {
            AnyEmbedder::Ollama($p) => $expr,
            AnyEmbedder::OpenAi($p) => $expr,
            #[cfg(feature = "mock")]
            AnyEmbedder::Mock($p) => $expr,
        }
    };
}

#[derive(Debug, Clone)]
pub enum AnyEmbedder {
    Ollama(OllamaEmbedder),
    OpenAi(OpenAiEmbedder),
    #[cfg(feature = "mock")]
    Mock(MockEmbedder),
}

impl EmbeddingProvider for AnyEmbedder {
    fn id(&self) -> &str {
        delegate_embedder!(self, |p| p.id())
    }

    fn dimensions(&self) -> Option<usize> {
        delegate_embedder!(self, |p| p.dimensions())
    }

    fn max_batch_size(&self) -> usize {
        delegate_embedder!(self, |p| p.max_batch_size())
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
        delegate_embedder!(self, |p| p.embed(texts).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delegates_identity() {
        let ollama = AnyEmbedder::Ollama(
            OllamaEmbedder::new("http://localhost:11434", "nomic-embed-text".into())
                .unwrap()
                .with_dimensions(768),
        );
        assert_eq!(ollama.id(), "ollama");
        assert_eq!(ollama.dimensions(), Some(768));

        let openai = AnyEmbedder::OpenAi(
            OpenAiEmbedder::new("http://localhost/v1".into(), "m".into(), None)
                .unwrap()
                .with_batch_size(8),
        );
        assert_eq!(openai.id(), "openai");
        assert_eq!(openai.max_batch_size(), 8);
        assert_eq!(openai.dimensions(), None);
    }

    #[cfg(feature = "mock")]
    #[tokio::test]
    async fn delegates_embed_to_mock() {
        let any = AnyEmbedder::Mock(MockEmbedder::with_dims(4));
        let out = any.embed(&["x".into(), "y".into()]).await.unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].len(), 4);
    }
}
