use super::{Config, EmbeddingProviderKind, RerankConfig};
use crate::vault::secret_from_env;

impl Config {
    pub(crate) fn apply_env_overrides(&mut self) {
        self.apply_env_overrides_core();
        self.apply_env_overrides_tuning();
        self.apply_env_secrets();
    }

    fn apply_env_overrides_core(&mut self) {
        if let Ok(v) = std::env::var("KESTREL_HOST") {
            match v.parse() {
                Ok(host) => self.host = host,
                Err(_) => tracing::warn!("ignoring invalid KESTREL_HOST value: {v}"),
            }
        }
        if let Ok(v) = std::env::var("KESTREL_SQLITE_PATH") {
            self.storage.sqlite_path = v;
        }
        if let Ok(v) = std::env::var("KESTREL_EMBED_PROVIDER") {
            if let Ok(kind) =
                serde_json::from_value::<EmbeddingProviderKind>(serde_json::Value::String(v.clone()))
            {
                self.embedding.provider = kind;
            } else {
                tracing::warn!("ignoring invalid KESTREL_EMBED_PROVIDER value: {v}");
            }
        }
        if let Ok(v) = std::env::var("KESTREL_EMBED_BASE_URL") {
            self.embedding.base_url = v;
        }
        if let Ok(v) = std::env::var("KESTREL_EMBED_MODEL") {
            self.embedding.model = v;
        }
        if let Ok(v) = std::env::var("KESTREL_EMBED_DIMENSIONS")
            && let Ok(dims) = v.parse::<usize>()
        {
            self.embedding.dimensions = Some(dims);
        }
        if let Ok(v) = std::env::var("KESTREL_REMOTE_URL") {
            self.remote.url = Some(v);
        }
        if let Ok(v) = std::env::var("KESTREL_REMOTE_REGION") {
            self.remote.region = Some(v);
        }
        if let Ok(v) = std::env::var("AWS_ACCESS_KEY_ID") {
            self.remote.access_key_id = Some(v);
        }
        if let Ok(v) = std::env::var("KESTREL_RERANK_URL") {
            self.rerank
                .get_or_insert_with(|| RerankConfig {
                    kind: super::RerankerKind::Http,
                    base_url: String::new(),
                    model: String::new(),
                })
                .base_url = v;
        }
        if let Ok(v) = std::env::var("KESTREL_RERANK_MODEL")
            && let Some(rerank) = self.rerank.as_mut()
        {
            rerank.model = v;
        }
        if let Ok(v) = std::env::var("KESTREL_LOG_FILE") {
            self.logging.file = Some(v);
        }
    }

    fn apply_env_overrides_tuning(&mut self) {
        if let Ok(v) = std::env::var("KESTREL_INDEX_LINES_PER_CHUNK")
            && let Ok(n) = v.parse::<usize>()
        {
            self.index.lines_per_chunk = n;
        }
        if let Ok(v) = std::env::var("KESTREL_INDEX_BATCH_SIZE")
            && let Ok(n) = v.parse::<usize>()
        {
            self.index.batch_size = n;
        }
        if let Ok(v) = std::env::var("KESTREL_RETRIEVAL_N_RETRIEVE")
            && let Ok(n) = v.parse::<usize>()
        {
            self.retrieval.n_retrieve = n;
        }
        if let Ok(v) = std::env::var("KESTREL_RETRIEVAL_N_FINAL")
            && let Ok(n) = v.parse::<usize>()
        {
            self.retrieval.n_final = n;
        }
    }

    fn apply_env_secrets(&mut self) {
        if let Some(s) = secret_from_env("KESTREL_OPENAI_API_KEY") {
            self.secrets.openai_api_key = Some(s);
        }
        if let Some(s) = secret_from_env("KESTREL_RERANK_API_KEY") {
            self.secrets.rerank_api_key = Some(s);
        }
        if let Some(s) = secret_from_env("AWS_SECRET_KEY") {
            self.secrets.remote_secret = Some(s);
        }
    }
}
