use std::collections::HashMap;
use std::fmt;
use std::future::Future;

use serde::{Deserialize, Serialize};

use crate::error::LlmError;

/// Provider id of the in-process transformers.js embedder shipped by editor hosts.
pub const TRANSFORMERS_JS: &str = "transformers.js";

pub trait EmbeddingProvider: Send + Sync {
    /// Stable identifier, used for capability gating and recorded alongside corpora.
    fn id(&self) -> &str;

    /// Vector dimensionality if known up front. `None` means the caller
    /// has to embed a sample to find out.
    fn dimensions(&self) -> Option<usize>;

    /// Upper bound on texts per `embed` call.
    fn max_batch_size(&self) -> usize {
        64
    }

    /// Embed a batch of texts, returning one vector per input in input order.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails or returns a malformed response.
    fn embed(&self, texts: &[String]) -> impl Future<Output = Result<Vec<Vec<f32>>, LlmError>> + Send;
}

/// Editor or process hosting the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum HostKind {
    Vscode,
    Jetbrains,
    #[default]
    Cli,
}

impl HostKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Vscode => "vscode",
            Self::Jetbrains => "jetbrains",
            Self::Cli => "cli",
        }
    }
}

impl fmt::Display for HostKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for HostKind {
    type Err = LlmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "vscode" => Ok(Self::Vscode),
            "jetbrains" => Ok(Self::Jetbrains),
            "cli" => Ok(Self::Cli),
            other => Err(LlmError::Other(format!("unknown host kind: {other}"))),
        }
    }
}

/// Which embedding providers may run on which hosts.
///
/// Built once at startup. Any `(provider, host)` pair not explicitly denied
/// is considered supported.
#[derive(Debug, Clone, Default)]
pub struct CapabilityTable {
    denied: HashMap<(String, HostKind), String>,
}

impl CapabilityTable {
    /// Table with the known-incompatible combinations pre-registered.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::default().deny(
            TRANSFORMERS_JS,
            HostKind::Jetbrains,
            "the 'transformers.js' embeddings provider needs a JavaScript runtime and is not \
             supported in JetBrains IDEs; use Ollama or an OpenAI-compatible endpoint instead",
        )
    }

    #[must_use]
    pub fn deny(mut self, provider_id: &str, host: HostKind, reason: &str) -> Self {
        self.denied
            .insert((provider_id.to_owned(), host), reason.to_owned());
        self
    }

    #[must_use]
    pub fn supported(&self, provider_id: &str, host: HostKind) -> bool {
        self.unsupported_reason(provider_id, host).is_none()
    }

    /// Human-readable reason when the pair is denied.
    #[must_use]
    pub fn unsupported_reason(&self, provider_id: &str, host: HostKind) -> Option<&str> {
        self.denied
            .get(&(provider_id.to_owned(), host))
            .map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_deny_transformers_on_jetbrains() {
        let table = CapabilityTable::with_defaults();
        assert!(!table.supported(TRANSFORMERS_JS, HostKind::Jetbrains));
        assert!(table.supported(TRANSFORMERS_JS, HostKind::Vscode));
        assert!(table.supported("ollama", HostKind::Jetbrains));
    }

    #[test]
    fn custom_denial_carries_reason() {
        let table = CapabilityTable::default().deny("local-bin", HostKind::Cli, "no binary");
        assert_eq!(
            table.unsupported_reason("local-bin", HostKind::Cli),
            Some("no binary")
        );
        assert!(table.supported("local-bin", HostKind::Vscode));
    }

    #[test]
    fn host_kind_parse_and_display() {
        assert_eq!("JetBrains".parse::<HostKind>().unwrap(), HostKind::Jetbrains);
        assert_eq!(HostKind::Vscode.to_string(), "vscode");
        assert!("emacs".parse::<HostKind>().is_err());
    }

    #[test]
    fn host_kind_serde_lowercase() {
        let json = serde_json::to_string(&HostKind::Jetbrains).unwrap();
        assert_eq!(json, "\"jetbrains\"");
        let back: HostKind = serde_json::from_str("\"cli\"").unwrap();
        assert_eq!(back, HostKind::Cli);
    }
}
