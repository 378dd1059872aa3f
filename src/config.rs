//! Local-provider configuration: which OpenAI-compatible endpoint to talk to
//! and which model name to request, resolved the way the reference crate's
//! `config` module does (defaults tuned for local inference servers, with
//! environment overrides read by the caller, never by the core) per
//! `SPEC_FULL.md` §6: "no env var reads in the core".

use std::fmt;

/// A local inference server family. Each has a conventional default base
/// URL and model name used when a caller doesn't override them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    LmStudio,
    Ollama,
    LlamaCpp,
    Vllm,
}

impl Provider {
    /// The provider's conventional OpenAI-compatible base URL.
    pub fn default_base_url(self) -> &'static str {
        match self {
            Provider::LmStudio => "http://localhost:1234/v1",
            Provider::Ollama => "http://localhost:11434/v1",
            Provider::LlamaCpp => "http://localhost:8080/v1",
            Provider::Vllm => "http://localhost:8000/v1",
        }
    }

    /// A reasonable default model identifier for the provider.
    pub fn default_model(self) -> &'static str {
        match self {
            Provider::LmStudio => "local-model",
            Provider::Ollama => "llama3",
            Provider::LlamaCpp => "default",
            Provider::Vllm => "default",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Provider::LmStudio => "lmstudio",
            Provider::Ollama => "ollama",
            Provider::LlamaCpp => "llamacpp",
            Provider::Vllm => "vllm",
        };
        f.write_str(s)
    }
}

/// Resolves the base URL to use: `override_url` if given, otherwise the
/// provider's default.
pub fn get_base_url(provider: Provider, override_url: Option<&str>) -> String {
    override_url.unwrap_or(provider.default_base_url()).to_string()
}

/// Resolves the model name to use: `override_model` if given, otherwise the
/// provider's default.
pub fn get_model(provider: Provider, override_model: Option<&str>) -> String {
    override_model.unwrap_or(provider.default_model()).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_base_url_per_provider() {
        assert_eq!(Provider::LmStudio.default_base_url(), "http://localhost:1234/v1");
        assert_eq!(Provider::Ollama.default_base_url(), "http://localhost:11434/v1");
    }

    #[test]
    fn get_base_url_prefers_override() {
        assert_eq!(
            get_base_url(Provider::Ollama, Some("http://example.com/v1")),
            "http://example.com/v1"
        );
        assert_eq!(get_base_url(Provider::Ollama, None), "http://localhost:11434/v1");
    }

    #[test]
    fn get_model_prefers_override() {
        assert_eq!(get_model(Provider::Vllm, Some("mixtral")), "mixtral");
        assert_eq!(get_model(Provider::Vllm, None), "default");
    }
}
