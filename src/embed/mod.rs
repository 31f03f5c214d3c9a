pub mod hashing;
pub mod local;
#[cfg(feature = "onnx")]
pub mod onnx;
pub mod pooling;
pub mod remote;
pub mod sandbox;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::config::{EmbedBackend, EmbedConfig, ModelSpec};
use crate::error::{EmbedError, Result};

pub use hashing::HashingModel;
pub use local::{LocalProvider, TokenModel};
pub use pooling::TokenEmbeddings;
pub use remote::RemoteProvider;
pub use sandbox::{SandboxLimits, SandboxProvider};

/// A pooled text embedding. Immutable once produced.
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    values: Vec<f32>,
    normalized: bool,
}

impl Embedding {
    pub fn new(values: Vec<f32>, normalized: bool) -> Self {
        Self { values, normalized }
    }

    pub fn dimension(&self) -> usize {
        self.values.len()
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// True when the producing provider guaranteed unit norm.
    pub fn is_normalized(&self) -> bool {
        self.normalized
    }

    pub fn norm(&self) -> f32 {
        pooling::l2_norm(&self.values)
    }

    pub fn into_values(self) -> Vec<f32> {
        self.values
    }
}

/// How per-token outputs collapse into one vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Pooling {
    #[default]
    Mean,
    Max,
    Cls,
    /// Per-token output, no pooling.
    None,
}

impl Pooling {
    pub fn as_str(&self) -> &'static str {
        match self {
            Pooling::Mean => "mean",
            Pooling::Max => "max",
            Pooling::Cls => "cls",
            Pooling::None => "none",
        }
    }
}

impl fmt::Display for Pooling {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Pooling {
    type Err = EmbedError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mean" => Ok(Pooling::Mean),
            "max" => Ok(Pooling::Max),
            "cls" => Ok(Pooling::Cls),
            "none" => Ok(Pooling::None),
            other => Err(EmbedError::UnsupportedOption(format!(
                "unknown pooling strategy '{other}'"
            ))),
        }
    }
}

impl TryFrom<String> for Pooling {
    type Error = EmbedError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<Pooling> for String {
    fn from(p: Pooling) -> Self {
        p.as_str().to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmbedOptions {
    pub pooling: Pooling,
    pub normalize: bool,
}

impl Default for EmbedOptions {
    fn default() -> Self {
        Self {
            pooling: Pooling::Mean,
            normalize: true,
        }
    }
}

/// Where a provider runs its model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Local,
    Remote,
    Sandbox,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Backend::Local => "local",
            Backend::Remote => "remote",
            Backend::Sandbox => "sandbox",
        })
    }
}

pub trait EmbeddingProvider: Send + Sync {
    fn embed(&self, text: &str, options: &EmbedOptions) -> Result<Embedding>;
    /// Output width. May load the model.
    fn dimensions(&self) -> Result<usize>;
    fn model_name(&self) -> &str;
    fn backend(&self) -> Backend;
}

/// Entry point for glue code where the text may be absent.
pub fn embed_input(
    provider: &dyn EmbeddingProvider,
    text: Option<&str>,
    options: &EmbedOptions,
) -> Result<Embedding> {
    let text = text.ok_or_else(|| EmbedError::InvalidInput("no text supplied".into()))?;
    provider.embed(text, options)
}

/// Build the provider selected by `config`.
pub fn from_config(config: &EmbedConfig) -> Result<Box<dyn EmbeddingProvider>> {
    match &config.backend {
        EmbedBackend::Local { model } => local_provider(model),
        EmbedBackend::Remote {
            model,
            url,
            token_env,
        } => {
            let mut provider = RemoteProvider::new(model).with_token_env(token_env);
            if let Some(url) = url {
                provider = provider.with_url(url);
            }
            Ok(Box::new(provider))
        }
        EmbedBackend::Sandbox {
            model,
            max_input_bytes,
            max_tokens,
            queue_capacity,
        } => {
            if *max_tokens == 0 {
                return Err(EmbedError::UnsupportedOption(
                    "sandbox max_tokens must be at least 1".into(),
                ));
            }
            let limits = SandboxLimits {
                max_input_bytes: *max_input_bytes,
                max_tokens: *max_tokens,
                queue_capacity: *queue_capacity,
            };
            sandbox_provider(model, limits)
        }
    }
}

fn local_provider(model: &ModelSpec) -> Result<Box<dyn EmbeddingProvider>> {
    match model {
        ModelSpec::Hashing { dimensions } => {
            let dimensions = *dimensions;
            Ok(Box::new(LocalProvider::new(
                HashingModel::NAME,
                move || HashingModel::new(dimensions),
            )))
        }
        #[cfg(feature = "onnx")]
        ModelSpec::Onnx {
            name,
            model_path,
            tokenizer_path,
            max_tokens,
        } => {
            let (model_path, tokenizer_path, max_tokens) =
                (model_path.clone(), tokenizer_path.clone(), *max_tokens);
            Ok(Box::new(LocalProvider::new(name, move || {
                onnx::OnnxModel::load(&model_path, &tokenizer_path, max_tokens)
            })))
        }
        #[cfg(not(feature = "onnx"))]
        ModelSpec::Onnx { .. } => Err(onnx_disabled()),
    }
}

fn sandbox_provider(model: &ModelSpec, limits: SandboxLimits) -> Result<Box<dyn EmbeddingProvider>> {
    match model {
        ModelSpec::Hashing { dimensions } => {
            let dimensions = *dimensions;
            Ok(Box::new(SandboxProvider::new(
                HashingModel::NAME,
                move || HashingModel::new(dimensions),
                limits,
            )))
        }
        #[cfg(feature = "onnx")]
        ModelSpec::Onnx {
            name,
            model_path,
            tokenizer_path,
            max_tokens,
        } => {
            let (model_path, tokenizer_path, max_tokens) =
                (model_path.clone(), tokenizer_path.clone(), *max_tokens);
            Ok(Box::new(SandboxProvider::new(
                name,
                move || onnx::OnnxModel::load(&model_path, &tokenizer_path, max_tokens),
                limits,
            )))
        }
        #[cfg(not(feature = "onnx"))]
        ModelSpec::Onnx { .. } => Err(onnx_disabled()),
    }
}

#[cfg(not(feature = "onnx"))]
fn onnx_disabled() -> EmbedError {
    EmbedError::ModelUnavailable("onnx models need semsim built with the `onnx` feature".into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pooling_parses_known_names() {
        assert_eq!("mean".parse::<Pooling>().unwrap(), Pooling::Mean);
        assert_eq!(" MAX ".parse::<Pooling>().unwrap(), Pooling::Max);
        assert_eq!("none".parse::<Pooling>().unwrap(), Pooling::None);
    }

    #[test]
    fn pooling_rejects_unknown_names() {
        let err = "median".parse::<Pooling>().unwrap_err();
        assert!(matches!(err, EmbedError::UnsupportedOption(_)));
    }

    #[test]
    fn default_options_are_mean_normalized() {
        let o = EmbedOptions::default();
        assert_eq!(o.pooling, Pooling::Mean);
        assert!(o.normalize);
    }

    #[test]
    fn embed_input_rejects_absent_text() {
        let provider = LocalProvider::new("hash", || HashingModel::new(16));
        let err = embed_input(&provider, None, &EmbedOptions::default()).unwrap_err();
        assert!(matches!(err, EmbedError::InvalidInput(_)));
    }

    #[test]
    fn sandbox_without_token_budget_is_rejected() {
        let config = EmbedConfig {
            backend: EmbedBackend::Sandbox {
                model: ModelSpec::Hashing { dimensions: 8 },
                max_input_bytes: 1024,
                max_tokens: 0,
                queue_capacity: 4,
            },
            ..EmbedConfig::default()
        };
        let err = from_config(&config).err().unwrap();
        assert!(matches!(err, EmbedError::UnsupportedOption(ref m) if m.contains("max_tokens")));
    }

    #[test]
    fn from_config_selects_backend() {
        let mut config = EmbedConfig::default();
        let provider = from_config(&config).unwrap();
        assert_eq!(provider.backend(), Backend::Local);

        config.backend = EmbedBackend::Sandbox {
            model: ModelSpec::Hashing { dimensions: 32 },
            max_input_bytes: 1024,
            max_tokens: 64,
            queue_capacity: 4,
        };
        let provider = from_config(&config).unwrap();
        assert_eq!(provider.backend(), Backend::Sandbox);
        assert_eq!(provider.dimensions().unwrap(), 32);

        config.backend = EmbedBackend::Remote {
            model: "sentence-transformers/all-MiniLM-L6-v2".into(),
            url: None,
            token_env: "HF_TOKEN".into(),
        };
        let provider = from_config(&config).unwrap();
        assert_eq!(provider.backend(), Backend::Remote);
        assert_eq!(provider.model_name(), "sentence-transformers/all-MiniLM-L6-v2");
    }
}
