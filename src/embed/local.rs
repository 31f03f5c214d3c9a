use once_cell::sync::OnceCell;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{EmbedError, Result};

use super::pooling::{self, TokenEmbeddings};
use super::{Backend, EmbedOptions, Embedding, EmbeddingProvider};

/// A model that maps text to one vector per token.
pub trait TokenModel {
    fn name(&self) -> &str;
    fn dimensions(&self) -> usize;
    fn encode(&self, text: &str) -> Result<TokenEmbeddings>;
}

type Loader<M> = Box<dyn Fn() -> Result<M> + Send + Sync>;

/// Runs a [`TokenModel`] in the caller's process. The model is loaded on
/// first use; concurrent first calls block on a single load.
pub struct LocalProvider<M> {
    name: String,
    loader: Loader<M>,
    model: OnceCell<M>,
}

impl<M: TokenModel + Send + Sync> LocalProvider<M> {
    pub fn new<F>(name: impl Into<String>, loader: F) -> Self
    where
        F: Fn() -> Result<M> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            loader: Box::new(loader),
            model: OnceCell::new(),
        }
    }

    /// Wrap an already-loaded model.
    pub fn with_model(model: M) -> Self {
        let name = model.name().to_string();
        Self {
            name,
            loader: Box::new(|| Err(EmbedError::ModelUnavailable("model already loaded".into()))),
            model: OnceCell::with_value(model),
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.model.get().is_some()
    }

    fn model(&self) -> Result<&M> {
        self.model.get_or_try_init(|| {
            let start = Instant::now();
            info!(model = %self.name, "loading local model");
            match (self.loader)() {
                Ok(model) => {
                    info!(
                        model = %self.name,
                        dimensions = model.dimensions(),
                        elapsed_ms = start.elapsed().as_millis() as u64,
                        "local model ready"
                    );
                    Ok(model)
                }
                Err(e) => {
                    warn!(model = %self.name, error = %e, "local model failed to load");
                    Err(match e {
                        EmbedError::ModelUnavailable(_) => e,
                        other => EmbedError::ModelUnavailable(other.to_string()),
                    })
                }
            }
        })
    }
}

impl<M: TokenModel + Send + Sync> EmbeddingProvider for LocalProvider<M> {
    fn embed(&self, text: &str, options: &EmbedOptions) -> Result<Embedding> {
        pooling::require_supported(options)?;
        let model = self.model()?;
        let tokens = model.encode(text)?;
        debug!(model = %self.name, tokens = tokens.rows(), "encoded text");
        let embedding = pooling::pool(&tokens, options)?;
        if embedding.dimension() != model.dimensions() {
            return Err(EmbedError::Inference(format!(
                "model declared {} dimensions but produced {}",
                model.dimensions(),
                embedding.dimension()
            )));
        }
        Ok(embedding)
    }

    fn dimensions(&self) -> Result<usize> {
        Ok(self.model()?.dimensions())
    }

    fn model_name(&self) -> &str {
        &self.name
    }

    fn backend(&self) -> Backend {
        Backend::Local
    }
}
