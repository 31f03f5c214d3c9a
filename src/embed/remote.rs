use once_cell::sync::OnceCell;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{EmbedError, Result};

use super::pooling::{self, TokenEmbeddings};
use super::{Backend, EmbedOptions, Embedding, EmbeddingProvider};

pub const DEFAULT_MODEL: &str = "sentence-transformers/all-MiniLM-L6-v2";
pub const DEFAULT_TOKEN_ENV: &str = "HF_TOKEN";
const ROUTER_BASE: &str = "https://router.huggingface.co/hf-inference/models";

/// Hosted inference over the HuggingFace feature-extraction API.
pub struct RemoteProvider {
    agent: ureq::Agent,
    url: String,
    model: String,
    token_env: String,
    token: Option<String>,
    dimensions: OnceCell<usize>,
}

/// What the endpoint handed back: already pooled, or one row per token.
#[derive(Debug, PartialEq)]
enum FeatureOutput {
    Pooled(Vec<f32>),
    Tokens(TokenEmbeddings),
}

impl RemoteProvider {
    pub fn new(model: &str) -> Self {
        Self {
            agent: ureq::Agent::new_with_defaults(),
            url: feature_extraction_url(model),
            model: model.to_string(),
            token_env: DEFAULT_TOKEN_ENV.to_string(),
            token: None,
            dimensions: OnceCell::new(),
        }
    }

    pub fn with_url(mut self, url: &str) -> Self {
        self.url = url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_token_env(mut self, var: &str) -> Self {
        self.token_env = var.to_string();
        self
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn token(&self) -> Result<String> {
        if let Some(token) = &self.token {
            return Ok(token.clone());
        }
        match std::env::var(&self.token_env) {
            Ok(t) if !t.trim().is_empty() => Ok(t.trim().to_string()),
            _ => Err(EmbedError::ModelUnavailable(format!(
                "no API token: set ${}",
                self.token_env
            ))),
        }
    }

    fn request(&self, text: &str) -> Result<Value> {
        let token = self.token()?;
        let body = serde_json::json!({ "inputs": text });

        let result = self
            .agent
            .post(&self.url)
            .header("Authorization", format!("Bearer {token}"))
            .send_json(&body);

        let mut response = match result {
            Ok(r) => r,
            Err(ureq::Error::StatusCode(code)) => return Err(status_error(code)),
            Err(e) => {
                return Err(EmbedError::ModelUnavailable(format!(
                    "request to {} failed: {e}",
                    self.url
                )));
            }
        };

        response
            .body_mut()
            .read_json::<Value>()
            .map_err(|e| EmbedError::Inference(format!("parsing feature-extraction response: {e}")))
    }

    fn check_dimension(&self, got: usize) -> Result<()> {
        let expected = *self.dimensions.get_or_init(|| got);
        if expected != got {
            warn!(model = %self.model, expected, got, "endpoint changed output width");
            return Err(EmbedError::Inference(format!(
                "endpoint returned {got} dimensions, earlier responses had {expected}"
            )));
        }
        Ok(())
    }
}

impl EmbeddingProvider for RemoteProvider {
    fn embed(&self, text: &str, options: &EmbedOptions) -> Result<Embedding> {
        pooling::require_supported(options)?;
        debug!(model = %self.model, bytes = text.len(), "remote embed");

        let embedding = match parse_feature_output(self.request(text)?)? {
            FeatureOutput::Pooled(values) => pooling::finish(values, options)?,
            FeatureOutput::Tokens(tokens) => {
                debug!(tokens = tokens.rows(), "endpoint returned per-token output, pooling locally");
                pooling::pool(&tokens, options)?
            }
        };
        self.check_dimension(embedding.dimension())?;
        Ok(embedding)
    }

    fn dimensions(&self) -> Result<usize> {
        if let Some(d) = self.dimensions.get() {
            return Ok(*d);
        }
        // Width is unknown until the endpoint has answered once
        Ok(self.embed("test", &EmbedOptions::default())?.dimension())
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn backend(&self) -> Backend {
        Backend::Remote
    }
}

pub fn feature_extraction_url(model: &str) -> String {
    format!("{ROUTER_BASE}/{model}/pipeline/feature-extraction")
}

fn status_error(code: u16) -> EmbedError {
    match code {
        401 | 403 => EmbedError::ModelUnavailable(format!("API rejected credentials (HTTP {code})")),
        404 => EmbedError::ModelUnavailable("model not found on endpoint (HTTP 404)".into()),
        429 => EmbedError::ModelUnavailable("rate limited (HTTP 429)".into()),
        500..=599 => EmbedError::ModelUnavailable(format!("endpoint unavailable (HTTP {code})")),
        _ => EmbedError::InvalidInput(format!("endpoint refused request (HTTP {code})")),
    }
}

fn parse_feature_output(value: Value) -> Result<FeatureOutput> {
    match depth(&value) {
        1 => Ok(FeatureOutput::Pooled(parse_vector(&value)?)),
        2 => Ok(FeatureOutput::Tokens(parse_matrix(&value)?)),
        3 => match value.as_array().map(Vec::as_slice) {
            Some([only]) => Ok(FeatureOutput::Tokens(parse_matrix(only)?)),
            _ => Err(EmbedError::Inference(
                "expected a batch of one in 3-D response".into(),
            )),
        },
        d => Err(EmbedError::Inference(format!(
            "unsupported feature-extraction response of depth {d}"
        ))),
    }
}

/// Nesting depth following first elements; scalars are depth 0.
fn depth(value: &Value) -> usize {
    match value {
        Value::Array(items) => 1 + items.first().map(depth).unwrap_or(0),
        _ => 0,
    }
}

fn parse_vector(value: &Value) -> Result<Vec<f32>> {
    let items = value
        .as_array()
        .ok_or_else(|| EmbedError::Inference("embedding must be an array".into()))?;
    items
        .iter()
        .map(|v| {
            v.as_f64()
                .map(|f| f as f32)
                .ok_or_else(|| EmbedError::Inference(format!("embedding entries must be numbers, got {v}")))
        })
        .collect()
}

fn parse_matrix(value: &Value) -> Result<TokenEmbeddings> {
    let rows = value
        .as_array()
        .ok_or_else(|| EmbedError::Inference("token matrix must be an array".into()))?
        .iter()
        .map(parse_vector)
        .collect::<Result<Vec<_>>>()?;
    TokenEmbeddings::from_rows(rows)
}
