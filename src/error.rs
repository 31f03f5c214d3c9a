use thiserror::Error;

/// Errors surfaced by embedding providers and the similarity engine.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EmbedError {
    /// Caller input is missing or malformed (absent text, text over a host limit).
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// The provider cannot satisfy the requested pooling/normalization.
    #[error("unsupported option: {0}")]
    UnsupportedOption(String),
    /// The backing model could not be loaded or reached.
    #[error("model unavailable: {0}")]
    ModelUnavailable(String),
    /// Vectors from incompatible models were compared.
    #[error("dimension mismatch: {left} vs {right}")]
    DimensionMismatch { left: usize, right: usize },
    /// The backend answered, but with output that cannot be turned into a vector.
    #[error("inference failure: {0}")]
    Inference(String),
}

impl EmbedError {
    pub fn kind(&self) -> &'static str {
        match self {
            EmbedError::InvalidInput(_) => "invalid_input",
            EmbedError::UnsupportedOption(_) => "unsupported_option",
            EmbedError::ModelUnavailable(_) => "model_unavailable",
            EmbedError::DimensionMismatch { .. } => "dimension_mismatch",
            EmbedError::Inference(_) => "inference",
        }
    }
}

pub type Result<T, E = EmbedError> = std::result::Result<T, E>;
