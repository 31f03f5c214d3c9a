use regex::Regex;

use crate::error::{EmbedError, Result};

use super::local::TokenModel;
use super::pooling::TokenEmbeddings;

const DERIVE_CONTEXT: &str = "semsim hashing model 2024-01 token vectors";

/// Weight-free token model: every lowercase word maps to a fixed
/// pseudo-random vector drawn from a BLAKE3 XOF stream. Texts sharing
/// words share direction, so mean pooling yields a usable lexical
/// similarity without any model files.
pub struct HashingModel {
    dimensions: usize,
    words: Regex,
}

impl HashingModel {
    pub const NAME: &'static str = "hashing-bow";
    pub const DEFAULT_DIMENSIONS: usize = 384;

    pub fn new(dimensions: usize) -> Result<Self> {
        if dimensions == 0 {
            return Err(EmbedError::ModelUnavailable(
                "hashing model needs at least one dimension".into(),
            ));
        }
        let words = Regex::new(r"\w+").map_err(|e| EmbedError::ModelUnavailable(e.to_string()))?;
        Ok(Self { dimensions, words })
    }

    pub fn tokenize<'a>(&self, text: &'a str) -> impl Iterator<Item = &'a str> {
        self.words.find_iter(text).map(|m| m.as_str())
    }

    fn token_vector(&self, token: &str, out: &mut Vec<f32>) {
        let mut hasher = blake3::Hasher::new_derive_key(DERIVE_CONTEXT);
        hasher.update(token.to_lowercase().as_bytes());
        let mut reader = hasher.finalize_xof();
        let mut buf = [0u8; 4];
        for _ in 0..self.dimensions {
            reader.fill(&mut buf);
            let unit = u32::from_le_bytes(buf) as f64 / u32::MAX as f64;
            out.push((unit * 2.0 - 1.0) as f32);
        }
    }
}

impl TokenModel for HashingModel {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn encode(&self, text: &str) -> Result<TokenEmbeddings> {
        let mut values = Vec::new();
        for token in self.tokenize(text) {
            self.token_vector(token, &mut values);
        }
        TokenEmbeddings::unmasked(self.dimensions, values)
    }
}
