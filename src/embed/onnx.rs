use ort::session::Session;
use ort::value::Tensor;
use std::path::Path;
use std::sync::Mutex;
use tokenizers::{Tokenizer, TruncationParams};
use tracing::debug;

use crate::error::{EmbedError, Result};

use super::local::TokenModel;
use super::pooling::TokenEmbeddings;

/// A sentence-transformer ONNX export run through ONNX Runtime, yielding
/// its `last_hidden_state` (one row per word piece).
pub struct OnnxModel {
    name: String,
    tokenizer: Tokenizer,
    session: Mutex<Session>,
    wants_token_types: bool,
    dimensions: usize,
}

impl OnnxModel {
    pub fn load(model_path: &Path, tokenizer_path: &Path, max_tokens: usize) -> Result<Self> {
        if !model_path.exists() {
            return Err(EmbedError::ModelUnavailable(format!(
                "model file not found: {}",
                model_path.display()
            )));
        }
        let tokenizer = Tokenizer::from_file(tokenizer_path).map_err(|e| {
            EmbedError::ModelUnavailable(format!("loading tokenizer {}: {e}", tokenizer_path.display()))
        })?;
        let tokenizer = truncating(tokenizer, max_tokens.max(1))?;
        let session = Session::builder()
            .and_then(|b| b.commit_from_file(model_path))
            .map_err(|e| {
                EmbedError::ModelUnavailable(format!("loading model {}: {e}", model_path.display()))
            })?;
        let wants_token_types = session.inputs.iter().any(|i| i.name == "token_type_ids");

        let mut model = Self {
            name: model_path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "onnx".into()),
            tokenizer,
            session: Mutex::new(session),
            wants_token_types,
            dimensions: 0,
        };

        // Hidden size is only known from a real forward pass
        model.dimensions = model.encode("test")?.dimensions();
        Ok(model)
    }
}

impl TokenModel for OnnxModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn encode(&self, text: &str) -> Result<TokenEmbeddings> {
        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| EmbedError::Inference(format!("tokenizing: {e}")))?;

        let ids: Vec<i64> = encoding.get_ids().iter().map(|&x| x as i64).collect();
        let mask: Vec<i64> = encoding.get_attention_mask().iter().map(|&x| x as i64).collect();
        let seq_len = ids.len();
        debug!(tokens = seq_len, "running onnx session");

        let attended: Vec<bool> = mask.iter().map(|&m| m != 0).collect();
        let ids = Tensor::from_array(([1usize, seq_len], ids)).map_err(inference)?;
        let mask = Tensor::from_array(([1usize, seq_len], mask)).map_err(inference)?;

        let mut session = self
            .session
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let outputs = if self.wants_token_types {
            let types = Tensor::from_array(([1usize, seq_len], vec![0i64; seq_len])).map_err(inference)?;
            session.run(ort::inputs![
                "input_ids" => ids,
                "attention_mask" => mask,
                "token_type_ids" => types,
            ])
        } else {
            session.run(ort::inputs![
                "input_ids" => ids,
                "attention_mask" => mask,
            ])
        }
        .map_err(inference)?;

        let (shape, data) = outputs[0].try_extract_tensor::<f32>().map_err(inference)?;
        let width = match shape.len() {
            // [batch, seq, hidden]
            3 => shape[2] as usize,
            // already pooled: [batch, hidden]
            2 => shape[1] as usize,
            n => {
                return Err(EmbedError::Inference(format!(
                    "unexpected model output rank {n}"
                )));
            }
        };
        let mask = if shape.len() == 3 { attended } else { vec![true] };
        TokenEmbeddings::new(width, data.to_vec(), mask)
    }
}

/// Cap encodings at `max_tokens`, keeping `[CLS]`/`[SEP]` in place.
fn truncating(mut tokenizer: Tokenizer, max_tokens: usize) -> Result<Tokenizer> {
    tokenizer
        .with_truncation(Some(TruncationParams {
            max_length: max_tokens,
            ..Default::default()
        }))
        .map_err(|e| EmbedError::ModelUnavailable(format!("configuring truncation: {e}")))?;
    Ok(tokenizer)
}

fn inference(e: ort::Error) -> EmbedError {
    EmbedError::Inference(e.to_string())
}
