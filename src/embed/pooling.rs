use crate::error::{EmbedError, Result};

use super::{EmbedOptions, Embedding, Pooling};

/// Per-token output of a model: `rows` vectors of `dimensions` floats,
/// row-major, with an attention mask marking which rows are real tokens.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenEmbeddings {
    dimensions: usize,
    values: Vec<f32>,
    mask: Vec<bool>,
}

impl TokenEmbeddings {
    pub fn new(dimensions: usize, values: Vec<f32>, mask: Vec<bool>) -> Result<Self> {
        if dimensions == 0 {
            return Err(EmbedError::Inference("token embeddings have zero width".into()));
        }
        if values.len() % dimensions != 0 {
            return Err(EmbedError::Inference(format!(
                "{} values do not split into rows of {dimensions}",
                values.len()
            )));
        }
        let rows = values.len() / dimensions;
        if mask.len() != rows {
            return Err(EmbedError::Inference(format!(
                "attention mask has {} entries for {rows} tokens",
                mask.len()
            )));
        }
        Ok(Self {
            dimensions,
            values,
            mask,
        })
    }

    /// All rows attended.
    pub fn unmasked(dimensions: usize, values: Vec<f32>) -> Result<Self> {
        let rows = if dimensions == 0 { 0 } else { values.len() / dimensions };
        Self::new(dimensions, values, vec![true; rows])
    }

    pub fn from_rows(rows: Vec<Vec<f32>>) -> Result<Self> {
        let dimensions = rows.first().map(Vec::len).unwrap_or(0);
        if let Some(bad) = rows.iter().find(|r| r.len() != dimensions) {
            return Err(EmbedError::Inference(format!(
                "ragged token matrix: row of {} in matrix of width {dimensions}",
                bad.len()
            )));
        }
        Self::unmasked(dimensions, rows.into_iter().flatten().collect())
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn rows(&self) -> usize {
        self.mask.len()
    }

    pub fn row(&self, i: usize) -> &[f32] {
        &self.values[i * self.dimensions..(i + 1) * self.dimensions]
    }

    /// Drop every row past `max_rows`.
    pub fn truncate(&mut self, max_rows: usize) {
        if self.rows() > max_rows {
            self.values.truncate(max_rows * self.dimensions);
            self.mask.truncate(max_rows);
        }
    }
}

/// Attention-masked average across the token axis.
pub fn mean_pool(tokens: &TokenEmbeddings) -> Result<Vec<f32>> {
    let mut pooled = vec![0.0f64; tokens.dimensions];
    let mut count = 0usize;
    for (i, &attended) in tokens.mask.iter().enumerate() {
        if !attended {
            continue;
        }
        for (acc, &v) in pooled.iter_mut().zip(tokens.row(i)) {
            *acc += v as f64;
        }
        count += 1;
    }
    if count == 0 {
        return Err(EmbedError::InvalidInput("text produced no tokens".into()));
    }
    let n = count as f64;
    Ok(pooled.into_iter().map(|v| (v / n) as f32).collect())
}

pub fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|&x| (x as f64) * (x as f64)).sum::<f64>().sqrt() as f32
}

/// Zero vectors are left untouched.
pub fn l2_normalize_in_place(v: &mut [f32]) {
    let norm = v.iter().map(|&x| (x as f64) * (x as f64)).sum::<f64>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x = (*x as f64 / norm) as f32;
        }
    }
}

pub fn check_finite(v: &[f32]) -> Result<()> {
    match v.iter().position(|x| !x.is_finite()) {
        Some(i) => Err(EmbedError::Inference(format!(
            "backend returned non-finite value {} at index {i}",
            v[i]
        ))),
        None => Ok(()),
    }
}

/// Reject anything but mean pooling. Shared by every provider.
pub fn require_supported(options: &EmbedOptions) -> Result<()> {
    match options.pooling {
        Pooling::Mean => Ok(()),
        other => Err(EmbedError::UnsupportedOption(format!(
            "pooling '{other}' is not supported; only 'mean' is"
        ))),
    }
}

/// Pool a token matrix and apply the normalization policy.
pub fn pool(tokens: &TokenEmbeddings, options: &EmbedOptions) -> Result<Embedding> {
    require_supported(options)?;
    let pooled = mean_pool(tokens)?;
    finish(pooled, options)
}

/// Turn an already-pooled vector into an [`Embedding`].
pub fn finish(mut values: Vec<f32>, options: &EmbedOptions) -> Result<Embedding> {
    if values.is_empty() {
        return Err(EmbedError::Inference("backend returned an empty vector".into()));
    }
    check_finite(&values)?;
    if options.normalize {
        if l2_norm(&values) == 0.0 {
            return Err(EmbedError::Inference(
                "cannot normalize a zero vector".into(),
            ));
        }
        l2_normalize_in_place(&mut values);
    }
    Ok(Embedding::new(values, options.normalize))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts(normalize: bool) -> EmbedOptions {
        EmbedOptions {
            pooling: Pooling::Mean,
            normalize,
        }
    }

    #[test]
    fn rejects_ragged_shapes() {
        assert!(TokenEmbeddings::new(0, vec![], vec![]).is_err());
        assert!(TokenEmbeddings::new(3, vec![1.0; 4], vec![true]).is_err());
        assert!(TokenEmbeddings::new(2, vec![1.0; 4], vec![true]).is_err());
        assert!(TokenEmbeddings::from_rows(vec![vec![1.0, 2.0], vec![1.0]]).is_err());
    }

    #[test]
    fn mean_pool_averages_rows() {
        let t = TokenEmbeddings::from_rows(vec![vec![1.0, 2.0], vec![3.0, 6.0]]).unwrap();
        assert_eq!(mean_pool(&t).unwrap(), vec![2.0, 4.0]);
    }

    #[test]
    fn mean_pool_skips_masked_rows() {
        let t = TokenEmbeddings::new(2, vec![1.0, 1.0, 100.0, 100.0], vec![true, false]).unwrap();
        assert_eq!(mean_pool(&t).unwrap(), vec![1.0, 1.0]);
    }

    #[test]
    fn mean_pool_of_nothing_is_invalid_input() {
        let t = TokenEmbeddings::new(2, vec![1.0, 1.0], vec![false]).unwrap();
        assert!(matches!(mean_pool(&t), Err(EmbedError::InvalidInput(_))));
    }

    #[test]
    fn truncate_drops_trailing_rows() {
        let mut t =
            TokenEmbeddings::from_rows(vec![vec![1.0], vec![2.0], vec![3.0]]).unwrap();
        t.truncate(2);
        assert_eq!(t.rows(), 2);
        assert_eq!(t.row(1), &[2.0]);
    }

    #[test]
    fn normalize_simple_vector() {
        let mut v = vec![3.0f32, 4.0];
        l2_normalize_in_place(&mut v);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn normalize_zero_vector_is_noop() {
        let mut v = vec![0.0f32; 3];
        l2_normalize_in_place(&mut v);
        assert_eq!(v, vec![0.0; 3]);
    }

    #[test]
    fn finish_normalizes_on_request() {
        let e = finish(vec![1.0, 2.0, 3.0, 4.0], &opts(true)).unwrap();
        assert!((e.norm() - 1.0).abs() < 1e-6);
        assert!(e.is_normalized());

        let raw = finish(vec![3.0, 4.0], &opts(false)).unwrap();
        assert_eq!(raw.values(), &[3.0, 4.0]);
        assert!(!raw.is_normalized());
    }

    #[test]
    fn finish_rejects_non_finite() {
        let err = finish(vec![1.0, f32::NAN], &opts(false)).unwrap_err();
        assert!(matches!(err, EmbedError::Inference(_)));
    }

    #[test]
    fn finish_rejects_zero_vector_when_normalizing() {
        assert!(finish(vec![0.0, 0.0], &opts(true)).is_err());
        assert!(finish(vec![0.0, 0.0], &opts(false)).is_ok());
    }

    #[test]
    fn pool_rejects_max() {
        let t = TokenEmbeddings::from_rows(vec![vec![1.0]]).unwrap();
        let options = EmbedOptions {
            pooling: Pooling::Max,
            normalize: true,
        };
        assert!(matches!(
            pool(&t, &options),
            Err(EmbedError::UnsupportedOption(_))
        ));
    }
}
