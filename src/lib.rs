//! Semantic similarity between two texts.
//!
//! Each text is turned into an embedding by an [`EmbeddingProvider`]
//! (local, remote API, or sandboxed host), and the two vectors are scored
//! with a dot product. With normalized vectors the score is the cosine
//! similarity.
//!
//! ```
//! use semsim::embed::{EmbedOptions, HashingModel, LocalProvider};
//! use semsim::similarity::compare;
//!
//! let provider = LocalProvider::new(HashingModel::NAME, || HashingModel::new(384));
//! let result = compare(
//!     &provider,
//!     "That is a happy person",
//!     "That is a happy person",
//!     &EmbedOptions::default(),
//! )
//! .unwrap();
//! assert!((result.score - 1.0).abs() < 1e-5);
//! ```

pub mod config;
pub mod embed;
pub mod error;
pub mod similarity;

pub use embed::{Embedding, EmbedOptions, EmbeddingProvider, Pooling};
pub use error::EmbedError;
pub use similarity::{compare, similarity};
