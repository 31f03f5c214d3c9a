use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::embed::remote::{DEFAULT_MODEL, DEFAULT_TOKEN_ENV};
use crate::embed::sandbox::SandboxLimits;
use crate::embed::{EmbedOptions, HashingModel, Pooling};

pub const DEFAULT_CONFIG_FILE: &str = "semsim.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub embed: EmbedConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbedConfig {
    pub backend: EmbedBackend,
    /// Pooling strategy requested from the provider
    #[serde(default)]
    pub pooling: Pooling,
    /// Scale vectors to unit length so the score is a cosine similarity
    #[serde(default = "default_normalize")]
    pub normalize: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EmbedBackend {
    /// Model runs in this process
    #[serde(rename = "local")]
    Local { model: ModelSpec },
    /// Hosted feature-extraction endpoint
    #[serde(rename = "remote")]
    Remote {
        model: String,
        /// Overrides the endpoint derived from `model`
        #[serde(default)]
        url: Option<String>,
        /// Environment variable holding the API token
        #[serde(default = "default_token_env")]
        token_env: String,
    },
    /// Model runs on an isolated host thread with resource limits
    #[serde(rename = "sandbox")]
    Sandbox {
        model: ModelSpec,
        max_input_bytes: usize,
        max_tokens: usize,
        queue_capacity: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum ModelSpec {
    #[serde(rename = "hashing")]
    Hashing { dimensions: usize },
    #[serde(rename = "onnx")]
    Onnx {
        name: String,
        model_path: PathBuf,
        tokenizer_path: PathBuf,
        #[serde(default = "default_max_tokens")]
        max_tokens: usize,
    },
}

fn default_normalize() -> bool {
    true
}

fn default_token_env() -> String {
    DEFAULT_TOKEN_ENV.to_string()
}

fn default_max_tokens() -> usize {
    256
}

impl Default for ModelSpec {
    fn default() -> Self {
        ModelSpec::Hashing {
            dimensions: HashingModel::DEFAULT_DIMENSIONS,
        }
    }
}

impl Default for EmbedConfig {
    fn default() -> Self {
        Self {
            backend: EmbedBackend::Local {
                model: ModelSpec::default(),
            },
            pooling: Pooling::Mean,
            normalize: true,
        }
    }
}

impl EmbedBackend {
    /// Default settings for a backend named on the command line.
    pub fn named(name: &str) -> Result<Self> {
        let limits = SandboxLimits::default();
        Ok(match name {
            "local" => EmbedBackend::Local {
                model: ModelSpec::default(),
            },
            "remote" => EmbedBackend::Remote {
                model: DEFAULT_MODEL.to_string(),
                url: None,
                token_env: default_token_env(),
            },
            "sandbox" => EmbedBackend::Sandbox {
                model: ModelSpec::default(),
                max_input_bytes: limits.max_input_bytes,
                max_tokens: limits.max_tokens,
                queue_capacity: limits.queue_capacity,
            },
            other => bail!("unknown backend '{other}' (expected local, remote or sandbox)"),
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            EmbedBackend::Local { .. } => "local",
            EmbedBackend::Remote { .. } => "remote",
            EmbedBackend::Sandbox { .. } => "sandbox",
        }
    }
}

impl EmbedConfig {
    pub fn options(&self) -> EmbedOptions {
        EmbedOptions {
            pooling: self.pooling,
            normalize: self.normalize,
        }
    }
}

impl Config {
    /// Load config from `path`, or from `semsim.toml` in the working
    /// directory, falling back to defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(p) => {
                if !p.exists() {
                    bail!("config file {} does not exist", p.display());
                }
                p.to_path_buf()
            }
            None => {
                let p = PathBuf::from(DEFAULT_CONFIG_FILE);
                if !p.exists() {
                    return Ok(Self::default());
                }
                p
            }
        };
        let contents = std::fs::read_to_string(&config_path)
            .with_context(|| format!("reading config from {}", config_path.display()))?;
        toml::from_str(&contents)
            .with_context(|| format!("parsing config from {}", config_path.display()))
    }

    /// Write current config to disk (for `semsim init`).
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating config dir {}", dir.display()))?;
        }
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)
            .with_context(|| format!("writing config to {}", path.display()))?;
        Ok(())
    }
}
