use crossbeam_channel::{Sender, bounded};
use once_cell::sync::OnceCell;
use std::sync::Mutex;
use std::thread;
use tracing::{debug, info, warn};

use crate::error::{EmbedError, Result};

use super::local::TokenModel;
use super::pooling::{self, TokenEmbeddings};
use super::{Backend, EmbedOptions, Embedding, EmbeddingProvider};

/// Resource limits of the hosting environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SandboxLimits {
    /// Texts longer than this are refused.
    pub max_input_bytes: usize,
    /// Token rows past this are dropped before pooling.
    pub max_tokens: usize,
    /// Pending requests before callers block.
    pub queue_capacity: usize,
}

impl Default for SandboxLimits {
    fn default() -> Self {
        Self {
            max_input_bytes: 16 * 1024,
            max_tokens: 256,
            queue_capacity: 32,
        }
    }
}

struct Job {
    text: String,
    reply: Sender<Result<TokenEmbeddings>>,
}

struct Host {
    jobs: Sender<Job>,
    dimensions: usize,
}

type Starter = Box<dyn FnOnce() -> Result<Host> + Send>;

/// Runs a model inside a dedicated host thread with bounded resources.
/// The model is constructed on that thread, so it never has to cross
/// threads itself; callers talk to it over a bounded queue.
pub struct SandboxProvider {
    name: String,
    limits: SandboxLimits,
    starter: Mutex<Option<Starter>>,
    host: OnceCell<Host>,
}

impl SandboxProvider {
    pub fn new<M, F>(name: impl Into<String>, loader: F, limits: SandboxLimits) -> Self
    where
        M: TokenModel + 'static,
        F: FnOnce() -> Result<M> + Send + 'static,
    {
        let name = name.into();
        let thread_name = format!("semsim-sandbox-{name}");
        let starter: Starter = Box::new(move || spawn_host(thread_name, loader, limits));
        Self {
            name,
            limits,
            starter: Mutex::new(Some(starter)),
            host: OnceCell::new(),
        }
    }

    pub fn limits(&self) -> SandboxLimits {
        self.limits
    }

    pub fn is_started(&self) -> bool {
        self.host.get().is_some()
    }

    fn host(&self) -> Result<&Host> {
        self.host.get_or_try_init(|| {
            let starter = self
                .starter
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .take()
                .ok_or_else(|| {
                    EmbedError::ModelUnavailable(format!("sandbox for {} failed to start earlier", self.name))
                })?;
            info!(model = %self.name, "starting sandbox host");
            starter()
        })
    }

    fn run(&self, text: &str) -> Result<TokenEmbeddings> {
        let host = self.host()?;
        let (reply, answer) = bounded(1);
        host.jobs
            .send(Job {
                text: text.to_string(),
                reply,
            })
            .map_err(|_| EmbedError::ModelUnavailable("sandbox host has stopped".into()))?;
        answer
            .recv()
            .map_err(|_| EmbedError::ModelUnavailable("sandbox host dropped the request".into()))?
    }
}

fn spawn_host<M, F>(thread_name: String, loader: F, limits: SandboxLimits) -> Result<Host>
where
    M: TokenModel + 'static,
    F: FnOnce() -> Result<M> + Send + 'static,
{
    let (ready_tx, ready_rx) = bounded::<Result<usize>>(1);
    let (jobs_tx, jobs_rx) = bounded::<Job>(limits.queue_capacity.max(1));

    thread::Builder::new()
        .name(thread_name)
        .spawn(move || {
            let model = match loader() {
                Ok(m) => m,
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };
            let _ = ready_tx.send(Ok(model.dimensions()));
            drop(ready_tx);

            for job in jobs_rx {
                let result = model.encode(&job.text).map(|mut tokens| {
                    tokens.truncate(limits.max_tokens);
                    tokens
                });
                let _ = job.reply.send(result);
            }
            debug!("sandbox host exiting");
        })
        .map_err(|e| EmbedError::ModelUnavailable(format!("spawning sandbox host: {e}")))?;

    let dimensions = ready_rx
        .recv()
        .map_err(|_| EmbedError::ModelUnavailable("sandbox host exited during startup".into()))?
        .map_err(|e| {
            warn!(error = %e, "sandbox model failed to load");
            match e {
                EmbedError::ModelUnavailable(_) => e,
                other => EmbedError::ModelUnavailable(other.to_string()),
            }
        })?;

    Ok(Host {
        jobs: jobs_tx,
        dimensions,
    })
}

impl EmbeddingProvider for SandboxProvider {
    fn embed(&self, text: &str, options: &EmbedOptions) -> Result<Embedding> {
        pooling::require_supported(options)?;
        if text.len() > self.limits.max_input_bytes {
            return Err(EmbedError::InvalidInput(format!(
                "text is {} bytes, sandbox accepts at most {}",
                text.len(),
                self.limits.max_input_bytes
            )));
        }
        let tokens = self.run(text)?;
        debug!(model = %self.name, tokens = tokens.rows(), "sandbox encoded text");
        let embedding = pooling::pool(&tokens, options)?;
        let declared = self.host()?.dimensions;
        if embedding.dimension() != declared {
            return Err(EmbedError::Inference(format!(
                "model declared {declared} dimensions but produced {}",
                embedding.dimension()
            )));
        }
        Ok(embedding)
    }

    fn dimensions(&self) -> Result<usize> {
        Ok(self.host()?.dimensions)
    }

    fn model_name(&self) -> &str {
        &self.name
    }

    fn backend(&self) -> Backend {
        Backend::Sandbox
    }
}
