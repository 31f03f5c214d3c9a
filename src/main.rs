use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::BufRead;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use semsim::config::{Config, DEFAULT_CONFIG_FILE, EmbedBackend};
use semsim::embed::{self, EmbedOptions, Pooling};
use semsim::similarity;

#[derive(Parser)]
#[command(name = "semsim", version, about = "Semantic similarity between two texts")]
struct Cli {
    /// Config file (default: ./semsim.toml if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Override the configured backend: local, remote or sandbox
    #[arg(long, global = true)]
    backend: Option<String>,
    /// Override the pooling strategy
    #[arg(long, global = true)]
    pooling: Option<String>,
    /// Log debug output to stderr
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Score how similar two texts are
    Compare {
        /// First text (read from stdin if omitted)
        text1: Option<String>,
        /// Second text (read from stdin if omitted)
        text2: Option<String>,
        /// Skip normalization and report the raw inner product
        #[arg(long)]
        raw: bool,
        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the embedding of a text as JSON
    Embed {
        /// Text to embed (read from stdin if omitted)
        text: Option<String>,
    },
    /// Write a default config file
    Init {
        /// Destination path
        #[arg(default_value = DEFAULT_CONFIG_FILE)]
        path: PathBuf,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<()> {
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(name) = &cli.backend {
        config.embed.backend = EmbedBackend::named(name)?;
    }
    if let Some(pooling) = &cli.pooling {
        config.embed.pooling = pooling.parse::<Pooling>()?;
    }

    match cli.command {
        Commands::Init { path } => {
            config.save(&path)?;
            println!("wrote {}", path.display());
        }
        Commands::Embed { text } => {
            let mut stdin = stdin_lines();
            let text = text.or_else(|| stdin.next());
            let provider = embed::from_config(&config.embed)?;
            let embedding = embed::embed_input(provider.as_ref(), text.as_deref(), &config.embed.options())?;
            println!("{}", serde_json::to_string(embedding.values())?);
        }
        Commands::Compare {
            text1,
            text2,
            raw,
            json,
        } => {
            let mut stdin = stdin_lines();
            let text1 = text1.or_else(|| stdin.next());
            let text2 = text2.or_else(|| stdin.next());
            let options = EmbedOptions {
                normalize: config.embed.normalize && !raw,
                ..config.embed.options()
            };
            let (Some(text1), Some(text2)) = (text1, text2) else {
                return Err(semsim::EmbedError::InvalidInput("two texts are required".into()).into());
            };

            let provider = embed::from_config(&config.embed)?;
            let result = similarity::compare(provider.as_ref(), &text1, &text2, &options)
                .with_context(|| format!("comparing with {} backend", provider.backend()))?;

            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                if cli.verbose {
                    println!("input1: {text1}");
                    println!("input2: {text2}");
                }
                println!("{}", result.score);
            }
        }
    }
    Ok(())
}

/// Non-empty lines from stdin, read lazily.
fn stdin_lines() -> impl Iterator<Item = String> {
    std::io::stdin()
        .lock()
        .lines()
        .map_while(|l| l.ok())
        .filter(|l| !l.trim().is_empty())
}
