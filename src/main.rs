// ABOUTME: Entry point for parley — a terminal chat client with bounded conversation memory.
// ABOUTME: Parses CLI args, loads config, and launches the app.

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt};

use parley::app::{App, load_schema_fields};
use parley::config::{BackendKind, Config};

#[derive(Parser)]
#[command(name = "parley")]
#[command(about = "Chat with a local vision model, keeping conversation memory within a budget")]
struct Args {
    /// Config file (default: ~/.parley/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Model to chat with
    #[arg(long, short = 'm')]
    model: Option<String>,

    /// Continue an existing conversation
    #[arg(long, short = 'c')]
    conversation: Option<String>,

    /// Wait for the whole reply instead of streaming it
    #[arg(long)]
    no_stream: bool,

    /// JSON file with extra structured-output fields
    #[arg(long)]
    schema: Option<PathBuf>,

    /// Where conversations are kept
    #[arg(long, value_enum)]
    backend: Option<BackendKind>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    // Logs go to stderr so they never interleave with streamed replies.
    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    config.apply_env();
    if let Some(model) = args.model {
        config.llm.model = model;
    }
    if args.no_stream {
        config.llm.stream = false;
    }
    if let Some(backend) = args.backend {
        config.session.backend = backend;
    }

    let schema_fields = args.schema.as_deref().map(load_schema_fields).transpose()?;

    App::new(&config, args.conversation, schema_fields)?.run().await
}
