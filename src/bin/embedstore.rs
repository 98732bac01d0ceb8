//! `embedstore` - command-line front end for a configured store.
//!
//! Every subcommand loads the YAML config named by `--config` (or
//! `EMBEDSTORE_CONFIG`), builds the store, runs, and flushes.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use embedstore::{Document, LazyEmbeddingStore, Metadata, SearchRequest, StoreConfig};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "embedstore")]
#[command(about = "Lazy document-embedding store")]
struct Cli {
    /// Store configuration (YAML)
    #[arg(short, long, env = "EMBEDSTORE_CONFIG")]
    config: PathBuf,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest documents from a JSON array or JSON-lines file
    Ingest {
        /// Input file; documents without an id get one derived from their content
        #[arg(short, long)]
        input: PathBuf,

        /// Exit non-zero if any document failed
        #[arg(long)]
        strict: bool,
    },

    /// Rank stored records against a raw query vector
    Search {
        /// Comma-separated vector, e.g. `1,0,0`
        #[arg(short, long, value_delimiter = ',', allow_hyphen_values = true)]
        vector: Vec<f32>,

        #[arg(short, default_value_t = 10)]
        k: usize,

        /// Drop hits scoring below this value
        #[arg(long)]
        threshold: Option<f32>,

        /// Metadata equality filter, `key=value` (repeatable)
        #[arg(long = "filter", value_parser = parse_filter)]
        filters: Vec<(String, serde_json::Value)>,
    },

    /// Embed query text with the configured provider, then search
    Query {
        text: String,

        #[arg(short, default_value_t = 10)]
        k: usize,
    },

    /// Write every stored record as a JSON snapshot
    Export {
        /// Output file; stdout when omitted
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Deserialize)]
struct InputDocument {
    #[serde(default)]
    id: Option<String>,
    content: String,
    #[serde(default)]
    metadata: Metadata,
}

impl From<InputDocument> for Document {
    fn from(input: InputDocument) -> Self {
        let mut doc = match input.id {
            Some(id) => Document::new(id, input.content),
            None => Document::from_content(input.content),
        };
        doc.metadata = input.metadata;
        doc
    }
}

/// Values that parse as JSON keep their type (`price=10` is a number);
/// anything else is a string.
fn parse_filter(raw: &str) -> Result<(String, serde_json::Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got `{raw}`"))?;
    let value = serde_json::from_str(value)
        .unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

fn read_documents(path: &Path) -> Result<Vec<Document>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let trimmed = raw.trim_start();
    let inputs: Vec<InputDocument> = if trimmed.starts_with('[') {
        serde_json::from_str(trimmed).context("invalid JSON array of documents")?
    } else {
        trimmed
            .lines()
            .filter(|line| !line.trim().is_empty())
            .enumerate()
            .map(|(n, line)| {
                serde_json::from_str(line).with_context(|| format!("invalid document on line {}", n + 1))
            })
            .collect::<Result<_>>()?
    };
    Ok(inputs.into_iter().map(Document::from).collect())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_env("EMBEDSTORE_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run_ingest(store: &LazyEmbeddingStore, input: &Path, strict: bool) -> Result<()> {
    let documents = read_documents(input)?;
    let report = store.add(documents).await?;
    store.flush()?;

    for failure in &report.failed {
        tracing::warn!(doc_id = %failure.id, error = %failure.error, "document_not_ingested");
    }
    println!(
        "{}",
        serde_json::json!({
            "added": report.added.len(),
            "skipped": report.skipped.len(),
            "failed": report.failed.len(),
        })
    );
    if strict {
        report.ensure_complete()?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    let config = StoreConfig::from_file(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    let store = config.build_store().await?;

    match cli.command {
        Commands::Ingest { input, strict } => run_ingest(&store, &input, strict).await?,
        Commands::Search {
            vector,
            k,
            threshold,
            filters,
        } => {
            if vector.is_empty() {
                bail!("--vector must not be empty");
            }
            let mut request = SearchRequest::new(vector, k);
            if let Some(threshold) = threshold {
                request = request.with_similarity_threshold(threshold);
            }
            for (key, value) in filters {
                request = request.with_filter(key, value);
            }
            let hits = store.search_with(&request)?;
            println!("{}", serde_json::to_string_pretty(&hits)?);
        }
        Commands::Query { text, k } => {
            let hits = store.similarity_search(&text, k).await?;
            println!("{}", serde_json::to_string_pretty(&hits)?);
        }
        Commands::Export { output } => {
            let snapshot = store.export()?;
            match output {
                Some(path) => {
                    snapshot.write_to(&path)?;
                    tracing::info!(path = %path.display(), entries = snapshot.len(), "export_written");
                }
                None => println!("{}", snapshot.to_json()?),
            }
        }
    }
    Ok(())
}
