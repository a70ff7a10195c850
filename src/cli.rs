use std::path::PathBuf;

use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use docweave::{
    config::IndexerConfig,
    remote_embedder::{DEFAULT_EMBED_DIMENSION, DEFAULT_EMBED_MODEL, DEFAULT_EMBED_URL},
};

#[derive(Debug, Parser)]
#[command(
    name = "docweave",
    about = "Persistent hybrid search over a directory of documents"
)]
pub struct Cli {
    /// Override the XDG data directory
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    #[command(flatten)]
    pub embedder: EmbedderArgs,

    #[command(flatten)]
    pub indexing: IndexingArgs,

    /// Increase log verbosity (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Build or incrementally update the index for a directory
    Index(IndexArgs),
    /// Hybrid (dense + keyword) search within a directory
    Search(SearchArgs),
    /// Watch a directory and reindex when its files change
    Watch(WatchArgs),
    /// Remove indexes not updated within the retention window
    Cleanup(CleanupArgs),
    /// Delete every index and forget every directory
    Clear,
    /// Show indexed directories
    Status(StatusArgs),
    /// Generate shell completions
    #[command(hide = true)]
    Completions(CompletionsArgs),
}

// -- Embedding provider --

#[derive(Debug, Clone, Args)]
pub struct EmbedderArgs {
    /// Base URL of an OpenAI-compatible embeddings API
    #[arg(long, global = true, env = "DOCWEAVE_EMBED_URL", default_value = DEFAULT_EMBED_URL)]
    pub embed_url: String,

    /// Embedding model name
    #[arg(long, global = true, env = "DOCWEAVE_EMBED_MODEL", default_value = DEFAULT_EMBED_MODEL)]
    pub embed_model: String,

    /// Dimension of the embedding model's vectors
    #[arg(long, global = true, default_value_t = DEFAULT_EMBED_DIMENSION)]
    pub embed_dimension: usize,
}

// -- Indexing --

/// Chunking settings. Chunk size and overlap are part of the configuration
/// fingerprint, so changing them rebuilds every index.
#[derive(Debug, Clone, Args)]
pub struct IndexingArgs {
    /// Maximum chunk size in characters
    #[arg(
        long,
        global = true,
        env = "DOCWEAVE_CHUNK_SIZE",
        default_value_t = IndexerConfig::default().chunk_size
    )]
    pub chunk_size: usize,

    /// Overlap between adjacent chunks in characters
    #[arg(
        long,
        global = true,
        env = "DOCWEAVE_CHUNK_OVERLAP",
        default_value_t = IndexerConfig::default().chunk_overlap
    )]
    pub chunk_overlap: usize,

    /// Extra glob pattern to skip (can be repeated)
    #[arg(long = "ignore", global = true)]
    pub ignore: Vec<String>,
}

impl IndexingArgs {
    pub fn config(&self) -> IndexerConfig {
        IndexerConfig {
            chunk_size: self.chunk_size,
            chunk_overlap: self.chunk_overlap,
            extra_ignore: self.ignore.clone(),
            ..IndexerConfig::default()
        }
    }
}

#[derive(Debug, Parser)]
pub struct IndexArgs {
    /// Directory to index
    pub directory: PathBuf,

    /// Rebuild from scratch even if nothing changed
    #[arg(long)]
    pub force: bool,
}

// -- Search --

#[derive(Debug, Parser)]
pub struct SearchArgs {
    /// Directory to search (indexed first if needed)
    pub directory: PathBuf,

    /// The search query
    pub query: String,

    /// Number of results to return
    #[arg(short = 'k', long, default_value = "5")]
    pub count: usize,

    /// Weight of the dense (semantic) ranking
    #[arg(long, default_value = "0.7")]
    pub vector_weight: f32,

    /// Weight of the keyword ranking
    #[arg(long, default_value = "0.3")]
    pub keyword_weight: f32,

    /// Output results as JSON
    #[arg(long)]
    pub json: bool,

    /// Print results as prompt context blocks
    #[arg(long, conflicts_with = "json")]
    pub context: bool,
}

// -- Watch --

#[derive(Debug, Parser)]
pub struct WatchArgs {
    /// Directory to watch
    pub directory: PathBuf,

    /// Seconds between checks for pending changes
    #[arg(long, default_value = "2")]
    pub interval: u64,
}

// -- Cleanup --

#[derive(Debug, Parser)]
pub struct CleanupArgs {
    /// Run even if cleanup already ran today
    #[arg(long)]
    pub force: bool,

    /// Remove indexes not updated for this many days
    #[arg(long, default_value_t = IndexerConfig::default().retention_days)]
    pub retention_days: u32,
}

// -- Status --

#[derive(Debug, Parser)]
pub struct StatusArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Completions --

#[derive(Debug, Parser)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: Shell,
}

impl CompletionsArgs {
    /// Generate shell completions and print to stdout.
    pub fn generate(&self) {
        let mut cmd = Cli::command();
        clap_complete::generate(
            self.shell,
            &mut cmd,
            "docweave",
            &mut std::io::stdout(),
        );
    }
}
