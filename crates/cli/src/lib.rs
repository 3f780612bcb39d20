use anyhow::{Context as AnyhowContext, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use snipdex_vector_store::{EmbeddingModel, SnippetStore};
use std::io::{self, Write};
use std::path::PathBuf;

/// The corpus and query the tool ships with; `snipdex demo` runs the whole
/// pipeline over them end to end.
const DEMO_SNIPPETS: [&str; 3] = [
    "func changeNavigationBarColor(to color: UIColor) { UINavigationBar.appearance().barTintColor = color }",
    "let jsonString = try JSONEncoder().encode(object)",
    "print('Hello, World!')",
];
const DEMO_QUERY: &str = "A function to change the navigation bar color";
const DEMO_K: usize = 3;

fn print_stdout(text: &str) -> Result<()> {
    let mut stdout = io::stdout().lock();
    if let Err(err) = stdout
        .write_all(text.as_bytes())
        .and_then(|_| stdout.write_all(b"\n"))
        .and_then(|_| stdout.flush())
    {
        if err.kind() == io::ErrorKind::BrokenPipe {
            return Ok(());
        }
        return Err(err.into());
    }
    Ok(())
}

#[derive(Parser)]
#[command(name = "snipdex")]
#[command(about = "Embed text snippets and search them by meaning", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Quiet mode: log only warnings/errors
    #[arg(long, global = true)]
    quiet: bool,

    /// Override embedding backend in this process
    #[arg(long, global = true, value_enum)]
    embed_mode: Option<EmbedMode>,

    /// Override embedding model id
    #[arg(long, global = true)]
    embed_model: Option<String>,

    /// Model asset directory (overrides SNIPDEX_MODEL_DIR)
    #[arg(long, global = true)]
    model_dir: Option<PathBuf>,

    /// Directory holding the persisted artifacts
    #[arg(long, global = true, default_value = ".snipdex")]
    data_dir: PathBuf,
}

#[derive(Copy, Clone, ValueEnum)]
enum EmbedMode {
    Fast,
    Stub,
}

impl EmbedMode {
    const fn as_str(self) -> &'static str {
        match self {
            EmbedMode::Fast => "fast",
            EmbedMode::Stub => "stub",
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run the built-in pipeline: embed, persist, reload, query, print
    Demo,

    /// Embed snippets from a file (one per line) and persist the artifacts
    Index(IndexArgs),

    /// Search previously indexed snippets
    Query(QueryArgs),
}

#[derive(Args)]
struct IndexArgs {
    /// File with one snippet per non-empty line
    #[arg(long)]
    input: PathBuf,
}

#[derive(Args)]
struct QueryArgs {
    /// Query text
    text: String,

    /// Number of results to return
    #[arg(short, default_value_t = 3)]
    k: usize,
}

fn init_logging(verbose: bool, quiet: bool) {
    let level = if quiet {
        "warn"
    } else if verbose {
        "debug"
    } else {
        "info"
    };
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp(None)
        .try_init();
}

fn apply_env_overrides(cli: &Cli) {
    if let Some(mode) = cli.embed_mode {
        log::debug!("Embedding mode override: {}", mode.as_str());
        std::env::set_var("SNIPDEX_EMBEDDING_MODE", mode.as_str());
    }
    if let Some(model) = &cli.embed_model {
        std::env::set_var("SNIPDEX_EMBEDDING_MODEL", model);
    }
    if let Some(dir) = &cli.model_dir {
        std::env::set_var("SNIPDEX_MODEL_DIR", dir);
    }
}

pub async fn main_entry() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);
    apply_env_overrides(&cli);

    match &cli.command {
        Commands::Demo => run_demo(&cli.data_dir).await,
        Commands::Index(args) => run_index(&cli.data_dir, args).await,
        Commands::Query(args) => run_query(&cli.data_dir, args).await,
    }
}

/// The full pipeline over the built-in corpus. The store is dropped after
/// saving and everything is reloaded from disk before the query runs, so the
/// search exercises the persisted artifacts, not in-memory state.
async fn run_demo(data_dir: &PathBuf) -> Result<()> {
    print_stdout(&format!("Embedding {} snippets", DEMO_SNIPPETS.len()))?;

    let mut store = SnippetStore::from_env().context("Failed to initialize embedding model")?;
    store
        .add_snippets(DEMO_SNIPPETS.iter().map(ToString::to_string).collect())
        .await
        .context("Failed to embed snippets")?;

    store
        .save(data_dir)
        .await
        .with_context(|| format!("Failed to save artifacts to {}", data_dir.display()))?;
    print_stdout(&format!(
        "Saved snippets, embeddings, and index to {}",
        data_dir.display()
    ))?;
    drop(store);

    print_stdout(&format!("Reloading artifacts from {}", data_dir.display()))?;
    let store = SnippetStore::load(data_dir, EmbeddingModel::from_env()?)
        .await
        .with_context(|| format!("Failed to load artifacts from {}", data_dir.display()))?;

    let results = store.search(DEMO_QUERY, DEMO_K).await?;
    print_results(DEMO_QUERY, &results)
}

async fn run_index(data_dir: &PathBuf, args: &IndexArgs) -> Result<()> {
    let raw = tokio::fs::read_to_string(&args.input)
        .await
        .with_context(|| format!("Failed to read {}", args.input.display()))?;
    let snippets: Vec<String> = raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(ToString::to_string)
        .collect();
    if snippets.is_empty() {
        anyhow::bail!("No snippets found in {}", args.input.display());
    }

    let mut store = SnippetStore::from_env().context("Failed to initialize embedding model")?;
    let count = snippets.len();
    store.add_snippets(snippets).await?;
    store
        .save(data_dir)
        .await
        .with_context(|| format!("Failed to save artifacts to {}", data_dir.display()))?;

    print_stdout(&format!(
        "Indexed {count} snippets into {}",
        data_dir.display()
    ))
}

async fn run_query(data_dir: &PathBuf, args: &QueryArgs) -> Result<()> {
    let store = SnippetStore::load(data_dir, EmbeddingModel::from_env()?)
        .await
        .with_context(|| {
            format!(
                "Failed to load artifacts from {} (run `snipdex index` first)",
                data_dir.display()
            )
        })?;

    let results = store.search(&args.text, args.k).await?;
    print_results(&args.text, &results)
}

fn print_results(query: &str, results: &[snipdex_vector_store::RankedSnippet]) -> Result<()> {
    print_stdout(&format!("Query: {query}"))?;
    print_stdout("")?;
    print_stdout("Top results:")?;
    for (rank, hit) in results.iter().enumerate() {
        print_stdout(&format!("{}. {}", rank + 1, hit.snippet))?;
        print_stdout(&format!(
            "   similarity: {:.4} (distance {:.4})",
            hit.similarity(),
            hit.distance
        ))?;
    }
    Ok(())
}
