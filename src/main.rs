use std::{sync::Arc, time::Duration};

use clap::Parser;
use docweave::{
    DataDir,
    Error,
    IndexManager,
    Result,
    config::FusionWeights,
    manager::{CleanupOutcome, IndexAction, IndexOutcome},
    remote_embedder::{RemoteEmbedder, RemoteEmbedderConfig},
    search::{self, HybridRetriever},
    vector_index::{FlatIndex, VectorIndex},
    watcher::{ReindexFlag, ReindexWatcher},
};
use tracing_subscriber::EnvFilter;

mod cli;

use cli::{Cli, Command};

fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if let Ok(env) = std::env::var("DOCWEAVE_LOG") {
        EnvFilter::new(env)
    } else if quiet {
        EnvFilter::new("warn")
    } else {
        match verbose {
            0 => EnvFilter::new("info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

fn open_manager(cli: &Cli, retention_days: Option<u32>) -> Result<IndexManager> {
    let data_dir = DataDir::resolve(cli.data_dir.as_deref())?;
    let embedder = RemoteEmbedder::new(RemoteEmbedderConfig {
        base_url: cli.embedder.embed_url.clone(),
        model: cli.embedder.embed_model.clone(),
        dimension: cli.embedder.embed_dimension,
        ..RemoteEmbedderConfig::default()
    })?;
    let mut config = cli.indexing.config();
    if let Some(days) = retention_days {
        config.retention_days = days;
    }
    IndexManager::open(data_dir, Arc::new(embedder), config)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    if let Command::Completions(args) = &cli.command {
        args.generate();
        return Ok(());
    }

    match &cli.command {
        Command::Index(args) => {
            let manager = open_manager(&cli, None)?;
            let outcome = manager.get_or_create_index(&args.directory, args.force)?;
            print_outcome(&args.directory, &outcome);
        }
        Command::Search(args) => {
            let manager = open_manager(&cli, None)?;
            cmd_search(&manager, args)?;
        }
        Command::Watch(args) => {
            let manager = open_manager(&cli, None)?;
            cmd_watch(&manager, args)?;
        }
        Command::Cleanup(args) => {
            let manager = open_manager(&cli, Some(args.retention_days))?;
            match manager.cleanup(args.force)? {
                CleanupOutcome::Skipped { last_cleanup } => {
                    println!(
                        "Cleanup already ran today ({}); use --force to run again.",
                        last_cleanup.format("%Y-%m-%d %H:%M UTC")
                    );
                }
                CleanupOutcome::Ran(report) => {
                    for dir in &report.removed_directories {
                        println!("Removed index for {}", dir.display());
                    }
                    for slot in &report.removed_orphans {
                        println!("Removed orphaned index {}", slot.display());
                    }
                    println!(
                        "{} index(es) removed.",
                        report.removed_directories.len() + report.removed_orphans.len()
                    );
                }
            }
        }
        Command::Clear => {
            let manager = open_manager(&cli, None)?;
            let count = manager.clear_all()?;
            println!("Cleared {count} index(es).");
        }
        Command::Status(args) => {
            let manager = open_manager(&cli, None)?;
            cmd_status(&manager, args.json)?;
        }
        Command::Completions(_) => {}
    }

    Ok(())
}

fn print_outcome(directory: &std::path::Path, outcome: &IndexOutcome<FlatIndex>) {
    let verb = match outcome.action {
        IndexAction::Rebuilt => "Rebuilt",
        IndexAction::Updated => "Updated",
        IndexAction::Reused => "Reused",
    };
    eprintln!(
        "{verb} index for {}: {} chunk(s), {} file(s) processed, {} removed",
        directory.display(),
        outcome.document_count,
        outcome.modified_files.len(),
        outcome.removed_files.len()
    );
}

fn cmd_search(manager: &IndexManager, args: &cli::SearchArgs) -> Result<()> {
    let retriever = HybridRetriever::new(
        manager.embedder(),
        FusionWeights::new(args.vector_weight, args.keyword_weight),
    )?;

    let outcome = manager.get_or_create_index(&args.directory, false)?;
    if outcome.action != IndexAction::Reused {
        print_outcome(&args.directory, &outcome);
    }

    let chunks = outcome.index.live_chunks();
    let results = retriever.retrieve(&args.query, &outcome.index, &chunks, args.count)?;

    if args.json {
        println!("{}", search::to_json(&results, &args.query)?);
    } else if args.context {
        println!("{}", search::format_context(&results));
    } else {
        search::format_human(&results);
    }
    Ok(())
}

fn cmd_watch(manager: &IndexManager, args: &cli::WatchArgs) -> Result<()> {
    if args.interval == 0 {
        return Err(Error::Config("--interval must be positive".into()));
    }

    let outcome = manager.get_or_create_index(&args.directory, false)?;
    print_outcome(&args.directory, &outcome);

    let flag = ReindexFlag::new();
    let watcher =
        ReindexWatcher::start(&args.directory, manager.filter().clone(), flag.clone())?;
    eprintln!(
        "Watching {} for changes (Ctrl-C to stop)",
        watcher.root().display()
    );

    loop {
        std::thread::sleep(Duration::from_secs(args.interval));
        match flag.run_if_set(|| manager.get_or_create_index(&args.directory, false)) {
            Some(Ok(outcome)) => print_outcome(&args.directory, &outcome),
            Some(Err(e)) => tracing::warn!("reindex failed, retrying next tick: {e}"),
            None => {}
        }
    }
}

fn cmd_status(manager: &IndexManager, json: bool) -> Result<()> {
    let statuses = manager.status();

    if json {
        println!("{}", serde_json::to_string(&statuses)?);
        return Ok(());
    }

    println!("Data directory: {}", manager.data_dir().root().display());
    println!("Directories: {}", statuses.len());
    for status in &statuses {
        let updated = status
            .last_update
            .map(|t| t.format("%Y-%m-%d %H:%M UTC").to_string())
            .unwrap_or_else(|| "never".to_string());
        let mut notes = Vec::new();
        if status.stale {
            notes.push("stale".to_string());
        }
        if !status.on_disk {
            notes.push("missing on disk".to_string());
        }
        if status.retired_count > 0 {
            notes.push(format!(
                "{} retired, `index --force` compacts",
                status.retired_count
            ));
        }
        let notes = if notes.is_empty() {
            String::new()
        } else {
            format!(" [{}]", notes.join(", "))
        };
        println!(
            "  {}: {} chunk(s) from {} file(s), updated {updated}{notes}",
            status.directory.display(),
            status.document_count,
            status.file_count,
        );
    }
    Ok(())
}
