use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::Parser;
use homedir::my_home;

mod cli;
mod config;
mod lock;
mod semantic;
#[cfg(test)]
mod tests;

use cli::Command;
use config::Config;
use lock::FileLock;
use semantic::SemanticSearchService;

/// `SEMDEX_BASE_PATH`, or `~/.local/share/semdex`.
fn base_path() -> anyhow::Result<PathBuf> {
    if let Ok(path) = std::env::var("SEMDEX_BASE_PATH") {
        return Ok(PathBuf::from(path));
    }

    let Some(home) = my_home().context("Could not determine home directory")? else {
        bail!("Home directory path is empty, set SEMDEX_BASE_PATH");
    };
    Ok(home.join(".local/share/semdex"))
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = cli::Args::parse();

    let base_path = base_path()?;
    std::fs::create_dir_all(&base_path)
        .with_context(|| format!("Failed to create base directory {}", base_path.display()))?;

    let config = Config::load_with(&base_path).context("Failed to load config")?;

    let _lock = if args.command.mutates() {
        Some(FileLock::acquire(&base_path, args.wait).context("Failed to lock index")?)
    } else {
        None
    };

    let service = SemanticSearchService::open(config, &base_path)
        .context("Failed to open index")?
        .with_progress(!args.no_progress);

    if args.command.needs_model() {
        service
            .initialize()
            .context("Failed to load embedding model")?;
    }

    let result = match args.command {
        Command::Index {
            dir,
            no_recursive,
            ext,
        } => {
            let report = match ext {
                Some(ext) => service.index_directory_with(&dir, !no_recursive, &ext),
                None => service.index_directory(&dir, !no_recursive),
            }
            .with_context(|| format!("Failed to index {}", dir.display()))?;
            print_json(&report)
        }

        Command::Search {
            query,
            limit,
            min_similarity,
        } => {
            if let Some(min) = min_similarity {
                if !(-1.0..=1.0).contains(&min) {
                    bail!("--min-similarity must be between -1.0 and 1.0, got {min}");
                }
            }
            let results = service.search(&query, limit, min_similarity)?;
            print_json(&results)
        }

        Command::Similar { path, limit } => {
            let results = service.similar_files(&path, limit)?;
            print_json(&results)
        }

        Command::Stats => print_json(&service.stats()?),

        Command::Remove { path } => {
            let removed = service.remove(&path)?;
            print_json(&serde_json::json!({
                "path": path,
                "removed": removed,
            }))
        }
    };

    service.shutdown();
    result
}
