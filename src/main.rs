//! iavl CLI - Command line interface for iavl_db
//!
//! Every invocation opens the database file, runs one command, and exits.
//! Mutating commands commit a new version unless `--no-auto-commit` is given,
//! in which case the change only lives for that one process and is discarded.

use anyhow::Context;
use clap::{Parser, Subcommand};
use iavl_db::{DiffEntry, FileStore, KvStore, MutableTree, TreeConfig};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "iavl")]
#[command(about = "A versioned, Merkle-hashed key/value tree")]
#[command(version)]
struct Cli {
    /// Path to the database file
    #[arg(short, long, default_value = "tree.iavl")]
    database: PathBuf,

    /// Output format (json or text)
    #[arg(short, long, default_value = "json")]
    format: OutputFormat,

    /// Path to a JSON config file (defaults to the user config dir)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Disable auto-commit. Each invocation is its own process, so an
    /// uncommitted change is discarded when the command exits (dry run)
    #[arg(long)]
    no_auto_commit: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
enum OutputFormat {
    Json,
    Text,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new database
    Init,

    /// Set a key to a value
    Set { key: String, value: String },

    /// Get the value of a key
    Get {
        key: String,
        /// Read from a committed version instead of the latest
        #[arg(long)]
        version: Option<i64>,
    },

    /// Remove a key
    Remove { key: String },

    /// Commit a new version
    Commit,

    /// List committed versions
    Versions,

    /// Show a root hash
    Hash {
        #[arg(long)]
        version: Option<i64>,
    },

    /// List entries in key order
    Range {
        /// Inclusive lower bound
        #[arg(long)]
        start: Option<String>,
        /// Exclusive upper bound
        #[arg(long)]
        end: Option<String>,
        #[arg(long)]
        descending: bool,
        #[arg(short, long)]
        limit: Option<usize>,
        #[arg(long)]
        version: Option<i64>,
    },

    /// Delete old versions and the nodes only they reference
    Prune {
        /// Versions to keep, comma separated
        #[arg(long, value_delimiter = ',', conflicts_with = "keep_recent")]
        retain: Vec<i64>,
        /// Keep only the most recent N versions
        #[arg(long)]
        keep_recent: Option<usize>,
    },

    /// Show key changes between two versions
    Diff { from: i64, to: i64 },

    /// Rewrite the database file without superseded records
    Compact,

    /// Show database status
    Status,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => TreeConfig::load(path)?,
        None => TreeConfig::load_default()?,
    };

    match &cli.command {
        Commands::Init => {
            if cli.database.exists() {
                anyhow::bail!("Database already exists at {}", cli.database.display());
            }
            let store = FileStore::create(&cli.database)?;
            store.sync()?;
            output(
                cli.format,
                &serde_json::json!({
                    "status": "ok",
                    "message": format!("Created database at {}", cli.database.display())
                }),
            );
        }

        Commands::Set { key, value } => {
            let (_, mut tree) = open_tree(&cli.database, &config)?;
            let updated = tree.set(key.as_bytes(), value.as_bytes())?;
            let version = auto_commit(&mut tree, cli.no_auto_commit)?;
            output(
                cli.format,
                &serde_json::json!({
                    "status": write_status(version),
                    "key": key,
                    "updated": updated,
                    "version": version
                }),
            );
        }

        Commands::Get { key, version } => {
            let (_, tree) = open_tree(&cli.database, &config)?;
            let value = match version {
                Some(v) => tree.get_versioned(key.as_bytes(), *v)?,
                None => tree.get(key.as_bytes())?,
            };
            match value {
                Some(value) => output(
                    cli.format,
                    &serde_json::json!({
                        "key": key,
                        "value": String::from_utf8_lossy(&value)
                    }),
                ),
                None => {
                    output(
                        cli.format,
                        &serde_json::json!({
                            "status": "error",
                            "message": format!("Key not found: {}", key)
                        }),
                    );
                    std::process::exit(1);
                }
            }
        }

        Commands::Remove { key } => {
            let (_, mut tree) = open_tree(&cli.database, &config)?;
            let removed = tree.remove(key.as_bytes())?;
            let version = if removed.is_some() {
                auto_commit(&mut tree, cli.no_auto_commit)?
            } else {
                None
            };
            output(
                cli.format,
                &serde_json::json!({
                    "status": if removed.is_some() { write_status(version) } else { "ok" },
                    "key": key,
                    "removed": removed.is_some(),
                    "version": version
                }),
            );
        }

        Commands::Commit => {
            let (_, mut tree) = open_tree(&cli.database, &config)?;
            let (version, hash) = tree.commit()?;
            output(
                cli.format,
                &serde_json::json!({
                    "status": "ok",
                    "version": version,
                    "hash": hash.to_hex()
                }),
            );
        }

        Commands::Versions => {
            let (_, tree) = open_tree(&cli.database, &config)?;
            let items = tree
                .available_versions()
                .into_iter()
                .map(|v| -> iavl_db::Result<serde_json::Value> {
                    Ok(serde_json::json!({
                        "version": v,
                        "hash": tree.root_hash_at(v)?.to_hex(),
                        "size": tree.get_immutable(v)?.size()
                    }))
                })
                .collect::<iavl_db::Result<Vec<_>>>()?;
            output(
                cli.format,
                &serde_json::json!({
                    "count": items.len(),
                    "versions": items
                }),
            );
        }

        Commands::Hash { version } => {
            let (_, tree) = open_tree(&cli.database, &config)?;
            let version = version.unwrap_or_else(|| tree.version());
            let hash = if tree.version_exists(version) {
                tree.root_hash_at(version)?
            } else if version == 0 {
                iavl_db::Hash::empty()
            } else {
                anyhow::bail!("Version not found: {}", version);
            };
            output(
                cli.format,
                &serde_json::json!({
                    "version": version,
                    "hash": hash.to_hex()
                }),
            );
        }

        Commands::Range {
            start,
            end,
            descending,
            limit,
            version,
        } => {
            let (_, tree) = open_tree(&cli.database, &config)?;
            let view = match version {
                Some(v) => tree.get_immutable(*v)?,
                None => tree.last_saved().clone(),
            };
            let range = view.range(
                start.as_deref().map(str::as_bytes),
                end.as_deref().map(str::as_bytes),
                !descending,
            );
            let mut items = Vec::new();
            for entry in range.take(limit.unwrap_or(usize::MAX)) {
                let (key, value) = entry?;
                items.push(serde_json::json!({
                    "key": String::from_utf8_lossy(&key),
                    "value": String::from_utf8_lossy(&value)
                }));
            }
            output(
                cli.format,
                &serde_json::json!({
                    "version": view.version(),
                    "count": items.len(),
                    "entries": items
                }),
            );
        }

        Commands::Prune {
            retain,
            keep_recent,
        } => {
            let (_, mut tree) = open_tree(&cli.database, &config)?;
            let retain: BTreeSet<i64> = match keep_recent {
                Some(n) => tree.available_versions().into_iter().rev().take(*n).collect(),
                None => retain.iter().copied().collect(),
            };
            let deleted = tree.prune(&retain)?;
            output(
                cli.format,
                &serde_json::json!({
                    "status": "ok",
                    "deleted_nodes": deleted,
                    "versions": tree.available_versions()
                }),
            );
        }

        Commands::Diff { from, to } => {
            let (_, tree) = open_tree(&cli.database, &config)?;
            let diff = tree.diff(*from, *to)?;
            let entries: Vec<_> = diff
                .entries
                .iter()
                .map(|entry| match entry {
                    DiffEntry::Added { key, value } => serde_json::json!({
                        "type": "added",
                        "key": String::from_utf8_lossy(key),
                        "value": String::from_utf8_lossy(value)
                    }),
                    DiffEntry::Removed { key, value } => serde_json::json!({
                        "type": "removed",
                        "key": String::from_utf8_lossy(key),
                        "value": String::from_utf8_lossy(value)
                    }),
                    DiffEntry::Modified {
                        key,
                        old_value,
                        new_value,
                    } => serde_json::json!({
                        "type": "modified",
                        "key": String::from_utf8_lossy(key),
                        "old_value": String::from_utf8_lossy(old_value),
                        "new_value": String::from_utf8_lossy(new_value)
                    }),
                })
                .collect();
            output(
                cli.format,
                &serde_json::json!({
                    "from": diff.from,
                    "to": diff.to,
                    "added": diff.added_count(),
                    "removed": diff.removed_count(),
                    "modified": diff.modified_count(),
                    "entries": entries
                }),
            );
        }

        Commands::Compact => {
            let (store, _) = open_tree(&cli.database, &config)?;
            store.compact()?;
            output(
                cli.format,
                &serde_json::json!({
                    "status": "ok",
                    "entries": store.len()
                }),
            );
        }

        Commands::Status => {
            let (store, tree) = open_tree(&cli.database, &config)?;
            output(
                cli.format,
                &serde_json::json!({
                    "database": cli.database.display().to_string(),
                    "version": tree.version(),
                    "versions": tree.available_versions().len(),
                    "size": tree.size(),
                    "height": tree.height(),
                    "hash": tree.root_hash().to_hex(),
                    "entries": store.len()
                }),
            );
        }
    }

    Ok(())
}

fn open_tree(path: &Path, config: &TreeConfig) -> anyhow::Result<(Arc<FileStore>, MutableTree)> {
    // the tree syncs once per commit, so per-batch fsync would be redundant
    let store = Arc::new(
        FileStore::open_or_create(path)
            .with_context(|| format!("opening {}", path.display()))?
            .with_sync(false),
    );
    let tree = MutableTree::open(store.clone(), config.clone())?;
    Ok((store, tree))
}

/// Commit unless disabled, returning the new version
fn auto_commit(tree: &mut MutableTree, disabled: bool) -> anyhow::Result<Option<i64>> {
    if disabled {
        return Ok(None);
    }
    let (version, _) = tree.commit()?;
    Ok(Some(version))
}

/// "discarded" when a change was made but not committed
fn write_status(version: Option<i64>) -> &'static str {
    match version {
        Some(_) => "ok",
        None => "discarded",
    }
}

fn output(format: OutputFormat, value: &serde_json::Value) {
    let rendered = match format {
        OutputFormat::Json => serde_json::to_string(value),
        OutputFormat::Text => serde_json::to_string_pretty(value),
    };
    match rendered {
        Ok(text) => println!("{}", text),
        Err(e) => eprintln!("failed to render output: {}", e),
    }
}
