//! relfs command-line front end.
//!
//! Drives the same operations a kernel adapter would, one per invocation.
//!
//! Usage:
//!   # List schemas of a database with another one attached
//!   relfs-server --database app.db --attach audit=audit.db ls /
//!
//!   # Read and replace one cell
//!   relfs-server --database app.db cat /main/users/7/email
//!   echo -n "ada@example.com" | relfs-server --database app.db write /main/users/7/email
//!
//!   # Settings from a file, overridden by flags
//!   relfs-server --config relfs.toml tree /main --depth 2

mod commands;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{EnvFilter, fmt};

use relfs_kernel::{Attachment, Config, RelationalFs, WriteMode};

/// Browse and edit a SQLite database as a directory tree.
#[derive(Parser, Debug)]
#[command(name = "relfs-server")]
#[command(about = "Relational database presented as a filesystem")]
struct Args {
    /// TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Main database file (overrides config)
    #[arg(short, long)]
    database: Option<PathBuf>,

    /// Attach another database as a schema, as name=path (repeatable)
    #[arg(long = "attach", value_name = "NAME=PATH")]
    attach: Vec<Attachment>,

    /// Commit writes as replacements of the stored value at their offsets
    #[arg(long)]
    positional: bool,

    /// Reject writes
    #[arg(long)]
    read_only: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List a directory
    Ls {
        #[arg(default_value = "/")]
        path: PathBuf,
    },
    /// Show attributes of a node
    Stat { path: PathBuf },
    /// Print a field's content
    Cat { path: PathBuf },
    /// Replace a field's content and commit it
    Write {
        path: PathBuf,
        /// New content; read from stdin when omitted
        value: Option<String>,
    },
    /// Print the tree below a directory
    Tree {
        #[arg(default_value = "/")]
        path: PathBuf,
        /// Levels to descend
        #[arg(long, default_value_t = 2)]
        depth: usize,
    },
}

impl Args {
    fn config(&self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::load(path)
                .with_context(|| format!("loading config {}", path.display()))?,
            None => Config::default(),
        };

        if let Some(database) = &self.database {
            config.database.path = database.clone();
        }
        config.database.attach.extend(self.attach.iter().cloned());
        if self.positional {
            config.filesystem.write_mode = WriteMode::Positional;
        }
        if self.read_only {
            config.filesystem.read_only = true;
        }

        config.validate().context("invalid configuration")?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr; stdout carries command output
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = args.config()?;

    let fs = RelationalFs::open(&config).with_context(|| {
        format!("opening database {}", config.database.path.display())
    })?;
    tracing::info!(
        database = %config.database.path.display(),
        write_mode = ?config.filesystem.write_mode,
        "filesystem ready"
    );

    let mut out = std::io::stdout().lock();
    match args.command {
        Command::Ls { path } => commands::ls(&fs, &path, &mut out).await,
        Command::Stat { path } => commands::stat(&fs, &path, &mut out).await,
        Command::Cat { path } => commands::cat(&fs, &path, &mut out).await,
        Command::Write { path, value } => {
            let data = match value {
                Some(value) => value.into_bytes(),
                None => {
                    let mut buf = Vec::new();
                    std::io::Read::read_to_end(&mut std::io::stdin(), &mut buf)
                        .context("reading stdin")?;
                    buf
                }
            };
            commands::write(&fs, &path, &data).await
        }
        Command::Tree { path, depth } => commands::tree(&fs, &path, depth, &mut out).await,
    }
}
