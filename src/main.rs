//! `kestrel`: index workspaces and query them for prompt context.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use kestrel_core::config::{Config, LoggingConfig, resolve_config_path};
use kestrel_core::App;

#[derive(Parser)]
#[command(name = "kestrel", version, about = "Semantic code retrieval over local and remote indexes")]
struct Cli {
    /// Configuration file (TOML). Defaults to `KESTREL_CONFIG`, then the
    /// user config directory.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Print machine-readable JSON instead of text.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Index (or incrementally re-index) one or more directories.
    Index {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        /// Branch recorded in the tag. Defaults to `NONE`.
        #[arg(long)]
        branch: Option<String>,
    },
    /// Retrieve context snippets for a query.
    Query {
        query: String,
        /// Workspace directories searched as one codebase.
        #[arg(long = "workspace", conflicts_with_all = ["folder", "remote", "directory"])]
        workspaces: Vec<PathBuf>,
        /// A single indexed folder.
        #[arg(long, conflicts_with_all = ["remote", "directory"])]
        folder: Option<PathBuf>,
        /// Remote project: an id from `folders --remote` (`all` for every
        /// project) or a directory on the remote mirror.
        #[arg(long, conflicts_with = "directory")]
        remote: Option<PathBuf>,
        /// Any directory; corpora at or below it are searched.
        #[arg(long)]
        directory: Option<PathBuf>,
    },
    /// List selectable folders (local) or projects (remote).
    Folders {
        #[arg(long)]
        remote: bool,
    },
    /// List or drop stored corpora.
    Corpora {
        #[arg(long)]
        remote: bool,
        /// Corpus id to remove.
        #[arg(long)]
        drop: Option<String>,
    },
    /// Re-index directories whenever their files change.
    Watch {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        #[arg(long)]
        branch: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config_path = resolve_config_path(cli.config.as_deref());
    let config = Config::load(&config_path)?;
    init_subscriber(&config.logging);

    let app = App::build(config, config_path).await?;
    spawn_shutdown_on_ctrl_c(&app);

    let json = cli.json;
    match cli.command {
        Command::Index { paths, branch } => commands::index(&app, &paths, branch, json).await,
        Command::Query {
            query,
            workspaces,
            folder,
            remote,
            directory,
        } => {
            let kind = commands::provider_kind(&app, workspaces, folder, remote, directory)?;
            commands::query(&app, &query, &kind, json).await
        }
        Command::Folders { remote } => commands::folders(&app, remote, json).await,
        Command::Corpora { remote, drop } => commands::corpora(&app, remote, drop, json).await,
        Command::Watch { paths, branch } => commands::watch(&app, &paths, branch).await,
    }
}

fn spawn_shutdown_on_ctrl_c(app: &App) {
    let session = std::sync::Arc::clone(&app.session);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            session.shutdown();
        }
    });
}

fn init_subscriber(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level));

    let file = logging.file.as_deref().and_then(|path| {
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| eprintln!("cannot open log file {path}: {e}, logging to stderr"))
            .ok()
    });

    if let Some(file) = file {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_ansi(false)
            .with_writer(std::sync::Mutex::new(file))
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}
