//! `seamark` command line entry point.
//!
//! # Responsibility
//! - Open the configured database and dispatch one engine operation.
//! - Print results as JSON so runs can be scripted.

use clap::{Parser, Subcommand};
use log::info;
use serde::Serialize;
use seamark_core::db::Connection;
use seamark_core::{
    init_logging_from, open_db, AtonNode, BulkSynchronizer, ConfigError, DbError, EngineConfig,
    HierarchyService, LoggingError, MessageTag, NodeKey, SqliteRecordStore, SqliteTreeRepository,
    StoreError, StoredRecord, SyncError, SyncReport, Transmitter, TransmitterService,
    TransmitterServiceError, TreeError, TreeKind, TreeNode,
};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use std::process;

fn main() {
    let cli = Cli::parse();
    if let Err(error) = run(cli) {
        eprintln!("seamark: {error}");
        process::exit(1);
    }
}

#[derive(Debug, Parser)]
#[command(name = "seamark", about = "Maritime notice hierarchy and sync engine", version)]
struct Cli {
    /// JSON engine configuration
    #[arg(short, long, value_name = "path", global = true)]
    config: Option<PathBuf>,
    /// SQLite database file (overrides the configured path)
    #[arg(long, value_name = "path", global = true)]
    db: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Check that the core library is linked
    Ping,
    /// Synchronize a JSON array of records into the database
    Sync {
        /// area | category | aton | transmitter | message_tag
        kind: String,
        file: PathBuf,
    },
    /// Move a node under a new parent, or to the root level
    Move {
        #[arg(long, default_value = "area")]
        tree: String,
        node: String,
        #[arg(long)]
        parent: Option<String>,
    },
    /// Activate or deactivate a node and cascade the change
    Activate {
        #[arg(long, default_value = "area")]
        tree: String,
        node: String,
        #[arg(long)]
        off: bool,
    },
    /// List transmitters covering the given areas
    Transmitters {
        #[arg(long = "area", value_name = "key")]
        areas: Vec<String>,
        /// Include inactive transmitters
        #[arg(long)]
        all: bool,
    },
    /// Report tree invariant violations
    Check {
        #[arg(long, default_value = "area")]
        tree: String,
        /// Re-encode and persist every lineage
        #[arg(long)]
        repair: bool,
    },
}

fn run(cli: Cli) -> Result<(), CliError> {
    if let Command::Ping = cli.command {
        println!("seamark_core ping={}", seamark_core::ping());
        println!("seamark_core version={}", seamark_core::core_version());
        return Ok(());
    }

    let mut config = match cli.config.as_deref() {
        Some(path) => EngineConfig::from_json_file(path)?,
        None => EngineConfig::default(),
    };
    if let Some(db) = cli.db {
        config.db_path = db;
    }
    init_logging_from(&config)?;
    let conn = open_db(&config.db_path)?;

    match cli.command {
        Command::Ping => Ok(()),
        Command::Sync { kind, file } => {
            info!("event=cli_sync module=cli status=start kind={kind}");
            let raw = std::fs::read_to_string(&file)
                .map_err(|source| CliError::Io { path: file, source })?;
            let sync = BulkSynchronizer::new(config.sync);
            let report = match kind.as_str() {
                "aton" | "atons" => sync_records::<AtonNode>(&conn, &sync, &raw)?,
                "transmitter" | "transmitters" => sync_records::<Transmitter>(&conn, &sync, &raw)?,
                "message_tag" | "message_tags" => sync_records::<MessageTag>(&conn, &sync, &raw)?,
                other => {
                    let tree = parse_tree(other)?;
                    let candidates: Vec<TreeNode> = serde_json::from_str(&raw)?;
                    let mut service =
                        HierarchyService::load(SqliteTreeRepository::try_new(&conn, tree)?)?;
                    sync.synchronize(&mut service, candidates)
                        .map_err(CliError::TreeSync)?
                }
            };
            print_json(&report)
        }
        Command::Move { tree, node, parent } => {
            let mut service = load_tree(&conn, &tree)?;
            let parent = parent.as_deref().map(NodeKey::parse).transpose().map_err(TreeError::from)?;
            let relined = service.move_node(&NodeKey::parse(&node).map_err(TreeError::from)?, parent)?;
            print_json(&relined)
        }
        Command::Activate { tree, node, off } => {
            let mut service = load_tree(&conn, &tree)?;
            let key = NodeKey::parse(&node).map_err(TreeError::from)?;
            let changed = service.set_active(&key, !off)?;
            print_json(&changed)
        }
        Command::Transmitters { areas, all } => {
            let areas = areas
                .iter()
                .map(|area| NodeKey::parse(area))
                .collect::<Result<Vec<_>, _>>()
                .map_err(TreeError::from)?;
            let snapshot = load_tree(&conn, "area")?.snapshot();
            let service = TransmitterService::new(SqliteRecordStore::try_new(&conn)?);
            let transmitters = service.find_by_areas(&snapshot, &areas, !all)?;
            print_json(&transmitters)
        }
        Command::Check { tree, repair } => {
            let mut service = load_tree(&conn, &tree)?;
            if repair {
                let repaired = service.rebuild_lineages()?;
                println!("repaired {} lineage(s)", repaired.len());
            }
            let issues = service.check_consistency();
            for issue in &issues {
                println!("{issue:?}");
            }
            if issues.is_empty() {
                println!("ok");
            }
            Ok(())
        }
    }
}

fn sync_records<R: StoredRecord>(
    conn: &Connection,
    sync: &BulkSynchronizer,
    raw: &str,
) -> Result<SyncReport, CliError> {
    let candidates: Vec<R> = serde_json::from_str(raw)?;
    let mut store = SqliteRecordStore::<R>::try_new(conn)?;
    sync.synchronize(&mut store, candidates)
        .map_err(CliError::RecordSync)
}

fn parse_tree(value: &str) -> Result<TreeKind, CliError> {
    TreeKind::parse(value).ok_or_else(|| CliError::UnknownKind(value.to_string()))
}

fn load_tree<'conn>(
    conn: &'conn Connection,
    tree: &str,
) -> Result<HierarchyService<SqliteTreeRepository<'conn>>, CliError> {
    let repo = SqliteTreeRepository::try_new(conn, parse_tree(tree)?)?;
    Ok(HierarchyService::load(repo)?)
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<(), CliError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[derive(Debug)]
enum CliError {
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Json(serde_json::Error),
    UnknownKind(String),
    Config(ConfigError),
    Logging(LoggingError),
    Db(DbError),
    Store(StoreError),
    Tree(TreeError),
    Transmitters(TransmitterServiceError),
    RecordSync(SyncError<StoreError>),
    TreeSync(SyncError<TreeError>),
}

impl Display for CliError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, source } => write!(f, "failed to read {}: {source}", path.display()),
            Self::Json(err) => write!(f, "invalid JSON input: {err}"),
            Self::UnknownKind(kind) => write!(
                f,
                "unknown record kind `{kind}`; expected area|category|aton|transmitter|message_tag"
            ),
            Self::Config(err) => write!(f, "{err}"),
            Self::Logging(err) => write!(f, "{err}"),
            Self::Db(err) => write!(f, "{err}"),
            Self::Store(err) => write!(f, "{err}"),
            Self::Tree(err) => write!(f, "{err}"),
            Self::Transmitters(err) => write!(f, "{err}"),
            Self::RecordSync(err) => write!(f, "{err}"),
            Self::TreeSync(err) => write!(f, "{err}"),
        }
    }
}

impl Error for CliError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Json(err) => Some(err),
            Self::UnknownKind(_) => None,
            Self::Config(err) => Some(err),
            Self::Logging(err) => Some(err),
            Self::Db(err) => Some(err),
            Self::Store(err) => Some(err),
            Self::Tree(err) => Some(err),
            Self::Transmitters(err) => Some(err),
            Self::RecordSync(err) => Some(err),
            Self::TreeSync(err) => Some(err),
        }
    }
}

impl From<serde_json::Error> for CliError {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value)
    }
}

impl From<ConfigError> for CliError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value)
    }
}

impl From<LoggingError> for CliError {
    fn from(value: LoggingError) -> Self {
        Self::Logging(value)
    }
}

impl From<DbError> for CliError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<StoreError> for CliError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

impl From<TreeError> for CliError {
    fn from(value: TreeError) -> Self {
        Self::Tree(value)
    }
}

impl From<TransmitterServiceError> for CliError {
    fn from(value: TransmitterServiceError) -> Self {
        Self::Transmitters(value)
    }
}
