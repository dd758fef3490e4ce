//! Sherlock CLI Entry Point
//!
//! Database commands go through the daemon when one is running, and open
//! their own short-lived connection otherwise (or with `--no-daemon`).
//!
//! All output to stdout is one JSON envelope. Logs go to stderr.

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use serde_json::{json, Value};
use std::io::BufRead;
use std::path::PathBuf;
use std::process::{ExitCode, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use sherlock::config::DEFAULT_CONNECTION;
use sherlock::credentials::DEFAULT_KEYCHAIN_SERVICE;
use sherlock::daemon::daemon_pid;
use sherlock::{
    validate_cache_command, validate_query, AppContext, Daemon, ErrorEnvelope, ErrorInfo,
    ExecutedVia, LiveHandle, Metadata, SherlockError, SuccessEnvelope, ValidationResult,
};

/// Sherlock - read-only database exploration
#[derive(Parser)]
#[command(name = "sherlock")]
#[command(about = "Read-only database exploration with a connection-caching daemon")]
#[command(version)]
struct Cli {
    /// Path to the config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Connection name from the config file
    #[arg(short, long, global = true, default_value = DEFAULT_CONNECTION)]
    connection: String,

    /// Never route through the daemon
    #[arg(long, global = true)]
    no_daemon: bool,

    /// More log output on stderr (repeatable)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(flatten)]
    Gate(GateCommand),

    #[command(flatten)]
    Context(ContextCommand),
}

/// Checks that need neither a config directory nor a runtime
#[derive(Subcommand)]
enum GateCommand {
    /// Check a SQL statement against the read-only gate without running it
    Validate { sql: String },

    /// Check a cache-store command against the read-only gate
    ValidateCache {
        cmd: String,
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
}

/// Commands that run against the config directory, a daemon or a database
#[derive(Subcommand)]
enum ContextCommand {
    /// Run a read-only SQL statement
    Query { sql: String },

    /// List tables
    Tables,

    /// Describe one table's columns
    Describe { table: String },

    /// Describe every table
    Introspect,

    /// Check that a connection works
    Test {
        /// Overrides --connection
        name: Option<String>,
    },

    /// List configured connections
    Connections,

    /// Run a read-only command against a cache connection
    Exec {
        cmd: String,
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// Manage secrets in the OS keychain
    #[command(subcommand)]
    Keychain(KeychainCommand),

    /// Control the background daemon
    #[command(subcommand)]
    Daemon(DaemonCommand),
}

#[derive(Args)]
struct KeychainEntry {
    account: String,

    #[arg(long, default_value = DEFAULT_KEYCHAIN_SERVICE)]
    service: String,
}

#[derive(Subcommand)]
enum KeychainCommand {
    /// Store a secret read from the first line of stdin
    Set(KeychainEntry),

    /// Check for a stored secret
    Get {
        #[command(flatten)]
        entry: KeychainEntry,

        /// Include the secret in the output
        #[arg(long)]
        reveal: bool,
    },

    /// Delete a stored secret
    Delete(KeychainEntry),

    /// Show which configured connections have a keychain entry
    List,
}

#[derive(Subcommand)]
enum DaemonCommand {
    /// Start the daemon in the background
    Start {
        /// Run in this process instead of detaching
        #[arg(long)]
        foreground: bool,
    },

    /// Stop the running daemon
    Stop,

    /// Report whether the daemon is running
    Status,

    /// Re-read the config and re-resolve every credential
    Reload,
}

impl Commands {
    fn name(&self) -> &'static str {
        match self {
            Self::Gate(GateCommand::Validate { .. }) => "validate",
            Self::Gate(GateCommand::ValidateCache { .. }) => "validate-cache",
            Self::Context(command) => command.name(),
        }
    }

    const fn is_foreground_daemon(&self) -> bool {
        matches!(
            self,
            Self::Context(ContextCommand::Daemon(DaemonCommand::Start { foreground: true }))
        )
    }
}

impl ContextCommand {
    fn name(&self) -> &'static str {
        match self {
            Self::Query { .. } => "query",
            Self::Tables => "tables",
            Self::Describe { .. } => "describe",
            Self::Introspect => "introspect",
            Self::Test { .. } => "test",
            Self::Connections => "connections",
            Self::Exec { .. } => "exec",
            Self::Keychain(_) => "keychain",
            Self::Daemon(_) => "daemon",
        }
    }
}

impl Cli {
    fn log_level(&self) -> &'static str {
        if self.quiet {
            return "error";
        }
        match (self.verbose, &self.command) {
            (0, command) if command.is_foreground_daemon() => "info",
            (0, _) => "warn",
            (1, _) => "info",
            (2, _) => "debug",
            _ => "trace",
        }
    }
}

fn setup_logging(level: &str) {
    // RUST_LOG wins over the flags
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .with(filter)
        .init();
}

/// Successful command output before it is wrapped
#[derive(Debug)]
struct Output {
    data: Value,
    via: Option<ExecutedVia>,
    rows: Option<usize>,
}

impl Output {
    fn local(data: impl Serialize) -> anyhow::Result<Self> {
        Ok(Self { data: serde_json::to_value(data)?, via: None, rows: None })
    }

    fn via(data: impl Serialize, via: ExecutedVia) -> anyhow::Result<Self> {
        Ok(Self { data: serde_json::to_value(data)?, via: Some(via), rows: None })
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    setup_logging(cli.log_level());

    let command = cli.command.name();
    let started = Instant::now();

    let result = run(cli);
    let elapsed = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

    let (rendered, code) = match result {
        Ok(output) => {
            let meta = match output.rows {
                Some(rows) => Metadata::with_rows(elapsed, rows),
                None => Metadata::new(elapsed),
            };
            let mut envelope = SuccessEnvelope::new(command, output.data, meta);
            envelope.via = output.via;
            (serde_json::to_string(&envelope), ExitCode::SUCCESS)
        }
        Err(err) => {
            let envelope = match err.downcast_ref::<SherlockError>() {
                Some(e) => ErrorEnvelope::from_error(command, e),
                None => {
                    let info = ErrorInfo::new("INTERNAL_ERROR", format!("{err:#}"));
                    ErrorEnvelope::new(command, info)
                }
            };
            (serde_json::to_string(&envelope), ExitCode::FAILURE)
        }
    };

    match rendered {
        Ok(json) => {
            println!("{json}");
            code
        }
        Err(e) => {
            eprintln!("failed to render output: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<Output> {
    let Cli { config, connection, no_daemon, command, .. } = cli;
    match command {
        Commands::Gate(GateCommand::Validate { sql }) => accepted(validate_query(&sql)),
        Commands::Gate(GateCommand::ValidateCache { cmd, args }) => {
            accepted(validate_cache_command(&cmd, &args))
        }
        Commands::Context(command) => {
            // loads .env into the environment; no other thread may exist yet
            let ctx = AppContext::from_process(config.clone())?;

            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .context("Failed to start the async runtime")?;
            runtime.block_on(async move {
                let use_daemon = !no_daemon && ctx.daemon_running();
                debug!(use_daemon, "execution route");
                run_with_context(&ctx, command, connection, use_daemon, config).await
            })
        }
    }
}

async fn run_with_context(
    ctx: &AppContext,
    command: ContextCommand,
    connection: String,
    use_daemon: bool,
    config: Option<PathBuf>,
) -> anyhow::Result<Output> {
    match command {
        ContextCommand::Query { sql } => query(ctx, &connection, &sql, use_daemon).await,
        ContextCommand::Tables => {
            if use_daemon {
                let tables = ctx.daemon_client().tables(&connection).await?;
                return Output::via(json!({ "tables": tables }), ExecutedVia::Daemon);
            }
            let handle = open_direct(ctx, &connection).await?;
            let tables = handle.list_tables().await;
            handle.close().await;
            Output::via(json!({ "tables": tables? }), ExecutedVia::Direct)
        }
        ContextCommand::Describe { table } => {
            if use_daemon {
                let description = ctx.daemon_client().describe(&connection, &table).await?;
                return Output::via(description, ExecutedVia::Daemon);
            }
            let handle = open_direct(ctx, &connection).await?;
            let description = handle.describe_table(&table).await;
            handle.close().await;
            Output::via(description?, ExecutedVia::Direct)
        }
        ContextCommand::Introspect => {
            if use_daemon {
                let schema = ctx.daemon_client().introspect(&connection).await?;
                return Output::via(schema, ExecutedVia::Daemon);
            }
            let handle = open_direct(ctx, &connection).await?;
            let schema = handle.introspect_schema().await;
            handle.close().await;
            Output::via(schema?, ExecutedVia::Direct)
        }
        ContextCommand::Test { name } => {
            let name = name.unwrap_or(connection);
            if use_daemon {
                return Output::via(ctx.daemon_client().test(&name).await?, ExecutedVia::Daemon);
            }
            let handle = open_direct(ctx, &name).await?;
            let tested = handle.test().await;
            handle.close().await;
            tested?;
            Output::via(
                json!({ "connection": name, "type": handle.kind().as_str(), "status": "ok" }),
                ExecutedVia::Direct,
            )
        }
        ContextCommand::Connections => {
            if use_daemon {
                return Output::via(
                    json!({ "connections": ctx.daemon_client().list_connections().await? }),
                    ExecutedVia::Daemon,
                );
            }
            let (_, config) = ctx.load_config()?;
            Output::via(json!({ "connections": config.connection_names() }), ExecutedVia::Direct)
        }
        ContextCommand::Exec { cmd, args } => {
            exec(ctx, &connection, &cmd, &args, use_daemon).await
        }
        ContextCommand::Keychain(command) => keychain(ctx, command),
        ContextCommand::Daemon(command) => daemon(ctx, command, config).await,
    }
}

fn accepted(result: ValidationResult) -> anyhow::Result<Output> {
    result.into_result()?;
    Output::local(json!({ "valid": true }))
}

async fn query(
    ctx: &AppContext,
    connection: &str,
    sql: &str,
    use_daemon: bool,
) -> anyhow::Result<Output> {
    // The daemon re-validates; checking here gives the same answer without a round trip
    validate_query(sql).into_result()?;

    let (result, via) = if use_daemon {
        (ctx.daemon_client().query(connection, sql).await?, ExecutedVia::Daemon)
    } else {
        let handle = open_direct(ctx, connection).await?;
        let result = handle.execute(sql).await;
        handle.close().await;
        (result?, ExecutedVia::Direct)
    };

    let rows = result.row_count;
    let mut output = Output::via(result, via)?;
    output.rows = Some(rows);
    Ok(output)
}

async fn exec(
    ctx: &AppContext,
    connection: &str,
    cmd: &str,
    args: &[String],
    use_daemon: bool,
) -> anyhow::Result<Output> {
    validate_cache_command(cmd, args).into_result()?;

    if use_daemon {
        let result = ctx.daemon_client().exec(connection, cmd, args).await?;
        return Output::via(json!({ "result": result }), ExecutedVia::Daemon);
    }
    let handle = open_direct(ctx, connection).await?;
    let result = handle.exec_command(cmd, args).await;
    handle.close().await;
    Output::via(json!({ "result": result? }), ExecutedVia::Direct)
}

async fn open_direct(ctx: &AppContext, connection: &str) -> anyhow::Result<LiveHandle> {
    let resolved = ctx.resolve(connection)?;
    debug!(connection, url = %resolved.redacted_url(), "opening direct connection");
    Ok(LiveHandle::open(&resolved).await?)
}

fn keychain(ctx: &AppContext, command: KeychainCommand) -> anyhow::Result<Output> {
    let keychain = ctx.keychain()?;
    match command {
        KeychainCommand::Set(entry) => {
            let mut secret = String::new();
            std::io::stdin()
                .lock()
                .read_line(&mut secret)
                .context("Failed to read secret from stdin")?;
            let secret = secret.trim_end_matches(['\r', '\n']);
            if secret.is_empty() {
                return Err(SherlockError::invalid_input("No password provided on stdin").into());
            }
            keychain.set(&entry.service, &entry.account, secret)?;
            Output::local(json!({
                "account": entry.account,
                "service": entry.service,
                "stored": true,
                "reference": { "$keychain": entry.account },
            }))
        }
        KeychainCommand::Get { entry, reveal } => {
            let secret = keychain.get(&entry.service, &entry.account)?.ok_or_else(|| {
                SherlockError::credential_unresolved(format!(
                    "No password found for account \"{}\"",
                    entry.account
                ))
            })?;
            let mut data =
                json!({ "account": entry.account, "service": entry.service, "found": true });
            if reveal {
                data["password"] = Value::String(secret);
            }
            Output::local(data)
        }
        KeychainCommand::Delete(entry) => {
            if !keychain.delete(&entry.service, &entry.account)? {
                return Err(SherlockError::credential_unresolved(format!(
                    "No password found for account \"{}\"",
                    entry.account
                ))
                .into());
            }
            Output::local(json!({
                "account": entry.account,
                "service": entry.service,
                "deleted": true,
            }))
        }
        KeychainCommand::List => {
            let (_, config) = ctx.load_config()?;
            let mut status = serde_json::Map::new();
            for name in config.connection_names() {
                let present = keychain.has(DEFAULT_KEYCHAIN_SERVICE, &name)?;
                status.insert(name, Value::Bool(present));
            }
            Output::local(json!({ "connections": status }))
        }
    }
}

fn not_running() -> SherlockError {
    SherlockError::daemon_unavailable("Daemon not running. Start it with `sherlock daemon start`")
}

async fn daemon(
    ctx: &AppContext,
    command: DaemonCommand,
    config: Option<PathBuf>,
) -> anyhow::Result<Output> {
    match command {
        DaemonCommand::Start { foreground: true } => {
            let (path, config) = ctx.load_config()?;
            let resolver = Arc::clone(&ctx.resolver);
            let daemon = Daemon::new(ctx.daemon_settings(), config, Some(path), resolver);
            daemon.run().await?;
            Output::local(json!({ "message": "Daemon stopped" }))
        }
        DaemonCommand::Start { foreground: false } => {
            if ctx.daemon_running() {
                let pid = daemon_pid(&ctx.paths)
                    .map_or_else(|| "unknown".to_string(), |p| p.to_string());
                return Err(SherlockError::already_running(format!("pid {pid}")).into());
            }
            spawn_detached(config)?;
            wait_for(|| ctx.daemon_running(), true).await?;
            let pid = ctx.daemon_client().ping().await?;
            info!(pid, "daemon started");
            Output::local(json!({ "pid": pid, "socket": ctx.paths.socket }))
        }
        DaemonCommand::Stop => {
            if !ctx.daemon_running() {
                return Err(not_running().into());
            }
            ctx.daemon_client().shutdown().await?;
            wait_for(|| ctx.daemon_running(), false).await?;
            Output::local(json!({ "message": "Daemon stopped" }))
        }
        DaemonCommand::Status => {
            let running = ctx.daemon_running();
            let pid = if running { daemon_pid(&ctx.paths) } else { None };
            Output::local(json!({ "running": running, "pid": pid, "socket": ctx.paths.socket }))
        }
        DaemonCommand::Reload => {
            if !ctx.daemon_running() {
                return Err(not_running().into());
            }
            let connections = ctx.daemon_client().reload().await?;
            Output::local(json!({ "message": "Credentials reloaded", "connections": connections }))
        }
    }
}

/// Re-exec this binary as a foreground daemon, detached from our stdio
fn spawn_detached(config: Option<PathBuf>) -> anyhow::Result<()> {
    let exe = std::env::current_exe().context("Failed to get current executable path")?;
    let mut command = std::process::Command::new(exe);
    command.args(["daemon", "start", "--foreground"]);
    if let Some(config) = config {
        command.arg("--config").arg(config);
    }
    command
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .context("Failed to spawn daemon process")?;
    Ok(())
}

/// Poll `check` with backoff until it returns `expected`
async fn wait_for(check: impl Fn() -> bool, expected: bool) -> anyhow::Result<()> {
    let mut delay = Duration::from_millis(50);
    for _ in 0..10 {
        if check() == expected {
            return Ok(());
        }
        tokio::time::sleep(delay).await;
        delay = std::cmp::min(delay * 2, Duration::from_secs(1));
    }
    if check() == expected {
        return Ok(());
    }
    anyhow::bail!(
        "Daemon did not {} in time",
        if expected { "start" } else { "stop" }
    )
}
