//! Keylock CLI - run commands under a distributed lease lock

use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{Args, Parser, Subcommand};
use keylock_core::config::Config;
use keylock_core::locking::{LeaseMutex, LockError, LockKey, RedisLeaseStore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Exit code when the lease could not be acquired before the timeout
const EXIT_LOCK_TIMEOUT: i32 = 3;
/// Exit code when waiting was interrupted with Ctrl-C
const EXIT_CANCELLED: i32 = 130;

#[derive(Parser, Debug)]
#[command(name = "keylock")]
#[command(author, version, about = "Distributed lease locks over Redis", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text")]
    format: OutputFormat,

    /// Quiet mode (minimal output)
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Log every protocol step
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Store URL, overriding config and KEYLOCK_REDIS_URL
    #[arg(long, global = true)]
    redis_url: Option<String>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a command while holding the lease
    Run {
        #[command(flatten)]
        target: Target,

        #[command(flatten)]
        overrides: LockOverrides,

        /// Command and arguments to run, after `--`
        #[arg(last = true, required = true)]
        command: Vec<String>,
    },

    /// Show who holds a lease
    Status {
        #[command(flatten)]
        target: Target,
    },

    /// Delete a lease regardless of holder
    Destroy {
        #[command(flatten)]
        target: Target,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Which lease to operate on
#[derive(Args, Debug, Clone)]
struct Target {
    /// Full lock key, e.g. lock:Report:42
    #[arg(
        long,
        conflicts_with_all = ["type_name", "id"],
        required_unless_present = "type_name"
    )]
    key: Option<String>,

    /// Resource type the lock protects
    #[arg(long = "type", requires = "id")]
    type_name: Option<String>,

    /// Resource instance id
    #[arg(long, requires = "type_name")]
    id: Option<String>,
}

impl Target {
    fn lock_key(&self) -> anyhow::Result<LockKey> {
        match (&self.key, &self.type_name, &self.id) {
            (Some(raw), _, _) => Ok(LockKey::from_raw(raw)),
            (None, Some(type_name), Some(id)) => Ok(LockKey::for_resource(type_name, id)),
            _ => bail!("Pass either --key or both --type and --id"),
        }
    }
}

/// Per-invocation overrides of the configured lock defaults
#[derive(Args, Debug, Clone, Default)]
struct LockOverrides {
    /// Lease TTL and waiting budget in seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Wait policy (staleness or fixed)
    #[arg(long)]
    policy: Option<String>,

    /// Attempts made by the fixed policy
    #[arg(long)]
    ticks: Option<u32>,

    /// Fail instead of overwriting when the fixed policy runs out of attempts
    #[arg(long)]
    fail_on_timeout: bool,
}

impl LockOverrides {
    fn apply(&self, config: &mut Config) -> anyhow::Result<()> {
        if let Some(timeout) = self.timeout {
            config.set("lock.timeout_secs", &timeout.to_string())?;
        }
        if let Some(policy) = &self.policy {
            config.set("lock.policy", policy)?;
        }
        if let Some(ticks) = self.ticks {
            config.set("lock.ticks", &ticks.to_string())?;
        }
        if self.fail_on_timeout {
            config.lock.fail_on_timeout = true;
        }
        Ok(())
    }
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Get a configuration value
    Get { key: String },
    /// Set a configuration value
    Set { key: String, value: String },
    /// List all configuration values
    List,
    /// Reset configuration to defaults
    Reset,
    /// Show config file path
    Path,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let directive = if cli.verbose {
        "keylock=debug"
    } else {
        "keylock=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(directive.parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let opts = Opts {
        format: cli.format,
        quiet: cli.quiet,
        verbose: cli.verbose,
        redis_url: cli.redis_url,
    };

    let code = match cli.command {
        Commands::Run {
            target,
            overrides,
            command,
        } => cmd_run(&opts, &target, &overrides, &command).await?,

        Commands::Status { target } => cmd_status(&opts, &target).await.map(|_| 0)?,

        Commands::Destroy { target } => cmd_destroy(&opts, &target).await.map(|_| 0)?,

        Commands::Config { action } => cmd_config(action, &opts).map(|_| 0)?,
    };

    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

/// Global flags shared by every command
struct Opts {
    format: OutputFormat,
    quiet: bool,
    verbose: bool,
    redis_url: Option<String>,
}

impl Opts {
    fn store_url(&self, config: &Config) -> String {
        self.redis_url
            .clone()
            .unwrap_or_else(|| config.store.resolved_url())
    }
}

/// Print the code and suggestion of a library error to stderr
fn report(err: &keylock_core::Error, quiet: bool) {
    eprintln!("Error [{}]: {}", err.code(), err);
    if !quiet {
        if let Some(suggestion) = err.suggestion() {
            eprintln!("Hint: {}", suggestion);
        }
    }
}

async fn connect(url: &str, quiet: bool) -> anyhow::Result<Arc<RedisLeaseStore>> {
    debug!(url = %url, "Connecting to lease store");
    match RedisLeaseStore::connect(url).await {
        Ok(store) => Ok(Arc::new(store)),
        Err(e) => {
            let err = keylock_core::Error::from(e);
            report(&err, quiet);
            Err(anyhow::Error::new(err).context(format!("Failed to connect to {}", url)))
        }
    }
}

async fn cmd_run(
    opts: &Opts,
    target: &Target,
    overrides: &LockOverrides,
    command: &[String],
) -> anyhow::Result<i32> {
    let Some((program, args)) = command.split_first() else {
        bail!("No command given to run");
    };

    let mut config = Config::load()?;
    overrides.apply(&mut config)?;
    let lock_config = config.lock_config()?;
    let lock_config = if opts.verbose {
        lock_config.with_verbose(true)
    } else {
        lock_config
    };

    let key = target.lock_key()?;
    let store = connect(&opts.store_url(&config), opts.quiet).await?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let lock = LeaseMutex::new(store, key.clone(), lock_config).with_cancellation(cancel);
    info!(lock_key = %key, program = %program, "Running command under lease");

    let outcome: keylock_core::Result<std::process::ExitStatus> = lock
        .with_lock(|| async {
            let status = tokio::process::Command::new(program)
                .args(args)
                .status()
                .await?;
            Ok(status)
        })
        .await;

    match outcome {
        Ok(status) => {
            debug!(lock_key = %key, status = %status, "Command finished");
            Ok(status.code().unwrap_or(1))
        }
        Err(err) if err.is_lock_timeout() => {
            report(&err, opts.quiet);
            Ok(EXIT_LOCK_TIMEOUT)
        }
        Err(keylock_core::Error::Lock(LockError::Cancelled { .. })) => {
            if !opts.quiet {
                eprintln!("Interrupted while waiting for {}", key);
            }
            Ok(EXIT_CANCELLED)
        }
        Err(keylock_core::Error::Io(e)) => {
            Err(e).with_context(|| format!("Failed to run command: {}", program))
        }
        Err(err) => {
            report(&err, opts.quiet);
            Err(err.into())
        }
    }
}

async fn cmd_status(opts: &Opts, target: &Target) -> anyhow::Result<()> {
    let config = Config::load()?;
    let key = target.lock_key()?;
    let store = connect(&opts.store_url(&config), opts.quiet).await?;
    let lock = LeaseMutex::new(store, key.clone(), config.lock_config()?);

    let holder = lock.holder().await.map_err(keylock_core::Error::from)?;

    match opts.format {
        OutputFormat::Json => {
            let output = serde_json::json!({
                "key": key.as_str(),
                "status": if holder.is_some() { "held" } else { "available" },
                "holder": holder,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Text => match holder {
            Some(token) if opts.quiet => println!("{}", token),
            Some(token) => println!("{}: held by {}", key, token),
            None if opts.quiet => {}
            None => println!("{}: available", key),
        },
    }
    Ok(())
}

async fn cmd_destroy(opts: &Opts, target: &Target) -> anyhow::Result<()> {
    let config = Config::load()?;
    let key = target.lock_key()?;
    let store = connect(&opts.store_url(&config), opts.quiet).await?;
    let lock = LeaseMutex::new(store, key.clone(), config.lock_config()?);

    let destroyed = lock.destroy().await.map_err(keylock_core::Error::from)?;
    info!(lock_key = %key, destroyed, "Destroy requested");

    match opts.format {
        OutputFormat::Json => {
            let output = serde_json::json!({
                "key": key.as_str(),
                "destroyed": destroyed,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Text if opts.quiet => {}
        OutputFormat::Text if destroyed => println!("Destroyed lease {}", key),
        OutputFormat::Text => println!("No lease held for {}", key),
    }
    Ok(())
}

fn cmd_config(action: ConfigAction, opts: &Opts) -> anyhow::Result<()> {
    match action {
        ConfigAction::Get { key } => {
            let config = Config::load()?;
            let value = config.get(&key)?;
            println!("{}", value);
        }
        ConfigAction::Set { key, value } => {
            let mut config = Config::load()?;
            config.set(&key, &value)?;
            config.save()?;
            if !opts.quiet {
                println!("Set {} = {}", key, value);
            }
        }
        ConfigAction::List => {
            let config = Config::load()?;
            let items = config.list()?;
            match opts.format {
                OutputFormat::Json => {
                    let map: serde_json::Map<String, serde_json::Value> = items
                        .into_iter()
                        .map(|(key, value)| (key, serde_json::Value::String(value)))
                        .collect();
                    println!("{}", serde_json::to_string_pretty(&map)?);
                }
                OutputFormat::Text => {
                    for (key, value) in items {
                        println!("{} = {}", key, value);
                    }
                }
            }
        }
        ConfigAction::Reset => {
            Config::reset()?;
            if !opts.quiet {
                println!("Configuration reset to defaults.");
            }
        }
        ConfigAction::Path => {
            let path = Config::config_path()?;
            println!("{}", path.display());
        }
    }
    Ok(())
}
