use anyhow::{Context, bail};
use clap::{Args, Parser, Subcommand};
use std::num::NonZeroU32;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;
use waflock_config::LockConfig;
use waflock_core::{LockName, NameHasher, OpenOutcome, PlatformLock, READER_SLOTS};

#[derive(Parser, Debug)]
#[command(name = "waflock", about = "Inspect and exercise named cross-process reader-writer locks")]
struct Cli {
    #[command(flatten)]
    target: Target,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Args, Debug)]
struct Target {
    /// TOML file describing the lock.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Lock name; overrides the config file.
    #[arg(long, global = true)]
    name: Option<String>,

    /// User owning the lock if this invocation creates it.
    #[arg(long, global = true)]
    owner: Option<String>,

    /// Group owning the lock if this invocation creates it.
    #[arg(long, global = true)]
    group: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Create the lock or attach to it, and report which happened.
    Open,
    /// Print slot values and the number of shared holders. A lock that did
    /// not exist yet is removed again.
    Status,
    /// Hold a shared lock for a while.
    Shared {
        #[arg(long, default_value_t = 1000)]
        hold_ms: u64,
    },
    /// Hold an exclusive lock for a while.
    Exclusive {
        #[arg(long, default_value_t = 1000)]
        hold_ms: u64,
    },
    /// Open the lock and close this process's handle again.
    Close,
    /// Remove the lock's kernel object.
    Destroy,
    /// Print the identifier a name hashes to.
    Hash {
        #[arg(value_name = "NAME")]
        lock_name: String,
    },
}

fn resolve_config(target: &Target) -> anyhow::Result<LockConfig> {
    let mut config = match (&target.config, &target.name) {
        (Some(path), _) => LockConfig::load(path.display().to_string())
            .with_context(|| format!("loading {}", path.display()))?,
        (None, Some(name)) => LockConfig::for_name(name),
        (None, None) => bail!("either --config or --name is required"),
    };
    if let Some(name) = &target.name {
        config.name = name.clone();
    }
    if target.owner.is_some() {
        config.owner = target.owner.clone();
    }
    if target.group.is_some() {
        config.group = target.group.clone();
    }
    config.validate()?;
    Ok(config)
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn open(config: &LockConfig) -> anyhow::Result<(PlatformLock, OpenOutcome)> {
    let owner = config.owner();
    let options = config.options()?;
    PlatformLock::open(config.lock_name()?, owner.as_ref(), &options)
        .with_context(|| format!("opening lock '{}'", config.name))
}

/// Report line for `status`. A lock this invocation had to create is removed
/// again so that looking never leaves a kernel object behind.
fn status(lock: &mut PlatformLock, outcome: OpenOutcome) -> anyhow::Result<String> {
    if outcome == OpenOutcome::Created {
        if lock.capabilities().destroy {
            lock.destroy()?;
        } else {
            lock.close()?;
        }
        return Ok(format!("no lock named '{}' existed", lock.identity().name));
    }
    let caps = lock.capabilities();
    if !caps.snapshot {
        return Ok(format!("slot values are not observable on this platform ({caps:?})"));
    }
    let snap = lock.snapshot()?;
    let holders = i32::from(READER_SLOTS) - snap.read;
    Ok(format!(
        "write={} read={} shared_holders={} exclusive_or_gate_held={}",
        snap.write,
        snap.read,
        holders.max(0),
        snap.write == 0
    ))
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Cmd::Hash { lock_name } = &cli.command {
        init_tracing("info");
        let config = match &cli.target.config {
            Some(path) => LockConfig::load(path.display().to_string())?,
            None => LockConfig::for_name(lock_name),
        };
        let range = NonZeroU32::new(config.id_range).context("id_range must be non-zero")?;
        let name = LockName::new(lock_name)?;
        let identifier = NameHasher::new(config.hash_seed).hash(name.as_bytes(), range);
        println!("{identifier}");
        return Ok(());
    }

    let config = resolve_config(&cli.target)?;
    init_tracing(&config.log_level);
    let (mut lock, outcome) = open(&config)?;
    let identifier = lock.identity().identifier;
    info!(name = %config.name, identifier, ?outcome, "lock ready");

    match cli.command {
        Cmd::Open => {
            println!("{outcome:?} identifier={identifier}");
        }
        Cmd::Status => {
            println!("{}", status(&mut lock, outcome)?);
        }
        Cmd::Shared { hold_ms } => {
            let guard = lock.shared()?;
            info!(hold_ms, "holding shared lock");
            std::thread::sleep(Duration::from_millis(hold_ms));
            guard.release()?;
        }
        Cmd::Exclusive { hold_ms } => {
            let guard = lock.exclusive()?;
            info!(hold_ms, "holding exclusive lock");
            std::thread::sleep(Duration::from_millis(hold_ms));
            guard.release()?;
        }
        Cmd::Close => {
            lock.close()?;
            println!("closed");
        }
        Cmd::Destroy => {
            lock.destroy()?;
            match outcome {
                OpenOutcome::Created => println!("no lock existed; nothing left behind"),
                OpenOutcome::Opened => println!("destroyed"),
            }
        }
        Cmd::Hash { .. } => unreachable!("handled before opening the lock"),
    }
    Ok(())
}
