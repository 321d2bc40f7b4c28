mod commands;

use burrow_core::{install_signal_handler, Config, Engine};
use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

#[derive(Debug, Parser)]
#[command(
    name = "burrow",
    version,
    about = "Declarative environment resolver and activator"
)]
struct Cli {
    /// Path to the burrow store directory (overrides BURROW_STORE and config).
    #[arg(long, global = true)]
    store: Option<String>,

    /// Local registry directory for the registry provider.
    #[arg(long, global = true)]
    registry: Option<String>,

    /// Package provider: "registry" or "mock".
    #[arg(long, global = true)]
    provider: Option<String>,

    /// Configuration file (default: ~/.config/burrow/config.toml).
    #[arg(long, global = true)]
    config: Option<String>,

    /// Output results as structured JSON.
    #[arg(long, default_value_t = false, global = true)]
    json: bool,

    /// Enable verbose (debug) logging output.
    #[arg(short, long, default_value_t = false, global = true)]
    verbose: bool,

    /// Enable trace-level logging (more detailed than --verbose).
    #[arg(long, default_value_t = false, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Validate a manifest without resolving it.
    Check {
        /// Path to manifest TOML file.
        #[arg(default_value = "burrow.toml")]
        manifest: PathBuf,
    },
    /// Resolve every input and write burrow.lock next to the manifest.
    Resolve {
        /// Path to manifest TOML file.
        #[arg(default_value = "burrow.toml")]
        manifest: PathBuf,
        /// Require an existing lock file and fail if resolved state would drift.
        #[arg(long, default_value_t = false)]
        locked: bool,
        /// Ignore cached lookups and query the provider again.
        #[arg(long, default_value_t = false)]
        refresh: bool,
        /// Give up on outstanding lookups after this many seconds.
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// Print an activation script for the composed environment.
    Env {
        /// Path to manifest TOML file.
        #[arg(default_value = "burrow.toml")]
        manifest: PathBuf,
        /// Script dialect: posix (sh, bash, zsh) or fish.
        #[arg(long, default_value = "posix")]
        format: String,
        /// Write the script to a file instead of stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Emit the deactivation script instead.
        #[arg(long, default_value_t = false)]
        deactivate: bool,
    },
    /// Run a command inside the composed environment.
    Run {
        /// Path to manifest TOML file.
        #[arg(default_value = "burrow.toml")]
        manifest: PathBuf,
        /// Command and arguments to run (after --).
        #[arg(required = true, last = true)]
        command: Vec<String>,
    },
    /// Start $SHELL inside the composed environment.
    Shell {
        /// Path to manifest TOML file.
        #[arg(default_value = "burrow.toml")]
        manifest: PathBuf,
    },
    /// Inspect or maintain the artifact cache.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
    /// Generate shell completions for bash, zsh, fish, elvish, or powershell.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

#[derive(Debug, Subcommand)]
enum CacheAction {
    /// List cached artifacts.
    List,
    /// Verify every cached artifact and index entry.
    Verify,
    /// Remove corrupt artifacts and dangling index entries.
    Prune,
}

fn main() -> ExitCode {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let msg = info.to_string();
        if msg.contains("Broken pipe")
            || msg.contains("broken pipe")
            || msg.contains("os error 32")
            || msg.contains("failed printing to stdout")
        {
            std::process::exit(0);
        }
        default_hook(info);
    }));

    let cli = Cli::parse();

    let default_level = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("BURROW_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();

    install_signal_handler();

    match dispatch(&cli) {
        Ok(code) => ExitCode::from(code),
        Err(msg) => {
            eprintln!("error: {msg}");
            ExitCode::from(commands::classify(&msg))
        }
    }
}

/// Run the selected command. The engine, and with it the store, is only set
/// up for commands that resolve something.
fn dispatch(cli: &Cli) -> Result<u8, String> {
    let json = cli.json;
    match &cli.command {
        Commands::Check { manifest } => commands::check::run(manifest, json),
        Commands::Completions { shell } => commands::completions::run::<Cli>(*shell),
        Commands::Resolve {
            manifest,
            locked,
            refresh,
            timeout,
        } => {
            let mut engine = build_engine(cli)?;
            let options = engine.options_mut();
            options.refresh = *refresh;
            if let Some(secs) = timeout {
                options.timeout = Some(Duration::from_secs(*secs));
            }
            commands::resolve::run(&engine, manifest, *locked, json)
        }
        Commands::Env {
            manifest,
            format,
            output,
            deactivate,
        } => commands::env::run(
            &build_engine(cli)?,
            manifest,
            format,
            output.as_deref(),
            *deactivate,
            json,
        ),
        Commands::Run { manifest, command } => {
            commands::run::run(&build_engine(cli)?, manifest, command, json)
        }
        Commands::Shell { manifest } => commands::run::shell(&build_engine(cli)?, manifest, json),
        Commands::Cache { action } => {
            let engine = build_engine(cli)?;
            match action {
                CacheAction::List => commands::cache::list(&engine, json),
                CacheAction::Verify => commands::cache::verify(&engine, json),
                CacheAction::Prune => commands::cache::prune(&engine, json),
            }
        }
    }
}

/// Config file, then `BURROW_STORE`, then command-line flags.
fn build_engine(cli: &Cli) -> Result<Engine, String> {
    let config_path = cli.config.as_deref().map(expand_tilde);
    let mut config = Config::load(config_path.as_deref()).map_err(|e| e.to_string())?;
    if let Some(store) = &cli.store {
        config.store = Some(expand_tilde(store));
    }
    if let Some(registry) = &cli.registry {
        config.registry = Some(expand_tilde(registry));
    }
    if let Some(provider) = &cli.provider {
        config.provider = Some(provider.clone());
    }
    tracing::debug!(
        "store {} via provider {}",
        config.store_root().display(),
        config.provider()
    );
    Engine::from_config(&config).map_err(|e| e.to_string())
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return Path::new(&home).join(stripped);
        }
    }
    PathBuf::from(path)
}
