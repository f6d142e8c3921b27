mod commands;

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use commands::{EXIT_FAILURE, EXIT_INTERRUPTED, EXIT_MANIFEST_ERROR, EXIT_STORE_ERROR};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "hoist",
    version,
    about = "Self-updating application distributor"
)]
struct Cli {
    /// Application directory to operate on.
    #[arg(long, default_value = ".", global = true)]
    app: PathBuf,

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
    /// Write digest manifests for a published application directory.
    Digest {
        /// Base64 Ed25519 signing key file; writes a `.sig` next to each manifest.
        #[arg(long)]
        sign_key: Option<PathBuf>,
    },
    /// Build patch files that upgrade an older published version to this one.
    Diff {
        /// Published directory of the older version.
        old: PathBuf,
        /// Version number of the older directory, used to name the patch.
        #[arg(long)]
        from: u64,
    },
    /// Apply a patch file to the application directory.
    Patch {
        /// Patch file produced by `hoist diff`.
        patch: PathBuf,
    },
    /// Bring the application up to date.
    Update {
        /// Downloader config file (defaults to ~/.config/hoist/downloader.json).
        #[arg(long)]
        config: Option<PathBuf>,
        /// Launch the application once it validates.
        #[arg(long, default_value_t = false)]
        launch: bool,
    },
    /// Check installed resources against the local manifests.
    Verify,
    /// Evict stale entries from the resource caches.
    Gc {
        /// Override the descriptor's retention period, in days.
        #[arg(long)]
        retention_days: Option<i64>,
    },
    /// List entries of the code cache.
    Cache,
    /// Generate shell completions for bash, zsh, fish, elvish, or powershell.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
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
            tracing_subscriber::EnvFilter::try_from_env("HOIST_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    let app = cli.app.as_path();
    let json_output = cli.json;

    let result = match cli.command {
        Commands::Digest { sign_key } => {
            commands::digest::run(app, sign_key.as_deref(), json_output)
        }
        Commands::Diff { old, from } => commands::diff::run(app, &old, from, json_output),
        Commands::Patch { patch } => commands::patch::run(app, &patch, json_output),
        Commands::Update { config, launch } => {
            commands::update::run(app, config.as_deref(), launch, json_output)
        }
        Commands::Verify => commands::verify::run(app, json_output),
        Commands::Gc { retention_days } => commands::gc::run(app, retention_days, json_output),
        Commands::Cache => commands::cache::run(app, json_output),
        Commands::Completions { shell } => commands::completions::run::<Cli>(shell),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(msg) => {
            eprintln!("error: {msg}");
            let code = if msg.starts_with("schema error:")
                || msg.starts_with("manifest unavailable:")
                || msg.starts_with("failed to read descriptor")
            {
                EXIT_MANIFEST_ERROR
            } else if msg.starts_with("cache error:") {
                EXIT_STORE_ERROR
            } else if msg == "update aborted" {
                EXIT_INTERRUPTED
            } else {
                EXIT_FAILURE
            };
            ExitCode::from(code)
        }
    }
}
