use clap::Parser;
use hoist_server::{AppRoot, ServeOptions};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "hoist-server", about = "Serve a published hoist application directory")]
struct Cli {
    /// Port to listen on.
    #[arg(long, default_value_t = 8321)]
    port: u16,

    /// Address to bind.
    #[arg(long, default_value = "0.0.0.0")]
    bind: String,

    /// Published application directory (the appbase).
    #[arg(long, default_value = ".")]
    root: PathBuf,

    /// Milliseconds to pause between body chunks, for testing slow mirrors.
    #[arg(long)]
    throttle_ms: Option<u64>,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("HOIST_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    if !cli.root.is_dir() {
        error!("not a directory: {}", cli.root.display());
        return ExitCode::from(2);
    }

    let addr = format!("{}:{}", cli.bind, cli.port);
    info!("starting hoist-server on {addr}");
    info!("serving {}", cli.root.display());

    let options = ServeOptions {
        chunk_delay: cli.throttle_ms.map(Duration::from_millis),
    };
    let app = AppRoot::new(cli.root, options);
    match hoist_server::run_server(&app, &addr) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("server failed: {e}");
            ExitCode::FAILURE
        }
    }
}
