use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use partake::config::Settings;
use partake::engine::ResolveOptions;
use partake::error::{PartakeError, Result};
use partake::interface::{BuildInterface, EngineFactory, JobOptions};
use partake::server;
use partake::time::{Grain, parse_instant};

#[derive(Parser)]
#[command(name = "partake", version, about = "Works out which time-partitioned artifacts need building")]
struct Cli {
    /// Settings file (TOML, YAML or JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the plan for a rule over a period as JSON
    Plan {
        rule: String,
        start: String,
        stop: String,
        /// Staleness window overriding the source rule's
        #[arg(long)]
        window: Option<u32>,
        /// Report actionable targets at a coarser grain
        #[arg(long)]
        grain: Option<Grain>,
    },
    /// Serve the planning endpoint
    Serve { addr: Option<String> },
}

fn init_logging(settings: &Settings) {
    let filter = match &settings.log {
        Some(directive) => EnvFilter::new(directive),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let settings = match Settings::load(cli.config.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(2);
        }
    };
    init_logging(&settings);
    if let Err(e) = run(cli.command, settings).await {
        error!(error = %e, "partake failed");
        std::process::exit(1);
    }
}

async fn run(command: Commands, settings: Settings) -> Result<()> {
    let timezone = settings.timezone()?;
    let lock = settings.lock();
    let shared = Arc::new(settings);
    let factory: EngineFactory = {
        let settings = Arc::clone(&shared);
        Arc::new(move || settings.engine())
    };
    let interface = Arc::new(BuildInterface::new(factory, lock));
    match command {
        Commands::Plan {
            rule,
            start,
            stop,
            window,
            grain,
        } => {
            let start = parse_instant(&start, timezone)?;
            let stop = parse_instant(&stop, timezone)?;
            let options = JobOptions {
                resolve: ResolveOptions {
                    window,
                    report_grain: grain,
                },
                dry_run: true,
            };
            let plan = tokio::task::spawn_blocking(move || {
                interface.run_sync(&rule, start, stop, &options)
            })
            .await
            .map_err(|e| PartakeError::Execution(e.to_string()))??;
            let json = serde_json::to_string_pretty(&plan)
                .map_err(|e| PartakeError::Execution(e.to_string()))?;
            println!("{json}");
        }
        Commands::Serve { addr } => {
            let addr = addr.unwrap_or_else(|| shared.listen.clone());
            let listener = tokio::net::TcpListener::bind(&addr).await?;
            info!(%addr, "serving /v1/plan");
            axum::serve(listener, server::router(interface, timezone)).await?;
        }
    }
    Ok(())
}
