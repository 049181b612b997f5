use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use ticketa::config::AppConfig;
use ticketa::routing::build_routes;
use ticketa::server::{self, AppState};

#[derive(Parser)]
#[command(name = "ticketa")]
#[command(about = "Ticketa - ticket tracking web application")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Run the web server (default)")]
    Serve {
        #[arg(long, help = "Port to listen on (overrides PORT)")]
        port: Option<u16>,

        #[arg(long, help = "Load environment variables from this file instead of .env")]
        env_file: Option<PathBuf>,
    },

    #[command(about = "Print the route table")]
    Routes,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e:?}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command.unwrap_or(Commands::Serve { port: None, env_file: None }) {
        Commands::Serve { port, env_file } => {
            // A missing .env is fine; a missing --env-file is not
            match env_file {
                Some(path) => {
                    dotenvy::from_path(&path).with_context(|| format!("failed to load {}", path.display()))?;
                }
                None => {
                    let _ = dotenvy::dotenv();
                }
            }

            let mut config = AppConfig::from_env();
            if let Some(port) = port {
                config.server.port = port;
            }
            init_tracing(config.app.debug);

            tracing::info!("Starting {} {} in {:?} mode", config.app.name, config.app.version, config.environment);
            tracing::debug!("Backend configuration: {:?}", config.backend);

            let port = config.server.port;
            let state = AppState::from_config(config).await?;
            server::serve(state, port).await
        }
        Commands::Routes => {
            for route in build_routes().routes() {
                let access = if route.handler.is_public() { "public" } else { "login" };
                println!("{:<6} {:<26} {:<8} {}", route.method.as_str(), route.pattern.as_str(), access, route.handler.name());
            }
            println!("{:<6} {:<26} {:<8} {}", "GET", "/health", "public", "health");
            Ok(())
        }
    }
}

fn init_tracing(debug: bool) {
    let default = if debug { "ticketa=debug,tower_http=debug" } else { "ticketa=info,tower_http=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
