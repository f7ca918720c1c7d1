use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use voxbridge_core::config::{Config, LoggingConfig};
use voxbridge_gateway::GatewayState;

#[derive(Parser)]
#[command(
    name = "voxbridge",
    about = "Bridge phone calls to a streaming conversational agent",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway server
    Serve {
        /// Port to listen on (default: config, then PORT, then 3000)
        #[arg(long)]
        port: Option<u16>,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Show gateway status
    Status,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration
    Show,
    /// Get a specific config value
    Get { key: String },
    /// Check the configuration for problems
    Validate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli
        .config
        .map(std::path::PathBuf::from)
        .unwrap_or_else(Config::config_dir);

    let config = Config::load(&config_path)?;

    init_logging(&config.logging.clone().unwrap_or_default(), cli.verbose);

    match cli.command {
        Commands::Serve { port } => {
            let port = port.unwrap_or_else(|| config.gateway_port());
            let (warnings, errors) = config.validate();
            for w in &warnings {
                tracing::warn!("{w}");
            }
            if !errors.is_empty() {
                for e in &errors {
                    tracing::error!("{e}");
                }
                anyhow::bail!("Invalid configuration in {}", config_path.display());
            }

            let state = GatewayState::from_config(config)?;
            #[cfg(feature = "metrics")]
            let state = state.with_metrics(voxbridge_gateway::metrics::install_prometheus_recorder()?);

            tracing::info!("Starting VoxBridge gateway on port {port}");
            voxbridge_gateway::start_gateway(Arc::new(state), port).await?;
        }
        Commands::Config { action } => match action {
            ConfigAction::Show => {
                let json = serde_json::to_string_pretty(&config)?;
                println!("{json}");
            }
            ConfigAction::Get { key } => match config.get_path(&key) {
                Some(value) => println!("{}", serde_json::to_string_pretty(&value)?),
                None => {
                    eprintln!("No value at {key}");
                    std::process::exit(1);
                }
            },
            ConfigAction::Validate => {
                let (warnings, errors) = config.validate();
                for w in &warnings {
                    println!("warning: {w}");
                }
                for e in &errors {
                    println!("error: {e}");
                }
                if !errors.is_empty() {
                    std::process::exit(1);
                }
                println!("Config OK: {}", config_path.display());
            }
        },
        Commands::Status => {
            let port = config.gateway_port();
            println!("VoxBridge v{}", env!("CARGO_PKG_VERSION"));
            println!("Config: {}", config_path.display());
            println!("Gateway port: {port}");

            let url = format!("http://127.0.0.1:{port}/health");
            match reqwest::get(&url).await {
                Ok(resp) if resp.status().is_success() => {
                    let body: serde_json::Value = resp.json().await?;
                    println!("Status: running (v{})", body["version"].as_str().unwrap_or("?"));
                    println!("Active calls: {}", body["calls"]);
                }
                Ok(resp) => println!("Status: unhealthy ({})", resp.status()),
                Err(_) => println!("Status: not running"),
            }
        }
    }

    Ok(())
}

/// Install the global subscriber. `RUST_LOG` wins over the config file.
fn init_logging(logging: &LoggingConfig, verbose: bool) {
    let level = if verbose {
        "debug"
    } else {
        logging.level.as_deref().unwrap_or("info")
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let mut directives = level.to_string();
        for f in &logging.filters {
            directives.push(',');
            directives.push_str(f);
        }
        EnvFilter::new(directives)
    });

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match (logging.format.as_str(), logging.output.as_str()) {
        ("json", "stdout") => builder.json().with_writer(std::io::stdout).init(),
        ("json", _) => builder.json().with_writer(std::io::stderr).init(),
        (_, "stdout") => builder.with_writer(std::io::stdout).init(),
        _ => builder.with_writer(std::io::stderr).init(),
    }
}
