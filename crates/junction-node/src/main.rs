use clap::{Arg, Command};
use tracing::info;
use tracing_subscriber::EnvFilter;

use junction_node::{JunctionNode, NodeConfig};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let matches = Command::new("junction")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Interledger connector node")
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .takes_value(true)
                .required(true)
                .help("Path to the node configuration file (JSON or YAML)"),
        )
        .get_matches();

    let config_path = matches.value_of("config").expect("--config is required");
    let config = match load_configuration(config_path) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Could not load configuration from {}: {}", config_path, err);
            std::process::exit(1);
        }
    };

    let node = JunctionNode::new(config);
    let handle = match node.start().await {
        Ok(handle) => handle,
        Err(err) => {
            eprintln!("Could not start node: {}", err);
            std::process::exit(1);
        }
    };

    info!(
        "Node {} is up; transports attach through the embedding API",
        handle.ilp_address()
    );

    tokio::signal::ctrl_c()
        .await
        .expect("failed to listen for shutdown signal");
    info!("Shutting down");
}

fn load_configuration(path: &str) -> Result<NodeConfig, config::ConfigError> {
    config::Config::builder()
        .add_source(config::File::with_name(path))
        .add_source(config::Environment::with_prefix("JUNCTION"))
        .build()?
        .try_deserialize()
}
