//! `diagram-relay` binary: run the collaboration relay.

use clap::Parser;
use diagram_relay::{RelayServer, ServerConfig, ServerError};

#[derive(Debug, Parser)]
#[command(name = "diagram-relay", version, about = "Real-time collaboration relay for UML diagrams")]
struct Cli {
    /// Address to listen on
    #[arg(long, env = "DIAGRAM_RELAY_BIND", default_value = "127.0.0.1:9090")]
    bind: String,

    /// Path prefix under which rooms are addressed
    #[arg(long, env = "DIAGRAM_RELAY_PATH_PREFIX", default_value = "/diagram")]
    path_prefix: String,

    /// Frames buffered per session before deliveries to it fail
    #[arg(long, env = "DIAGRAM_RELAY_OUTBOUND_CAPACITY", default_value_t = 256)]
    outbound_capacity: usize,
}

impl From<Cli> for ServerConfig {
    fn from(cli: Cli) -> Self {
        Self {
            bind_addr: cli.bind,
            path_prefix: cli.path_prefix,
            outbound_capacity: cli.outbound_capacity,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), ServerError> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    log::debug!("Starting with {cli:?}");

    let server = RelayServer::new(cli.into());
    server.run().await
}
