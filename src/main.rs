mod cmd;

use anyhow::Context;
use clap::Parser;
use cmd::*;
use fault_tolerant_server::client::Client;
use fault_tolerant_server::lfd::{Lfd, parse_heartbeat_freq};
use fault_tolerant_server::server::{self, ServerConfig};
use fault_tolerant_server::tracer;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let _ = tracer::setup_simple_tracing();

    match args.cmd {
        Command::Server {
            host,
            port,
            max_clients,
        } => {
            let config = ServerConfig {
                host,
                port,
                max_clients,
            };
            server::run(config.clone())
                .await
                .with_context(|| format!("server on {}:{} stopped", config.host, config.port))?
        }
        Command::Client {
            client_id,
            host,
            port,
        } => Client::new(client_id, format!("{host}:{port}")).run().await?,
        Command::Lfd {
            host,
            port,
            heartbeat_freq,
        } => {
            let lfd = Lfd::new(format!("{host}:{port}"), parse_heartbeat_freq(&heartbeat_freq));
            let outcome = lfd.run().await?;
            info!("LFD stopped: {:?}", outcome);
        }
    }

    Ok(())
}
