pub mod dispatcher;
pub mod registry;
pub mod session;
pub mod state;
pub mod watchdog;

pub use dispatcher::{handle_connection, serve};
pub use registry::{IdentityRegistry, Resolution};
pub use state::{ActiveSession, Admission, ServerState};

use crate::{Error, Result};
use tokio::net::TcpListener;
use tracing::info;

pub const SERVER_NAME: &str = "S1";
pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 50000;
pub const DEFAULT_MAX_CLIENTS: usize = 10;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_clients: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            max_clients: DEFAULT_MAX_CLIENTS,
        }
    }
}

/// How a client or watchdog connection ended.
#[derive(Debug)]
pub enum Disconnect {
    /// Peer closed the stream.
    Closed,
    /// Read or write failed, e.g. connection reset.
    Lost(Error),
}

pub async fn run(config: ServerConfig) -> Result<()> {
    let address = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&address).await?;

    info!(
        "Server {} listening on {} (max clients: {})",
        SERVER_NAME, address, config.max_clients
    );
    serve(listener, ServerState::new(config.max_clients)).await
}
