use clap::{Parser, Subcommand};
use fault_tolerant_server::lfd::DEFAULT_HEARTBEAT_FREQ;
use fault_tolerant_server::server::{DEFAULT_HOST, DEFAULT_MAX_CLIENTS, DEFAULT_PORT};

#[derive(Parser, Debug)]
#[clap(version, about)]
pub struct Args {
    #[clap(subcommand)]
    pub cmd: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run the server (S1)
    Server {
        #[arg(long, default_value = DEFAULT_HOST)]
        host: String,
        #[arg(short, long, default_value_t = DEFAULT_PORT)]
        port: u16,
        #[arg(short, long, default_value_t = DEFAULT_MAX_CLIENTS)]
        max_clients: usize,
    },
    /// Run an interactive client
    Client {
        /// Local label used in this client's own output (C<n>)
        #[arg(short, long, default_value_t = 1)]
        client_id: u32,
        #[arg(long, default_value = DEFAULT_HOST)]
        host: String,
        #[arg(short, long, default_value_t = DEFAULT_PORT)]
        port: u16,
    },
    /// Run the local fault detector against the server
    Lfd {
        #[arg(long, default_value = DEFAULT_HOST)]
        host: String,
        #[arg(short, long, default_value_t = DEFAULT_PORT)]
        port: u16,
        /// Seconds between heartbeats. Invalid values fall back to the default.
        #[arg(short = 'f', long, default_value_t = DEFAULT_HEARTBEAT_FREQ.as_secs().to_string())]
        heartbeat_freq: String,
    },
}
