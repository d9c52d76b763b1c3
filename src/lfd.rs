use crate::Result;
use crate::protocol::{
    ALIVE, FrameCodec, LFD_ACCEPTED, LFD_REFUSED, PeerFrame, WATCHDOG_TOKEN,
};
use crate::server::SERVER_NAME;
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::interval;
use tokio_util::codec::Framed;
use tracing::{error, info, warn};

pub const DEFAULT_HEARTBEAT_FREQ: Duration = Duration::from_secs(5);

/// Whole seconds between heartbeats. Anything that is not a positive integer
/// falls back to [`DEFAULT_HEARTBEAT_FREQ`].
pub fn parse_heartbeat_freq(raw: &str) -> Duration {
    match raw.trim().parse::<u64>() {
        Ok(secs) if secs > 0 => Duration::from_secs(secs),
        _ => {
            warn!(
                "Invalid heartbeat frequency {:?}. Using default value of {} seconds.",
                raw,
                DEFAULT_HEARTBEAT_FREQ.as_secs()
            );
            DEFAULT_HEARTBEAT_FREQ
        }
    }
}

/// Why the watchdog stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LfdOutcome {
    /// The server could not be reached at all.
    Unreachable,
    /// Another watchdog already holds the slot.
    Refused,
    /// The server answered the identification with something unexpected.
    UnexpectedAck(String),
    /// Heartbeats stopped being acknowledged after `heartbeats` successes.
    ServerDown { heartbeats: u64 },
}

/// Local fault detector: heartbeats one server and reports when it dies.
#[derive(Debug, Clone)]
pub struct Lfd {
    server: String,
    heartbeat_freq: Duration,
}

impl Lfd {
    pub fn new(server: impl Into<String>, heartbeat_freq: Duration) -> Self {
        Self {
            server: server.into(),
            heartbeat_freq,
        }
    }

    pub async fn run(&self) -> Result<LfdOutcome> {
        let socket = match TcpStream::connect(&self.server).await {
            Ok(socket) => socket,
            Err(e) => {
                error!(
                    "Connection to server failed. Make sure the server is running. ({})",
                    e
                );
                return Ok(LfdOutcome::Unreachable);
            }
        };
        info!("LFD connected to server at {}", self.server);
        info!("Heartbeat frequency: {:?}", self.heartbeat_freq);

        let mut framed = Framed::new(socket, FrameCodec::peer());
        framed
            .send(PeerFrame::Identify(WATCHDOG_TOKEN.to_string()))
            .await?;

        match framed.next().await {
            Some(Ok(ack)) if ack == LFD_ACCEPTED => {
                info!("Server acknowledged LFD connection");
            }
            Some(Ok(ack)) if ack == LFD_REFUSED => {
                warn!("Server refused LFD connection: another LFD is already connected");
                return Ok(LfdOutcome::Refused);
            }
            Some(Ok(ack)) => {
                warn!(
                    "Unexpected response from server during identification: {}",
                    ack
                );
                return Ok(LfdOutcome::UnexpectedAck(ack));
            }
            Some(Err(e)) => {
                warn!("Lost connection during identification: {}", e);
                return Ok(LfdOutcome::ServerDown { heartbeats: 0 });
            }
            None => {
                warn!("Server closed the connection during identification");
                return Ok(LfdOutcome::ServerDown { heartbeats: 0 });
            }
        }

        let heartbeats = self.send_heartbeats(&mut framed).await;
        warn!("Heartbeat failed. Server {} appears to be down.", SERVER_NAME);
        Ok(LfdOutcome::ServerDown { heartbeats })
    }

    /// Returns the number of acknowledged heartbeats once the server stops
    /// answering with `ALIVE`.
    async fn send_heartbeats(&self, framed: &mut Framed<TcpStream, FrameCodec>) -> u64 {
        let mut ticker = interval(self.heartbeat_freq);
        let mut acknowledged = 0;

        loop {
            ticker.tick().await;

            info!("Sending heartbeat to server {}", SERVER_NAME);
            if let Err(e) = framed.send(PeerFrame::Heartbeat).await {
                warn!("Failed to send heartbeat: {}", e);
                return acknowledged;
            }

            match framed.next().await {
                Some(Ok(response)) if response == ALIVE => {
                    acknowledged += 1;
                    info!("Received ALIVE message from server {}", SERVER_NAME);
                }
                Some(Ok(response)) => {
                    warn!("Unexpected response from server: {}", response);
                    return acknowledged;
                }
                Some(Err(e)) => {
                    warn!("Lost connection to server: {}", e);
                    return acknowledged;
                }
                None => return acknowledged,
            }
        }
    }
}
