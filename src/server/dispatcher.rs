use super::session::serve_client;
use super::state::{Admission, ServerState};
use super::watchdog::serve_watchdog;
use crate::Result;
use crate::protocol::{FrameCodec, Identification, ServerFrame, parse_identification};
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;
use tracing::{debug, error, info, warn};

/// Accepts forever, one task per connection.
pub async fn serve(listener: TcpListener, state: ServerState) -> Result<()> {
    loop {
        let (socket, address) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!("Failed to accept connection: {}", e);
                continue;
            }
        };

        debug!("Got connection from {}", address);
        let state = state.clone();
        tokio::spawn(async move {
            if let Err(err) = handle_connection(state, socket, address).await {
                error!("Error handling connection {}: {}", address, err);
            }
        });
    }
}

/// Reads the identification frame and routes the connection to the watchdog
/// slot or to client admission. Returning drops the socket.
pub async fn handle_connection(
    state: ServerState,
    socket: TcpStream,
    peer: SocketAddr,
) -> Result<()> {
    let (mut sink, mut stream) =
        Framed::new(socket, FrameCodec::server()).split::<ServerFrame>();

    let frame = match stream.next().await {
        Some(Ok(frame)) => frame,
        Some(Err(e)) => {
            warn!("Failed to read identification from {}: {}", peer, e);
            return Ok(());
        }
        None => {
            info!("Connection from {} closed before identification", peer);
            return Ok(());
        }
    };

    match parse_identification(&frame) {
        Ok(Identification::Watchdog) => {
            if state.claim_watchdog(peer).await {
                info!("LFD connected from {}", peer);
                serve_watchdog(&state, peer, sink, stream).await;
            } else {
                info!("LFD connection from {} refused: LFD already connected", peer);
                sink.send(ServerFrame::LfdRefused).await?;
            }
        }
        Ok(Identification::Client(identity)) => match state.admit(identity, peer).await {
            Admission::Accepted {
                session,
                reconnected,
            } => {
                if reconnected {
                    info!("Reconnected client {} from {}", session.handle, peer);
                } else {
                    info!("New client {} connected from {}", session.handle, peer);
                }
                serve_client(&state, session, sink, stream).await;
            }
            Admission::Refused {
                active,
                max_clients,
            } => {
                info!(
                    "Connection from {} refused: maximum clients reached ({}/{})",
                    peer, active, max_clients
                );
            }
        },
        Err(e) => {
            warn!("Invalid identification from {}: {}", peer, e);
        }
    }

    Ok(())
}
