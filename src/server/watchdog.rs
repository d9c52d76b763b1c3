use super::Disconnect;
use super::state::ServerState;
use crate::Error;
use crate::protocol::{HEARTBEAT, ServerFrame};
use futures::{Sink, SinkExt, Stream, StreamExt};
use std::net::SocketAddr;
use tracing::{info, warn};

/// Runs the heartbeat loop for the watchdog holding the slot, then frees the
/// slot so another watchdog can attach.
pub async fn serve_watchdog<I, O>(
    state: &ServerState,
    peer: SocketAddr,
    mut sink: O,
    mut stream: I,
) -> Disconnect
where
    I: Stream<Item = crate::Result<String>> + Unpin,
    O: Sink<ServerFrame, Error = Error> + Unpin,
{
    let disconnect = heartbeat_loop(&mut sink, &mut stream).await;

    let _ = state.release_watchdog(peer).await;
    match &disconnect {
        Disconnect::Closed => info!("LFD disconnected"),
        Disconnect::Lost(e) => warn!("LFD disconnected abnormally: {}", e),
    }

    disconnect
}

async fn heartbeat_loop<I, O>(sink: &mut O, stream: &mut I) -> Disconnect
where
    I: Stream<Item = crate::Result<String>> + Unpin,
    O: Sink<ServerFrame, Error = Error> + Unpin,
{
    if let Err(e) = sink.send(ServerFrame::LfdAccepted).await {
        return Disconnect::Lost(e);
    }

    loop {
        let frame = match stream.next().await {
            Some(Ok(frame)) => frame,
            Some(Err(e)) => return Disconnect::Lost(e),
            None => return Disconnect::Closed,
        };

        if frame != HEARTBEAT {
            warn!("Unexpected message from LFD: {:?}", frame);
            continue;
        }

        info!("Received heartbeat from LFD");
        if let Err(e) = sink.send(ServerFrame::Alive).await {
            return Disconnect::Lost(e);
        }
        info!("Sent ALIVE message to LFD");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::channel::mpsc;

    #[tokio::test]
    async fn answers_heartbeats_and_ignores_noise() {
        let state = ServerState::new(1);
        let peer = SocketAddr::from(([127, 0, 0, 1], 6000));
        assert!(state.claim_watchdog(peer).await);

        let (tx, rx) = mpsc::unbounded::<ServerFrame>();
        let sink = tx.sink_map_err(|e| Error::General(e.to_string()));
        let stream = futures::stream::iter(
            ["HEARTBEAT", "status?", "HEARTBEAT"]
                .into_iter()
                .map(|frame| Ok(frame.to_string())),
        );

        let disconnect = serve_watchdog(&state, peer, sink, stream).await;

        assert!(matches!(disconnect, Disconnect::Closed));
        let frames: Vec<ServerFrame> = rx.collect().await;
        assert_eq!(
            frames,
            vec![
                ServerFrame::LfdAccepted,
                ServerFrame::Alive,
                ServerFrame::Alive
            ]
        );
        assert_eq!(state.watchdog().await, None);
    }

    #[tokio::test]
    async fn slot_released_when_acceptance_cannot_be_sent() {
        let state = ServerState::new(1);
        let peer = SocketAddr::from(([127, 0, 0, 1], 6001));
        assert!(state.claim_watchdog(peer).await);

        let (tx, rx) = mpsc::unbounded::<ServerFrame>();
        drop(rx);
        let sink = tx.sink_map_err(|e| Error::General(e.to_string()));
        let stream = futures::stream::iter(Vec::<crate::Result<String>>::new());

        let disconnect = serve_watchdog(&state, peer, sink, stream).await;

        assert!(matches!(disconnect, Disconnect::Lost(_)));
        assert!(state.claim_watchdog(peer).await);
    }
}
