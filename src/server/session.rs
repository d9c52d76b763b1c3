use super::Disconnect;
use super::state::{ActiveSession, ServerState};
use crate::Error;
use crate::protocol::ServerFrame;
use futures::{Sink, SinkExt, Stream, StreamExt};
use tracing::{info, warn};

/// Serves one admitted client until its connection goes away.
///
/// The session is removed from the server state on every exit path; the
/// identity mapping stays behind for a later reconnect.
pub async fn serve_client<I, O>(
    state: &ServerState,
    session: ActiveSession,
    mut sink: O,
    mut stream: I,
) -> Disconnect
where
    I: Stream<Item = crate::Result<String>> + Unpin,
    O: Sink<ServerFrame, Error = Error> + Unpin,
{
    let handle = session.handle;

    let disconnect = loop {
        let request = match stream.next().await {
            Some(Ok(request)) => request,
            Some(Err(e)) => break Disconnect::Lost(e),
            None => break Disconnect::Closed,
        };
        info!("Received from client {}: {}", handle, request);

        let current = state.record_request().await;
        let reply = ServerFrame::reply(handle, &request, current);

        info!("Sending to client {}: {}.", handle, request.to_uppercase());
        if let Err(e) = sink.send(reply).await {
            break Disconnect::Lost(e);
        }
        info!("Current server state: {}", current);
    };

    let _ = state.end_session(session.peer).await;
    match &disconnect {
        Disconnect::Closed => info!("Client {} disconnected", handle),
        Disconnect::Lost(e) => warn!("Client {} disconnected abnormally: {}", handle, e),
    }

    disconnect
}
