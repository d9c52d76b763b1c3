use crate::protocol::{ClientIdentity, FrameCodec, PeerFrame};
use crate::tracer::add_timestamp;
use crate::{Error, Result};
use futures::lock::Mutex;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::codec::Framed;
use tracing::{error, info, warn};

/// How long `send_message` waits for the reply to one request.
pub const REPLY_TIMEOUT: Duration = Duration::from_secs(5);

type ClientSink = SplitSink<Framed<TcpStream, FrameCodec>, PeerFrame>;
type ClientStream = SplitStream<Framed<TcpStream, FrameCodec>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Disconnected,
    Connected,
    WaitingResponse,
}

struct Shared {
    state: ClientState,
    last_reply: Option<String>,
}

/// Interactive client. Keeps one identity for the life of the process so the
/// server hands back the same `C<n>` after every reconnect.
pub struct Client {
    label: u32,
    server: String,
    identity: ClientIdentity,
    reply_timeout: Duration,
    shared: Arc<Mutex<Shared>>,
    response: Arc<Notify>,
    sink: Option<ClientSink>,
    receiver: Option<JoinHandle<()>>,
    first_connect: bool,
}

impl Client {
    pub fn new(label: u32, server: impl Into<String>) -> Self {
        Self::with_identity(label, server, ClientIdentity::generate())
    }

    pub fn with_identity(
        label: u32,
        server: impl Into<String>,
        identity: ClientIdentity,
    ) -> Self {
        Self {
            label,
            server: server.into(),
            identity,
            reply_timeout: REPLY_TIMEOUT,
            shared: Arc::new(Mutex::new(Shared {
                state: ClientState::Disconnected,
                last_reply: None,
            })),
            response: Arc::new(Notify::new()),
            sink: None,
            receiver: None,
            first_connect: true,
        }
    }

    pub fn with_reply_timeout(mut self, reply_timeout: Duration) -> Self {
        self.reply_timeout = reply_timeout;
        self
    }

    pub fn identity(&self) -> &ClientIdentity {
        &self.identity
    }

    pub async fn state(&self) -> ClientState {
        self.shared.lock().await.state
    }

    pub async fn connect(&mut self) -> Result<()> {
        if self.state().await != ClientState::Disconnected {
            warn!("C{} is already connected", self.label);
            return Ok(());
        }
        // a reader left over from a connection the server closed
        if let Some(receiver) = self.receiver.take() {
            receiver.abort();
        }

        let socket = match TcpStream::connect(&self.server).await {
            Ok(socket) => socket,
            Err(e) => {
                error!(
                    "C{}: Connection refused. Make sure the server is running. ({})",
                    self.label, e
                );
                return Err(e.into());
            }
        };
        let (mut sink, stream) =
            Framed::new(socket, FrameCodec::peer()).split::<PeerFrame>();
        if let Err(e) = sink
            .send(PeerFrame::Identify(self.identity.to_string()))
            .await
        {
            error!("C{}: Failed to identify to server ({})", self.label, e);
            return Err(e);
        }

        self.shared.lock().await.state = ClientState::Connected;
        info!("C{} connected to server at {}", self.label, self.server);

        self.sink = Some(sink);
        self.receiver = Some(tokio::spawn(receive_messages(
            self.label,
            stream,
            Arc::clone(&self.shared),
            Arc::clone(&self.response),
        )));
        Ok(())
    }

    pub async fn disconnect(&mut self) -> Result<()> {
        {
            let mut shared = self.shared.lock().await;
            if shared.state == ClientState::Disconnected && self.sink.is_none() {
                warn!("C{} is not connected", self.label);
                return Ok(());
            }
            shared.state = ClientState::Disconnected;
        }

        if let Some(mut sink) = self.sink.take() {
            let _ = sink.close().await;
        }
        if let Some(receiver) = self.receiver.take() {
            receiver.abort();
            let _ = receiver.await;
        }
        info!("C{} disconnected from server", self.label);
        Ok(())
    }

    /// Sends one request and waits up to the reply timeout for the answer.
    ///
    /// Returns `None` when the client was not connected or no reply came in
    /// time. A reply that shows up after the timeout is only logged by the
    /// reader.
    pub async fn send_message(&mut self, message: &str) -> Result<Option<String>> {
        {
            let mut shared = self.shared.lock().await;
            if shared.state != ClientState::Connected || self.sink.is_none() {
                warn!(
                    "C{}: Not in a state to send messages. Current state: {:?}",
                    self.label, shared.state
                );
                return Ok(None);
            }
            shared.state = ClientState::WaitingResponse;
            shared.last_reply = None;
        }
        let response = Arc::clone(&self.response);
        let notified = response.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        info!("C{} sending: {}", self.label, message);
        let sent = match self.sink.as_mut() {
            Some(sink) => sink.send(PeerFrame::Request(message.to_string())).await,
            None => Err(Error::General("no open connection".into())),
        };
        if let Err(e) = sent {
            warn!("C{}: Connection to server lost ({})", self.label, e);
            self.disconnect().await?;
            return Ok(None);
        }

        let answered = timeout(self.reply_timeout, notified).await.is_ok();

        let mut shared = self.shared.lock().await;
        if answered {
            return Ok(shared.last_reply.take());
        }
        if shared.state == ClientState::WaitingResponse {
            shared.state = ClientState::Connected;
        }
        warn!("C{}: No reply within {:?}", self.label, self.reply_timeout);
        Ok(None)
    }

    /// Interactive loop over stdin. Ends on stdin EOF.
    pub async fn run(mut self) -> Result<()> {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();

        loop {
            if self.state().await == ClientState::Disconnected {
                if self.first_connect {
                    self.first_connect = false;
                } else {
                    prompt(&format!(
                        "C{} Enter 'connect' to connect to server: ",
                        self.label
                    ))
                    .await?;
                    let Some(command) = lines.next_line().await? else {
                        break;
                    };
                    if !command.trim().eq_ignore_ascii_case("connect") {
                        continue;
                    }
                }
                // failures are logged by connect; the user may retry
                let _ = self.connect().await;
                continue;
            }

            prompt(&format!(
                "C{} Enter message (or 'exit'/'quit' to disconnect): ",
                self.label
            ))
            .await?;
            let Some(message) = lines.next_line().await? else {
                break;
            };
            match Input::parse(&message) {
                Input::Blank => continue,
                Input::Quit => self.disconnect().await?,
                Input::Message => {
                    let _ = self.send_message(&message).await?;
                }
            }
        }

        if self.state().await != ClientState::Disconnected {
            self.disconnect().await?;
        }
        Ok(())
    }
}

/// What one line typed at the message prompt asks for.
#[derive(Debug, PartialEq, Eq)]
enum Input {
    Blank,
    Quit,
    Message,
}

impl Input {
    fn parse(line: &str) -> Self {
        match line.trim().to_lowercase().as_str() {
            "" => Input::Blank,
            "exit" | "quit" => Input::Quit,
            _ => Input::Message,
        }
    }
}

async fn prompt(text: &str) -> Result<()> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(add_timestamp(text).as_bytes()).await?;
    stdout.flush().await.map_err(Error::from)
}

async fn receive_messages(
    label: u32,
    mut stream: ClientStream,
    shared: Arc<Mutex<Shared>>,
    response: Arc<Notify>,
) {
    loop {
        match stream.next().await {
            Some(Ok(message)) => {
                info!("C{} received: {}", label, message);
                let mut shared = shared.lock().await;
                if shared.state == ClientState::WaitingResponse {
                    shared.state = ClientState::Connected;
                    shared.last_reply = Some(message);
                    response.notify_waiters();
                }
            }
            Some(Err(e)) => {
                warn!("C{}: Connection to server lost ({})", label, e);
                break;
            }
            None => {
                info!("C{}: Server closed the connection", label);
                break;
            }
        }
    }

    shared.lock().await.state = ClientState::Disconnected;
    response.notify_waiters();
}
