use crate::{Error, Result};
use bytes::{BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use uuid::Uuid;

pub const IDENTIFY_PREFIX: &str = "IDENTIFY:";
pub const WATCHDOG_TOKEN: &str = "LFD";
pub const LFD_ACCEPTED: &str = "LFD_ACCEPTED";
pub const LFD_REFUSED: &str = "LFD_REFUSED";
pub const HEARTBEAT: &str = "HEARTBEAT";
pub const ALIVE: &str = "ALIVE";

/// Upper bound of a single frame.
pub const MAX_FRAME_LEN: usize = 1024;

/// Durable token a client process presents on every (re)connection.
#[derive(derive_more::Display, Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientIdentity(String);

impl ClientIdentity {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn parse(token: &str) -> Result<Self> {
        let token = token.trim();
        if token.is_empty() {
            return Err(Error::InvalidProtocol(
                "client identity must not be empty".into(),
            ));
        }
        Ok(Self(token.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Server-assigned short name of a client, stable for the whole server run.
#[derive(derive_more::Display, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[display("C{}", _0)]
pub struct ClientHandle(u64);

impl ClientHandle {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

/// Role a connection announces in its first frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identification {
    Watchdog,
    Client(ClientIdentity),
}

/// Parses `IDENTIFY:<token>`. The token ends at the next `:` if any.
pub fn parse_identification(frame: &str) -> Result<Identification> {
    let rest = frame.strip_prefix(IDENTIFY_PREFIX).ok_or_else(|| {
        Error::InvalidProtocol(format!("expected identification, got {:?}", frame))
    })?;
    let token = rest.split(':').next().unwrap_or_default().trim();

    if token == WATCHDOG_TOKEN {
        return Ok(Identification::Watchdog);
    }
    Ok(Identification::Client(ClientIdentity::parse(token)?))
}

// frames sent by clients and the watchdog
#[derive(derive_more::Display, Debug, Clone, PartialEq, Eq)]
pub enum PeerFrame {
    #[display("IDENTIFY:{}", _0)]
    Identify(String),
    #[display("HEARTBEAT")]
    Heartbeat,
    #[display("{}", _0)]
    Request(String),
}

// frames sent by the server
#[derive(derive_more::Display, Debug, Clone, PartialEq, Eq)]
pub enum ServerFrame {
    #[display("LFD_ACCEPTED")]
    LfdAccepted,
    #[display("LFD_REFUSED")]
    LfdRefused,
    #[display("ALIVE")]
    Alive,
    #[display("Server reply to {}: {}. Current state: {}", handle, text, state)]
    Reply {
        handle: ClientHandle,
        text: String,
        state: u64,
    },
}

impl ServerFrame {
    pub fn reply(handle: ClientHandle, request: &str, state: u64) -> Self {
        ServerFrame::Reply {
            handle,
            text: request.to_uppercase(),
            state,
        }
    }
}

/// How a connection's incoming bytes are cut into frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// Decided by the first frame: a `\n`-terminated one switches to `Lines`,
    /// anything else to `Reads`.
    Undecided,
    /// A frame ends at `\n`. Partial lines wait for more bytes.
    Lines,
    /// A frame ends at `\n` if one is buffered, otherwise whatever a single
    /// read delivered is one frame.
    Reads,
}

/// Text framing shared by every role. No frame is longer than
/// [`MAX_FRAME_LEN`] bytes in any mode.
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    delimit_outgoing: bool,
    framing: Framing,
}

impl FrameCodec {
    /// Writes frames as-is, byte compatible with undelimited peers. Incoming
    /// framing follows the identification frame.
    pub fn server() -> Self {
        Self {
            delimit_outgoing: false,
            framing: Framing::Undecided,
        }
    }

    /// Terminates outgoing frames with `\n` so back-to-back sends never merge.
    /// The server does not delimit, so incoming frames are read-sized.
    pub fn peer() -> Self {
        Self {
            delimit_outgoing: true,
            framing: Framing::Reads,
        }
    }

    pub fn framing(&self) -> Framing {
        self.framing
    }

    fn put(&self, text: String, dst: &mut BytesMut) {
        dst.reserve(text.len() + 1);
        dst.put_slice(text.as_bytes());
        if self.delimit_outgoing {
            dst.put_u8(b'\n');
        }
    }
}

fn take_frame(src: &mut BytesMut, end: usize) -> String {
    let raw = src.split_to(end);
    String::from_utf8_lossy(&raw)
        .trim_end_matches(['\r', '\n'])
        .to_string()
}

impl Decoder for FrameCodec {
    type Item = String;
    type Error = crate::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        if src.is_empty() {
            return Ok(None);
        }
        let window = src.len().min(MAX_FRAME_LEN);
        let newline = src[..window].iter().position(|b| *b == b'\n');

        let end = match (newline, self.framing) {
            (Some(newline), _) => newline + 1,
            // an overlong line is cut at the cap, the remainder follows
            (None, Framing::Lines) if src.len() >= MAX_FRAME_LEN => MAX_FRAME_LEN,
            (None, Framing::Lines) => return Ok(None),
            (None, Framing::Undecided | Framing::Reads) => window,
        };

        if self.framing == Framing::Undecided {
            self.framing = if newline.is_some() {
                Framing::Lines
            } else {
                Framing::Reads
            };
        }
        Ok(Some(take_frame(src, end)))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            // unterminated last line of a closing peer
            None if !src.is_empty() => {
                let end = src.len();
                Ok(Some(take_frame(src, end)))
            }
            None => Ok(None),
        }
    }
}

impl Encoder<ServerFrame> for FrameCodec {
    type Error = crate::Error;

    fn encode(&mut self, item: ServerFrame, dst: &mut BytesMut) -> Result<()> {
        self.put(item.to_string(), dst);
        Ok(())
    }
}

impl Encoder<PeerFrame> for FrameCodec {
    type Error = crate::Error;

    fn encode(&mut self, item: PeerFrame, dst: &mut BytesMut) -> Result<()> {
        self.put(item.to_string(), dst);
        Ok(())
    }
}
