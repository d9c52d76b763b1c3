pub type Result<T> = core::result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
    General(String),
    Io(std::io::Error),
    InvalidProtocol(String),
}

impl core::fmt::Display for Error {
    fn fmt(&self, fmt: &mut core::fmt::Formatter) -> core::result::Result<(), core::fmt::Error> {
        match self {
            Error::General(msg) => write!(fmt, "{msg}"),
            Error::Io(e) => write!(fmt, "io error: {e}"),
            Error::InvalidProtocol(msg) => write!(fmt, "invalid protocol: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}
