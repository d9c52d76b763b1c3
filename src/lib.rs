pub mod client;
pub mod error;
pub mod lfd;
pub mod protocol;
pub mod server;
pub mod tracer;

pub use error::{Error, Result};
