//! Error type shared across the Aquila crates.

use core::fmt;

#[cfg(not(feature = "std"))]
use alloc::string::String;

use crate::reason::ReasonCode;

#[derive(Debug)]
pub enum Error {
    /// More bytes are needed before a full packet can be parsed.
    Incomplete,

    /// I/O error (only available with the `std` feature).
    #[cfg(feature = "std")]
    Io(std::io::Error),

    /// Protocol violation carrying the MQTT reason code to report.
    Protocol(ReasonCode),

    /// Offline store failure.
    Store(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Incomplete => write!(f, "packet is not complete"),
            #[cfg(feature = "std")]
            Error::Io(e) => write!(f, "i/o error: {}", e),
            Error::Protocol(code) => write!(f, "protocol error: {}", code),
            Error::Store(msg) => write!(f, "store error: {}", msg),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

#[cfg(feature = "std")]
impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<ReasonCode> for Error {
    fn from(code: ReasonCode) -> Self {
        Error::Protocol(code)
    }
}
