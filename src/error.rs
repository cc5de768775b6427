use std::{error, fmt, io};

/// Errors surfaced by the send path.
///
/// `ConnClosing` is a benign sentinel: it marks an orderly shutdown and is
/// translated to `Ok(())` at the top of [`WriteLoop::run`]. Everything else
/// is connection-fatal and the caller is expected to tear the transport
/// down.
///
/// [`WriteLoop::run`]: crate::proto::WriteLoop::run
#[derive(Debug)]
pub enum Error {
    /// The transport is shutting down and no longer accepts writes.
    ConnClosing,

    /// An `io::Error` occurred while flushing to the underlying transport.
    Io(io::Error),

    /// A frame payload exceeded the maximum size the wire format allows.
    PayloadTooBig,
}

impl Error {
    /// Returns true if this is the orderly-shutdown sentinel.
    pub fn is_conn_closing(&self) -> bool {
        matches!(self, Self::ConnClosing)
    }

    /// Returns the error if the error is an io::Error
    pub fn get_io(&self) -> Option<&io::Error> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(src: io::Error) -> Self {
        Self::Io(src)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::ConnClosing => fmt.write_str("transport is closing"),
            Self::Io(e) => e.fmt(fmt),
            Self::PayloadTooBig => fmt.write_str("frame payload too big"),
        }
    }
}

impl error::Error for Error {}
