mod framer;

pub use self::framer::Framer;

/// Initialize the connection with this much write buffer.
///
/// The framer flushes on its own once the buffer grows past this, keeping
/// memory bounded when the peer grants a large window all at once.
pub(crate) const DEFAULT_WRITE_BUFFER_SIZE: usize = 32 * 1_024;
