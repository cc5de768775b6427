//! Header compression for the send path.
//!
//! The encoder is deliberately minimal: it emits literal representations
//! only and never inserts into the dynamic table (a choice RFC 7541 leaves
//! to the encoder), so the only stateful part is the pending
//! dynamic-table-size update required after a HEADER_TABLE_SIZE settings
//! change. What matters for correctness is that this state advances in
//! exactly the order header blocks hit the wire, which the single-writer
//! loop guarantees.

mod encoder;
mod header;

pub use self::encoder::Encoder;
pub use self::header::HeaderField;
