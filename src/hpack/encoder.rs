use bytes::{BufMut, BytesMut};

use super::HeaderField;
use crate::frame::DEFAULT_SETTINGS_HEADER_TABLE_SIZE;

/// HPACK encoder.
///
/// Owned by the write loop; header blocks are encoded into the loop's
/// scratch buffer strictly in wire order.
#[derive(Debug)]
pub struct Encoder {
    /// The maximum dynamic table size the peer has allowed us.
    max_size: usize,

    /// A size update to signal at the start of the next header block.
    size_update: Option<SizeUpdate>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum SizeUpdate {
    One(usize),
    /// The size was lowered then raised within one settings window; both
    /// transitions must be signaled, smallest first (RFC 7541 §4.2).
    Two(usize, usize),
}

impl Encoder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_size: DEFAULT_SETTINGS_HEADER_TABLE_SIZE,
            size_update: None,
        }
    }

    /// Record a new maximum dynamic table size to announce to the peer.
    ///
    /// This is the hook for a HEADER_TABLE_SIZE settings change; the actual
    /// size-update instruction is emitted with the next header block.
    pub fn update_max_size(&mut self, val: usize) {
        match self.size_update {
            Some(SizeUpdate::One(old)) => {
                if val > old {
                    if old > self.max_size {
                        self.size_update = Some(SizeUpdate::One(val));
                    } else {
                        self.size_update = Some(SizeUpdate::Two(old, val));
                    }
                } else {
                    self.size_update = Some(SizeUpdate::One(val));
                }
            }
            Some(SizeUpdate::Two(min, _)) => {
                if val < min {
                    self.size_update = Some(SizeUpdate::One(val));
                } else {
                    self.size_update = Some(SizeUpdate::Two(min, val));
                }
            }
            None => {
                if val != self.max_size {
                    self.size_update = Some(SizeUpdate::One(val));
                }
            }
        }
    }

    /// Encode one header field into `dst`.
    ///
    /// Any pending dynamic-table-size update is flushed first, so it lands
    /// at the front of the block as the RFC requires.
    pub fn encode_field(&mut self, field: &HeaderField, dst: &mut BytesMut) {
        if let Some(update) = self.size_update.take() {
            match update {
                SizeUpdate::One(val) => {
                    self.max_size = val;
                    encode_size_update(val, dst);
                }
                SizeUpdate::Two(min, max) => {
                    self.max_size = max;
                    encode_size_update(min, dst);
                    encode_size_update(max, dst);
                }
            }
        }

        // Literal representation with a literal name (index 0). Sensitive
        // fields use the never-indexed form (RFC 7541 §6.2.3).
        if field.is_sensitive() {
            dst.put_u8(0x10);
        } else {
            dst.put_u8(0x00);
        }

        encode_str(field.name(), dst);
        encode_str(field.value(), dst);
    }
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new()
    }
}

fn encode_size_update(val: usize, dst: &mut BytesMut) {
    encode_int(val, 5, 0x20, dst)
}

fn encode_str(val: &[u8], dst: &mut BytesMut) {
    // Raw octets, H bit clear.
    encode_int(val.len(), 7, 0x00, dst);
    dst.put_slice(val);
}

/// Encode an integer into the given destination buffer (RFC 7541 §5.1).
fn encode_int(mut value: usize, prefix_bits: usize, first_byte: u8, dst: &mut BytesMut) {
    let limit = (1 << prefix_bits) - 1;

    if value < limit {
        dst.put_u8(first_byte | value as u8);
        return;
    }

    dst.put_u8(first_byte | limit as u8);
    value -= limit;

    while value >= 128 {
        dst.put_u8(0b1000_0000 | value as u8);
        value >>= 7;
    }

    dst.put_u8(value as u8);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(encoder: &mut Encoder, field: &HeaderField) -> BytesMut {
        let mut dst = BytesMut::new();
        encoder.encode_field(field, &mut dst);
        dst
    }

    #[test]
    fn literal_without_indexing() {
        let mut encoder = Encoder::new();
        let buf = encode(&mut encoder, &HeaderField::new("custom-key", "custom-header"));

        let mut expected = vec![0x00, 0x0a];
        expected.extend_from_slice(b"custom-key");
        expected.push(0x0d);
        expected.extend_from_slice(b"custom-header");

        assert_eq!(&buf[..], &expected[..]);
    }

    #[test]
    fn sensitive_field_is_never_indexed() {
        let mut encoder = Encoder::new();
        let buf = encode(
            &mut encoder,
            &HeaderField::new("authorization", "secret").sensitive(),
        );

        assert_eq!(buf[0], 0x10);
    }

    #[test]
    fn size_update_prefixes_next_block() {
        let mut encoder = Encoder::new();
        encoder.update_max_size(0);

        let buf = encode(&mut encoder, &HeaderField::new("a", "b"));
        assert_eq!(buf[0], 0x20);

        // Emitted once only.
        let buf = encode(&mut encoder, &HeaderField::new("a", "b"));
        assert_eq!(buf[0], 0x00);
    }

    #[test]
    fn lower_then_raise_emits_two_updates() {
        let mut encoder = Encoder::new();
        encoder.update_max_size(0);
        encoder.update_max_size(100);

        let buf = encode(&mut encoder, &HeaderField::new("a", "b"));
        // min first: 0x20 | 0, then 0x20 | 31 with 69 continuation.
        assert_eq!(buf[0], 0x20);
        assert_eq!(buf[1], 0x3f);
        assert_eq!(buf[2], 69);
    }

    #[test]
    fn same_size_is_not_signaled() {
        let mut encoder = Encoder::new();
        encoder.update_max_size(DEFAULT_SETTINGS_HEADER_TABLE_SIZE);

        let buf = encode(&mut encoder, &HeaderField::new("a", "b"));
        assert_eq!(buf[0], 0x00);
    }

    #[test]
    fn int_prefix_boundaries() {
        let mut dst = BytesMut::new();
        encode_int(30, 5, 0x20, &mut dst);
        assert_eq!(&dst[..], &[0x20 | 30]);

        let mut dst = BytesMut::new();
        encode_int(31, 5, 0x20, &mut dst);
        assert_eq!(&dst[..], &[0x3f, 0x00]);

        let mut dst = BytesMut::new();
        encode_int(1337, 5, 0x00, &mut dst);
        assert_eq!(&dst[..], &[0x1f, 0x9a, 0x0a]);
    }
}
