use std::fmt;

use bytes::Bytes;

/// A single header field ready for HPACK encoding.
///
/// Pseudo-headers are ordinary fields here; whoever builds the list is
/// responsible for putting them first and for lowercasing names, per RFC
/// 9113 §8.2. Sensitive fields are encoded never-indexed so intermediaries
/// won't remember them.
#[derive(Clone, Eq, PartialEq)]
pub struct HeaderField {
    name: Bytes,
    value: Bytes,
    sensitive: bool,
}

impl HeaderField {
    pub fn new(name: impl Into<Bytes>, value: impl Into<Bytes>) -> Self {
        let name = name.into();
        debug_assert!(
            !name.iter().any(u8::is_ascii_uppercase),
            "header names must be lowercase"
        );
        Self {
            name,
            value: value.into(),
            sensitive: false,
        }
    }

    #[must_use]
    pub fn sensitive(mut self) -> Self {
        self.sensitive = true;
        self
    }

    #[must_use]
    pub fn name(&self) -> &[u8] {
        &self.name
    }

    #[must_use]
    pub fn value(&self) -> &[u8] {
        &self.value
    }

    #[must_use]
    pub fn is_sensitive(&self) -> bool {
        self.sensitive
    }

    /// The size of an entry per RFC 7541 §4.1: name + value + 32 octets.
    #[must_use]
    pub fn size(&self) -> usize {
        self.name.len() + self.value.len() + 32
    }
}

impl fmt::Debug for HeaderField {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut builder = f.debug_struct("HeaderField");
        builder.field("name", &String::from_utf8_lossy(&self.name));

        if self.sensitive {
            builder.field("value", &"{sensitive}");
        } else {
            builder.field("value", &String::from_utf8_lossy(&self.value));
        }

        builder.finish()
    }
}
