/// A setting identifier together with its u32 value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Setting {
    pub id: SettingId,
    pub value: u32,
}

/// Identifiers of the settings that can be carried in a SETTINGS frame.
///
/// Each setting has a value that is a 32 bit unsigned integer (6.5.1.).
///
/// See <https://datatracker.ietf.org/doc/html/rfc9113#name-defined-settings>.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SettingId {
    /// Informs the remote endpoint of the maximum size of the compression
    /// table used to decode field blocks, in units of octets. The initial
    /// value is 4,096 octets.
    HeaderTableSize,
    /// Enables or disables server push. The initial value is 1.
    EnablePush,
    /// The maximum number of concurrent streams that the sender will allow.
    MaxConcurrentStreams,
    /// The sender's initial window size (in units of octets) for
    /// stream-level flow control. The initial value is 2^16-1 (65,535).
    InitialWindowSize,
    /// The size of the largest frame payload that the sender is willing to
    /// receive, in units of octets. The initial value is 2^14 (16,384).
    MaxFrameSize,
    /// Advisory maximum field section size the sender is prepared to
    /// accept, in units of octets.
    MaxHeaderListSize,
    /// Enables support for the Extended CONNECT protocol defined in
    /// [RFC 8441].
    ///
    /// [RFC 8441]: https://datatracker.ietf.org/doc/html/rfc8441
    EnableConnectProtocol,
    /// A setting this endpoint does not interpret. Carried for the peer's
    /// benefit, applied by no one.
    Unknown(u16),
}

impl SettingId {
    #[must_use]
    pub fn new(id: u16) -> Self {
        match id {
            0x0001 => Self::HeaderTableSize,
            0x0002 => Self::EnablePush,
            0x0003 => Self::MaxConcurrentStreams,
            0x0004 => Self::InitialWindowSize,
            0x0005 => Self::MaxFrameSize,
            0x0006 => Self::MaxHeaderListSize,
            0x0008 => Self::EnableConnectProtocol,
            other => Self::Unknown(other),
        }
    }
}

impl From<u16> for SettingId {
    fn from(src: u16) -> Self {
        Self::new(src)
    }
}

impl From<SettingId> for u16 {
    fn from(src: SettingId) -> Self {
        match src {
            SettingId::HeaderTableSize => 0x0001,
            SettingId::EnablePush => 0x0002,
            SettingId::MaxConcurrentStreams => 0x0003,
            SettingId::InitialWindowSize => 0x0004,
            SettingId::MaxFrameSize => 0x0005,
            SettingId::MaxHeaderListSize => 0x0006,
            SettingId::EnableConnectProtocol => 0x0008,
            SettingId::Unknown(other) => other,
        }
    }
}

impl Setting {
    /// Creates a new [`Setting`] with the variant corresponding to the given
    /// setting id, based on the settings IDs defined in section 6.5.2.
    pub fn new(id: impl Into<SettingId>, value: u32) -> Self {
        Self {
            id: id.into(),
            value,
        }
    }
}
