//! The send half of the connection: control buffer, write loop, and their
//! supporting structures.

mod bdp;
mod buffer;
mod control;
mod quota;
mod store;
mod write_loop;

pub use self::bdp::{BDP_PING_DATA, BdpEstimator};
pub use self::control::{
    CleanupStream, Control, ControlBuffer, DataFrame, GoAway, HeaderFrame, IncomingGoAway,
    IncomingSettings, IncomingWindowUpdate, InitStreamFn, OnDoneFn, OnEachWriteFn, OnOrphanedFn,
    OnWriteFn, OutFlowControlSizeRequest, OutgoingSettings, OutgoingWindowUpdate, Ping,
    RegisterStream,
};
pub use self::quota::WriteQuota;
pub use self::write_loop::{EventSink, GoAwayHandler, MuxEvent, WriteLoop};

/// Which end of the connection this transport is.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Side {
    Client,
    Server,
}
