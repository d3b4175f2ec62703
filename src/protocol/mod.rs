//! Wire protocol: event model and binary frame codec

pub mod codec;
pub mod event;

/// Protocol version announced in `MetaVersion` replies
pub const PROTOCOL_VERSION: u8 = 2;

/// Oldest protocol version still tolerated. Version 1 clients predate the
/// meta messages entirely and simply never send them.
pub const MIN_PROTOCOL_VERSION: u8 = 1;
