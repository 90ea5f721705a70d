use rkyv::rancor;

use crate::session::SessionState;

/// Per-connection failure modes. None of these is fatal to the server; the
/// worst outcome is that a single connection is dropped.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("{message} is not legal while {state:?}")]
    ProtocolViolation {
        state: SessionState,
        message: &'static str,
    },
    #[error("sequence {received} does not follow {last}")]
    SequenceRegression { received: u32, last: u32 },
    #[error("datagram {sequence} fails the connection challenge check")]
    ChallengeMismatch { sequence: u32 },
    #[error("{size} byte message exceeds channel limit of {limit}")]
    MessageTooLarge { size: usize, limit: usize },
    #[error("reliable command backlog full ({pending} commands, {bytes} bytes)")]
    QueueFull { pending: usize, bytes: usize },
    #[error("baseline frame {frame} is no longer held")]
    BaselineExpired { frame: u32 },
    #[error("no traffic within {millis}ms")]
    Timeout { millis: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MsgError {
    #[error("read past end of message ({needed} bits wanted, {remaining} left)")]
    Overrun { needed: usize, remaining: usize },
    #[error("string of {len} bytes exceeds {max}")]
    StringTooLong { len: usize, max: usize },
    #[error("string is not valid utf-8")]
    InvalidString,
    #[error("unknown message type {0}")]
    UnknownMessage(u8),
    #[error("{what} out of range: {value}")]
    OutOfRange { what: &'static str, value: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeltaError {
    #[error("delta references baseline frame {expected:?}, decoder holds {held:?}")]
    BaselineMismatch {
        expected: Option<u32>,
        held: Option<u32>,
    },
    #[error("entity {0} listed out of order")]
    Unsorted(u16),
    #[error("entity {0} updated or removed but not present in baseline")]
    NotInBaseline(u16),
    #[error("entity {0} added but already present in baseline")]
    AlreadyInBaseline(u16),
    #[error(transparent)]
    Msg(#[from] MsgError),
}

#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("file not found: {0}")]
    NotFound(String),
    #[error("refusing path {0}")]
    IllegalPath(String),
    #[error("file {name} is {size} bytes, limit is {limit}")]
    TooLarge { name: String, size: u64, limit: u64 },
    #[error("block {index} outside transfer of {count} blocks")]
    BlockOutOfRange { index: u32, count: u32 },
    #[error("read failed: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum HandshakeError {
    #[error("serialization failed: {0}")]
    Serialize(rancor::Error),
    #[error("deserialization failed: {0}")]
    Deserialize(rancor::Error),
    #[error("not a connectionless packet")]
    NotConnectionless,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{field} must be non-zero")]
    Zero { field: &'static str },
    #[error("{field} = {value} exceeds {max}")]
    TooLarge {
        field: &'static str,
        value: usize,
        max: usize,
    },
    #[error("fragment size {fragment} does not fit datagram size {datagram}")]
    FragmentSize { fragment: usize, datagram: usize },
}
