mod channel;
mod endpoint;
mod handshake;
mod message;
mod msg;
pub mod protocol;
mod stats;
mod tracking;

pub use channel::{CHANNEL_HEADER, FRAGMENT_OVERHEAD, NetChannel, Transmit, challenge_checksum};
pub use endpoint::{Datagram, NetworkEndpoint};
pub use handshake::{HandshakePacket, is_connectionless};
pub use message::{
    BodyWriter, ClientMessage, MSG_END, ReliableBatch, ReliableCommand, ServerMessage, UserCmd,
    WireMessage, decode_body, encode_body,
};
pub use msg::{MAX_STRING_LEN, MsgReader, MsgWriter};
pub use protocol::{
    DEFAULT_PORT, DEFAULT_TICK_RATE, FRAGMENT_SIZE, MAX_DATAGRAM_SIZE, MAX_ENTITIES, MAX_MSG_LEN,
    NO_FRAME, PROTOCOL_VERSION, channel_sequence_newer,
};
pub use stats::{BandwidthWindow, NetworkStats, PacketLossSimulation};
pub use tracking::{PendingPacket, RttTracker};
