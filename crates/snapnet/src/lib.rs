pub mod error;
pub mod net;
pub mod session;
pub mod snapshot;

pub use error::{ConfigError, DeltaError, DownloadError, HandshakeError, MsgError, SessionError};
pub use net::{
    ClientMessage, DEFAULT_PORT, DEFAULT_TICK_RATE, Datagram, HandshakePacket, NetChannel,
    NetworkEndpoint, NetworkStats, PROTOCOL_VERSION, PacketLossSimulation, ServerMessage, UserCmd,
};
pub use session::{
    BlockReader, ClientEvent, ClientPhase, ClientSession, DisconnectReason, DownloadWindow,
    FileSource, MemoryFiles, ReliableQueue, SessionConfig, SessionHost, SessionHostEvent,
    SessionState, SnapshotSource,
};
pub use snapshot::{Entity, EntityState, EntityType, PlayerState, Snapshot, SnapshotRing};
