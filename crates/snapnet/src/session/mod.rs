mod client;
mod config;
mod connection;
mod download;
mod events;
mod host;
mod reliable;
mod state;

pub use client::{ClientEvent, ClientPhase, ClientSession};
pub use config::SessionConfig;
pub use connection::{ActiveDownload, Connection};
pub use download::{BlockReader, DownloadWindow, FileSource, MemoryFiles, validate_path};
pub use events::{DisconnectReason, SessionHostEvent};
pub use host::{SessionHost, SnapshotSource};
pub use reliable::{CommandSequencer, ReliableQueue};
pub use state::{SessionEvent, SessionState};
