use std::net::SocketAddr;

use crate::net::UserCmd;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionHostEvent {
    ClientConnected {
        slot: u16,
        addr: SocketAddr,
        name: String,
    },
    ClientEnteredGame {
        slot: u16,
    },
    /// A reliable command from the client that the session layer does not
    /// handle itself.
    ClientCommand {
        slot: u16,
        text: String,
    },
    UserCommand {
        slot: u16,
        cmd: UserCmd,
    },
    ClientDisconnected {
        slot: u16,
        reason: DisconnectReason,
    },
    ConnectionDenied {
        addr: SocketAddr,
        reason: String,
    },
    DownloadStarted {
        slot: u16,
        name: String,
        blocks: u32,
    },
    DownloadFinished {
        slot: u16,
        name: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    Graceful,
    Timeout,
    Kicked,
    Overflowed,
    Reconnected,
}

impl DisconnectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisconnectReason::Graceful => "disconnected",
            DisconnectReason::Timeout => "timed out",
            DisconnectReason::Kicked => "kicked",
            DisconnectReason::Overflowed => "reliable command overflow",
            DisconnectReason::Reconnected => "reconnected",
        }
    }
}
