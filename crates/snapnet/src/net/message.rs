//! In-band message types.
//!
//! A logical message body is a run of `[type:8][payload]` records closed by
//! [`MSG_END`]. Server and client each speak their own closed set of variants.

use super::msg::{MsgReader, MsgWriter};
use super::protocol::NO_FRAME;
use crate::error::MsgError;
use crate::snapshot::SnapshotDelta;

pub const MSG_END: u8 = 0;

const MAX_BATCH_COMMANDS: usize = 1024;
const MAX_CONFIG_STRINGS: usize = 4096;
const MAX_USER_CMDS: usize = 32;

fn check_count(what: &'static str, count: usize, max: usize) -> Result<usize, MsgError> {
    if count > max {
        return Err(MsgError::OutOfRange {
            what,
            value: count as u64,
        });
    }
    Ok(count)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReliableCommand {
    pub sequence: u32,
    pub text: String,
}

/// Reliable commands plus the sender's acknowledgement of the other side's
/// stream. Every not-yet-acknowledged command rides along each time.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ReliableBatch {
    pub ack: u32,
    pub commands: Vec<ReliableCommand>,
}

impl ReliableBatch {
    fn write(&self, w: &mut MsgWriter) {
        w.write_u32(self.ack);
        w.write_u16(self.commands.len() as u16);
        for command in &self.commands {
            w.write_u32(command.sequence);
            w.write_string(&command.text);
        }
    }

    fn read(r: &mut MsgReader<'_>) -> Result<Self, MsgError> {
        let ack = r.read_u32()?;
        let count = check_count("reliable commands", r.read_u16()? as usize, MAX_BATCH_COMMANDS)?;
        let mut commands = Vec::with_capacity(count);
        for _ in 0..count {
            commands.push(ReliableCommand {
                sequence: r.read_u32()?,
                text: r.read_string()?,
            });
        }
        Ok(Self { ack, commands })
    }
}

/// One frame of client input.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UserCmd {
    pub server_time: u32,
    pub angles: [u16; 3],
    pub buttons: u16,
    pub weapon: u8,
    pub forward: i8,
    pub right: i8,
    pub up: i8,
}

impl UserCmd {
    pub const BUTTON_ATTACK: u16 = 1 << 0;
    pub const BUTTON_USE: u16 = 1 << 2;
    pub const BUTTON_WALKING: u16 = 1 << 4;

    fn write(&self, w: &mut MsgWriter) {
        w.write_u32(self.server_time);
        for angle in self.angles {
            w.write_u16(angle);
        }
        w.write_u16(self.buttons);
        w.write_u8(self.weapon);
        w.write_signed(self.forward as i32, 8);
        w.write_signed(self.right as i32, 8);
        w.write_signed(self.up as i32, 8);
    }

    fn read(r: &mut MsgReader<'_>) -> Result<Self, MsgError> {
        Ok(Self {
            server_time: r.read_u32()?,
            angles: [r.read_u16()?, r.read_u16()?, r.read_u16()?],
            buttons: r.read_u16()?,
            weapon: r.read_u8()?,
            forward: r.read_signed(8)? as i8,
            right: r.read_signed(8)? as i8,
            up: r.read_signed(8)? as i8,
        })
    }

    #[inline]
    pub fn has_button(&self, button: u16) -> bool {
        self.buttons & button != 0
    }
}

pub trait WireMessage: Sized {
    fn write(&self, w: &mut MsgWriter);
    fn read(kind: u8, r: &mut MsgReader<'_>) -> Result<Self, MsgError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    GameState {
        command_sequence: u32,
        client_slot: u16,
        config: Vec<(u16, String)>,
    },
    ReliableCommands(ReliableBatch),
    Snapshot(SnapshotDelta),
    DownloadBegin {
        file_name: String,
        size: u32,
        block_size: u16,
        block_count: u32,
    },
    DownloadBlock {
        index: u32,
        data: Vec<u8>,
    },
    DownloadRefused {
        reason: String,
    },
    Disconnect {
        reason: String,
    },
}

impl ServerMessage {
    const GAME_STATE: u8 = 1;
    const RELIABLE_COMMANDS: u8 = 2;
    const SNAPSHOT: u8 = 3;
    const DOWNLOAD_BEGIN: u8 = 4;
    const DOWNLOAD_BLOCK: u8 = 5;
    const DOWNLOAD_REFUSED: u8 = 6;
    const DISCONNECT: u8 = 7;
}

impl WireMessage for ServerMessage {
    fn write(&self, w: &mut MsgWriter) {
        match self {
            Self::GameState {
                command_sequence,
                client_slot,
                config,
            } => {
                w.write_u8(Self::GAME_STATE);
                w.write_u32(*command_sequence);
                w.write_u16(*client_slot);
                w.write_u16(config.len() as u16);
                for (index, value) in config {
                    w.write_u16(*index);
                    w.write_string(value);
                }
            }
            Self::ReliableCommands(batch) => {
                w.write_u8(Self::RELIABLE_COMMANDS);
                batch.write(w);
            }
            Self::Snapshot(delta) => {
                w.write_u8(Self::SNAPSHOT);
                delta.write(w);
            }
            Self::DownloadBegin {
                file_name,
                size,
                block_size,
                block_count,
            } => {
                w.write_u8(Self::DOWNLOAD_BEGIN);
                w.write_string(file_name);
                w.write_u32(*size);
                w.write_u16(*block_size);
                w.write_u32(*block_count);
            }
            Self::DownloadBlock { index, data } => {
                w.write_u8(Self::DOWNLOAD_BLOCK);
                w.write_u32(*index);
                w.write_u16(data.len() as u16);
                w.write_bytes(data);
            }
            Self::DownloadRefused { reason } => {
                w.write_u8(Self::DOWNLOAD_REFUSED);
                w.write_string(reason);
            }
            Self::Disconnect { reason } => {
                w.write_u8(Self::DISCONNECT);
                w.write_string(reason);
            }
        }
    }

    fn read(kind: u8, r: &mut MsgReader<'_>) -> Result<Self, MsgError> {
        Ok(match kind {
            Self::GAME_STATE => {
                let command_sequence = r.read_u32()?;
                let client_slot = r.read_u16()?;
                let count = check_count("config strings", r.read_u16()? as usize, MAX_CONFIG_STRINGS)?;
                let mut config = Vec::with_capacity(count);
                for _ in 0..count {
                    config.push((r.read_u16()?, r.read_string()?));
                }
                Self::GameState {
                    command_sequence,
                    client_slot,
                    config,
                }
            }
            Self::RELIABLE_COMMANDS => Self::ReliableCommands(ReliableBatch::read(r)?),
            Self::SNAPSHOT => Self::Snapshot(SnapshotDelta::read(r)?),
            Self::DOWNLOAD_BEGIN => Self::DownloadBegin {
                file_name: r.read_string()?,
                size: r.read_u32()?,
                block_size: r.read_u16()?,
                block_count: r.read_u32()?,
            },
            Self::DOWNLOAD_BLOCK => {
                let index = r.read_u32()?;
                let len = r.read_u16()? as usize;
                Self::DownloadBlock {
                    index,
                    data: r.read_bytes(len)?,
                }
            }
            Self::DOWNLOAD_REFUSED => Self::DownloadRefused {
                reason: r.read_string()?,
            },
            Self::DISCONNECT => Self::Disconnect {
                reason: r.read_string()?,
            },
            other => return Err(MsgError::UnknownMessage(other)),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    /// Acknowledges the newest channel sequence, reliable command and
    /// snapshot frame the client holds.
    Ack {
        message_ack: u32,
        reliable_ack: u32,
        frame_ack: Option<u32>,
    },
    ReliableCommands(ReliableBatch),
    UserCommands(Vec<UserCmd>),
    DownloadAck {
        index: u32,
    },
    Disconnect,
}

impl ClientMessage {
    const ACK: u8 = 1;
    const RELIABLE_COMMANDS: u8 = 2;
    const USER_COMMANDS: u8 = 3;
    const DOWNLOAD_ACK: u8 = 4;
    const DISCONNECT: u8 = 5;

    pub fn name(&self) -> &'static str {
        match self {
            Self::Ack { .. } => "ack",
            Self::ReliableCommands(_) => "reliable commands",
            Self::UserCommands(_) => "user commands",
            Self::DownloadAck { .. } => "download ack",
            Self::Disconnect => "disconnect",
        }
    }
}

impl WireMessage for ClientMessage {
    fn write(&self, w: &mut MsgWriter) {
        match self {
            Self::Ack {
                message_ack,
                reliable_ack,
                frame_ack,
            } => {
                w.write_u8(Self::ACK);
                w.write_u32(*message_ack);
                w.write_u32(*reliable_ack);
                w.write_u32(frame_ack.unwrap_or(NO_FRAME));
            }
            Self::ReliableCommands(batch) => {
                w.write_u8(Self::RELIABLE_COMMANDS);
                batch.write(w);
            }
            Self::UserCommands(cmds) => {
                w.write_u8(Self::USER_COMMANDS);
                w.write_u8(cmds.len() as u8);
                for cmd in cmds {
                    cmd.write(w);
                }
            }
            Self::DownloadAck { index } => {
                w.write_u8(Self::DOWNLOAD_ACK);
                w.write_u32(*index);
            }
            Self::Disconnect => w.write_u8(Self::DISCONNECT),
        }
    }

    fn read(kind: u8, r: &mut MsgReader<'_>) -> Result<Self, MsgError> {
        Ok(match kind {
            Self::ACK => Self::Ack {
                message_ack: r.read_u32()?,
                reliable_ack: r.read_u32()?,
                frame_ack: match r.read_u32()? {
                    NO_FRAME => None,
                    f => Some(f),
                },
            },
            Self::RELIABLE_COMMANDS => Self::ReliableCommands(ReliableBatch::read(r)?),
            Self::USER_COMMANDS => {
                let count = check_count("user commands", r.read_u8()? as usize, MAX_USER_CMDS)?;
                let mut cmds = Vec::with_capacity(count);
                for _ in 0..count {
                    cmds.push(UserCmd::read(r)?);
                }
                Self::UserCommands(cmds)
            }
            Self::DOWNLOAD_ACK => Self::DownloadAck {
                index: r.read_u32()?,
            },
            Self::DISCONNECT => Self::Disconnect,
            other => return Err(MsgError::UnknownMessage(other)),
        })
    }
}

/// Serializes messages into one logical message body.
pub fn encode_body<M: WireMessage>(messages: &[M]) -> Vec<u8> {
    let mut w = MsgWriter::new();
    for message in messages {
        message.write(&mut w);
    }
    w.write_u8(MSG_END);
    w.into_bytes()
}

/// Incremental body builder, used where the sender needs to watch the size
/// while deciding what else fits.
#[derive(Debug, Default)]
pub struct BodyWriter {
    w: MsgWriter,
}

impl BodyWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push<M: WireMessage>(&mut self, message: &M) {
        message.write(&mut self.w);
    }

    /// Bytes used so far, not counting the end marker.
    pub fn len(&self) -> usize {
        self.w.byte_len()
    }

    pub fn is_empty(&self) -> bool {
        self.w.is_empty()
    }

    pub fn finish(mut self) -> Vec<u8> {
        self.w.write_u8(MSG_END);
        self.w.into_bytes()
    }
}

pub fn decode_body<M: WireMessage>(body: &[u8]) -> Result<Vec<M>, MsgError> {
    let mut r = MsgReader::new(body);
    let mut messages = Vec::new();
    loop {
        let kind = r.read_u8()?;
        if kind == MSG_END {
            return Ok(messages);
        }
        messages.push(M::read(kind, &mut r)?);
    }
}
