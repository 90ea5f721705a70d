use std::collections::{BTreeMap, VecDeque};
use std::time::{Duration, Instant};

use super::reliable::{CommandSequencer, ReliableQueue};
use crate::error::SessionError;
use crate::net::{
    BodyWriter, ClientMessage, HandshakePacket, NetChannel, PROTOCOL_VERSION, ServerMessage,
    UserCmd, decode_body, is_connectionless,
};
use crate::snapshot::{self, Snapshot, SnapshotDelta};

const HANDSHAKE_RETRY: Duration = Duration::from_secs(1);
const USERCMD_BACKUP: usize = 3;
const SNAPSHOT_HISTORY: usize = 32;
const RELIABLE_CAPACITY: usize = 128;
const RELIABLE_BYTES: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientPhase {
    Idle,
    Challenging,
    Connecting { challenge: u64 },
    Connected { slot: u16 },
    Disconnected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    Connected { slot: u16 },
    Denied { reason: String },
    GameState,
    Command(String),
    Snapshot { frame: u32, full: bool },
    DownloadComplete { name: String, data: Vec<u8> },
    DownloadRefused { reason: String },
    Disconnected { reason: String },
}

#[derive(Debug)]
struct IncomingDownload {
    name: String,
    size: usize,
    block_size: usize,
    blocks: Vec<Option<Vec<u8>>>,
    received: usize,
}

impl IncomingDownload {
    fn is_complete(&self) -> bool {
        self.received == self.blocks.len()
    }

    fn assemble(self) -> Vec<u8> {
        let mut data: Vec<u8> = self.blocks.into_iter().flatten().flatten().collect();
        data.truncate(self.size);
        data
    }
}

/// Client end of the session protocol, without a socket.
///
/// Feed it server datagrams with [`ClientSession::handle_datagram`] and call
/// [`ClientSession::send`] once per client frame for the datagrams to put on
/// the wire. Used by the integration tests and handy for bots.
#[derive(Debug)]
pub struct ClientSession {
    name: String,
    rate: u32,
    phase: ClientPhase,
    last_attempt: Option<Instant>,
    channel: NetChannel,
    reliable: ReliableQueue,
    commands: CommandSequencer,
    config: BTreeMap<u16, String>,
    has_gamestate: bool,
    history: VecDeque<Snapshot>,
    usercmds: VecDeque<UserCmd>,
    download: Option<IncomingDownload>,
    download_acks: Vec<u32>,
    events: VecDeque<ClientEvent>,
}

impl ClientSession {
    pub fn new(name: impl Into<String>, rate: u32) -> Self {
        Self {
            name: name.into(),
            rate,
            phase: ClientPhase::Idle,
            last_attempt: None,
            channel: NetChannel::default(),
            reliable: ReliableQueue::new(RELIABLE_CAPACITY, RELIABLE_BYTES),
            commands: CommandSequencer::new(),
            config: BTreeMap::new(),
            has_gamestate: false,
            history: VecDeque::with_capacity(SNAPSHOT_HISTORY),
            usercmds: VecDeque::with_capacity(USERCMD_BACKUP),
            download: None,
            download_acks: Vec::new(),
            events: VecDeque::new(),
        }
    }

    /// Starts (or restarts) the handshake; the next [`ClientSession::send`]
    /// asks for a challenge.
    pub fn connect(&mut self) {
        let name = std::mem::take(&mut self.name);
        *self = Self::new(name, self.rate);
        self.phase = ClientPhase::Challenging;
    }

    pub fn phase(&self) -> ClientPhase {
        self.phase
    }

    pub fn slot(&self) -> Option<u16> {
        match self.phase {
            ClientPhase::Connected { slot } => Some(slot),
            _ => None,
        }
    }

    pub fn has_gamestate(&self) -> bool {
        self.has_gamestate
    }

    pub fn config_string(&self, index: u16) -> Option<&str> {
        self.config.get(&index).map(String::as_str)
    }

    pub fn latest_snapshot(&self) -> Option<&Snapshot> {
        self.history.back()
    }

    pub fn channel(&self) -> &NetChannel {
        &self.channel
    }

    pub fn drain_events(&mut self) -> impl Iterator<Item = ClientEvent> + '_ {
        self.events.drain(..)
    }

    pub fn queue_command(&mut self, text: impl Into<String>) -> Result<u32, SessionError> {
        self.reliable.enqueue(text)
    }

    pub fn request_download(&mut self, name: &str) -> Result<u32, SessionError> {
        self.queue_command(format!("download {name}"))
    }

    /// Adds a frame of input. The last few are resent with every packet.
    pub fn push_usercmd(&mut self, cmd: UserCmd) {
        if self.usercmds.len() == USERCMD_BACKUP {
            self.usercmds.pop_front();
        }
        self.usercmds.push_back(cmd);
    }

    pub fn handle_datagram(&mut self, data: &[u8], now: Instant) {
        if is_connectionless(data) {
            match HandshakePacket::decode(data) {
                Ok(packet) => self.handle_handshake(packet),
                Err(e) => log::debug!("bad connectionless packet: {}", e),
            }
            return;
        }

        if !matches!(self.phase, ClientPhase::Connected { .. }) {
            return;
        }

        let body = match self.channel.process(data, now) {
            Ok(Some(body)) => body,
            Ok(None) => return,
            Err(e) => {
                log::debug!("{}", e);
                return;
            }
        };

        match decode_body::<ServerMessage>(&body) {
            Ok(messages) => {
                for message in messages {
                    self.execute(message);
                }
            }
            Err(e) => log::debug!("undecodable server message: {}", e),
        }
    }

    fn handle_handshake(&mut self, packet: HandshakePacket) {
        match (self.phase, packet) {
            (ClientPhase::Challenging, HandshakePacket::Challenge { challenge }) => {
                self.phase = ClientPhase::Connecting { challenge };
                self.last_attempt = None;
            }
            (ClientPhase::Connecting { challenge }, HandshakePacket::ConnectResponse { slot }) => {
                log::info!("connected as slot {}", slot);
                self.channel.reset_with_challenge(challenge);
                self.phase = ClientPhase::Connected { slot };
                self.events.push_back(ClientEvent::Connected { slot });
            }
            (ClientPhase::Challenging | ClientPhase::Connecting { .. }, HandshakePacket::Denied { reason }) => {
                log::info!("connection denied: {}", reason);
                self.phase = ClientPhase::Idle;
                self.events.push_back(ClientEvent::Denied { reason });
            }
            (_, other) => log::debug!("ignoring {:?}", other),
        }
    }

    fn execute(&mut self, message: ServerMessage) {
        match message {
            ServerMessage::GameState {
                command_sequence,
                config,
                ..
            } => {
                self.commands.skip_to(command_sequence);
                self.config = config.into_iter().collect();
                if !self.has_gamestate {
                    self.has_gamestate = true;
                    self.events.push_back(ClientEvent::GameState);
                }
            }
            ServerMessage::ReliableCommands(batch) => {
                self.reliable.acknowledge(batch.ack);
                let texts: Vec<String> = self
                    .commands
                    .accept(&batch)
                    .into_iter()
                    .map(|c| c.text.clone())
                    .collect();
                for text in texts {
                    self.server_command(text);
                }
            }
            ServerMessage::Snapshot(delta) => self.receive_snapshot(&delta),
            ServerMessage::DownloadBegin {
                file_name,
                size,
                block_size,
                block_count,
            } => {
                if self.download.as_ref().is_some_and(|d| d.name == file_name) {
                    return;
                }
                if block_count == 0 {
                    self.events.push_back(ClientEvent::DownloadComplete {
                        name: file_name,
                        data: Vec::new(),
                    });
                    return;
                }
                self.download = Some(IncomingDownload {
                    name: file_name,
                    size: size as usize,
                    block_size: block_size as usize,
                    blocks: vec![None; block_count as usize],
                    received: 0,
                });
            }
            ServerMessage::DownloadBlock { index, data } => self.receive_block(index, data),
            ServerMessage::DownloadRefused { reason } => {
                self.download = None;
                self.events.push_back(ClientEvent::DownloadRefused { reason });
            }
            ServerMessage::Disconnect { reason } => {
                log::info!("server disconnected us: {}", reason);
                self.phase = ClientPhase::Disconnected;
                self.events.push_back(ClientEvent::Disconnected { reason });
            }
        }
    }

    fn server_command(&mut self, text: String) {
        if let Some(rest) = text.strip_prefix("cs ") {
            if let Some((index, value)) = rest.split_once(' ') {
                if let Ok(index) = index.parse::<u16>() {
                    self.config.insert(index, value.to_string());
                }
            }
        }
        self.events.push_back(ClientEvent::Command(text));
    }

    /// Decodes against the frame the delta names. A delta whose baseline we
    /// no longer hold is dropped and left unacknowledged, which makes the
    /// server fall back to a full snapshot.
    fn receive_snapshot(&mut self, delta: &SnapshotDelta) {
        if self
            .history
            .back()
            .is_some_and(|latest| delta.frame <= latest.frame())
        {
            return;
        }

        let baseline = delta
            .baseline_frame
            .and_then(|frame| self.history.iter().find(|s| s.frame() == frame));

        match snapshot::decode(baseline, delta) {
            Ok(decoded) => {
                if self.history.len() == SNAPSHOT_HISTORY {
                    self.history.pop_front();
                }
                self.events.push_back(ClientEvent::Snapshot {
                    frame: decoded.frame(),
                    full: delta.is_full(),
                });
                self.history.push_back(decoded);
            }
            Err(e) => log::debug!("dropping snapshot {}: {}", delta.frame, e),
        }
    }

    fn receive_block(&mut self, index: u32, data: Vec<u8>) {
        let Some(download) = self.download.as_mut() else {
            return;
        };
        let Some(slot) = download.blocks.get_mut(index as usize) else {
            log::debug!("block {} outside transfer", index);
            return;
        };
        if data.len() > download.block_size {
            log::debug!("oversized block {}", index);
            return;
        }

        // acks for duplicates too, the first one may have been lost
        self.download_acks.push(index);
        if slot.is_none() {
            *slot = Some(data);
            download.received += 1;
        }

        if download.is_complete() {
            if let Some(done) = self.download.take() {
                let name = done.name.clone();
                log::info!("download of {} complete", name);
                self.events.push_back(ClientEvent::DownloadComplete {
                    name,
                    data: done.assemble(),
                });
            }
        }
    }

    /// Datagrams to send this frame: handshake retries before the slot is
    /// assigned, one sequenced packet per call afterwards.
    pub fn send(&mut self, now: Instant) -> Vec<Vec<u8>> {
        let retry_due = self
            .last_attempt
            .is_none_or(|at| now.saturating_duration_since(at) >= HANDSHAKE_RETRY);

        let packet = match self.phase {
            ClientPhase::Challenging if retry_due => HandshakePacket::GetChallenge {
                protocol: PROTOCOL_VERSION,
            },
            ClientPhase::Connecting { challenge } if retry_due => HandshakePacket::Connect {
                protocol: PROTOCOL_VERSION,
                challenge,
                name: self.name.clone(),
                rate: self.rate,
            },
            ClientPhase::Connected { .. } => return self.send_packet(now),
            _ => return Vec::new(),
        };

        self.last_attempt = Some(now);
        match packet.encode() {
            Ok(data) => vec![data],
            Err(e) => {
                log::warn!("failed to encode handshake: {}", e);
                Vec::new()
            }
        }
    }

    fn send_packet(&mut self, now: Instant) -> Vec<Vec<u8>> {
        let mut body = BodyWriter::new();
        body.push(&ClientMessage::Ack {
            message_ack: self.channel.incoming_sequence().unwrap_or(0),
            reliable_ack: self.commands.executed(),
            frame_ack: self.history.back().map(Snapshot::frame),
        });

        if self.reliable.pending_count() > 0 {
            body.push(&ClientMessage::ReliableCommands(
                self.reliable.batch(self.commands.executed()),
            ));
        }

        if self.has_gamestate && !self.usercmds.is_empty() {
            body.push(&ClientMessage::UserCommands(
                self.usercmds.iter().copied().collect(),
            ));
        }

        for index in self.download_acks.drain(..) {
            body.push(&ClientMessage::DownloadAck { index });
        }

        self.transmit(body, now)
    }

    /// Final packet telling the server we are leaving.
    pub fn disconnect(&mut self, now: Instant) -> Vec<Vec<u8>> {
        if !matches!(self.phase, ClientPhase::Connected { .. }) {
            self.phase = ClientPhase::Disconnected;
            return Vec::new();
        }
        let mut body = BodyWriter::new();
        body.push(&ClientMessage::Disconnect);
        self.phase = ClientPhase::Disconnected;
        self.transmit(body, now)
    }

    fn transmit(&mut self, body: BodyWriter, now: Instant) -> Vec<Vec<u8>> {
        match self.channel.transmit(&body.finish(), now) {
            Ok(transmit) => transmit.datagrams,
            Err(e) => {
                log::warn!("{}", e);
                Vec::new()
            }
        }
    }
}
