use std::collections::{BTreeMap, HashMap, VecDeque};
use std::net::SocketAddr;
use std::time::Instant;

use super::config::SessionConfig;
use super::connection::{ActiveDownload, Connection};
use super::download::{DownloadWindow, FileSource, validate_path};
use super::events::{DisconnectReason, SessionHostEvent};
use super::state::{SessionEvent, SessionState};
use crate::error::{ConfigError, DownloadError, SessionError};
use crate::net::{
    BodyWriter, ClientMessage, Datagram, HandshakePacket, PROTOCOL_VERSION, ServerMessage,
    decode_body, encode_body, is_connectionless,
};
use crate::snapshot::{self, EntityState, PlayerState, Snapshot};

const MAX_NAME_LEN: usize = 32;
// type byte, index and length words
const BLOCK_OVERHEAD: usize = 7;

/// The game-state producer: what a given client sees this tick.
pub trait SnapshotSource {
    fn server_time(&self) -> u32;
    fn player_state(&self, slot: u16) -> PlayerState;
    fn visible_entities(&self, slot: u16) -> Vec<EntityState>;

    fn area_bits(&self, _slot: u16) -> Vec<u8> {
        Vec::new()
    }
}

#[derive(Debug, Clone, Copy)]
struct PendingChallenge {
    challenge: u64,
    issued: Instant,
}

/// Tick-driven server side of the session layer.
///
/// Owns a fixed arena of client slots. Inbound datagrams are fed through
/// [`SessionHost::handle_datagram`] as they are drained from the socket;
/// [`SessionHost::tick`] then produces one outgoing packet per live
/// connection. Nothing here blocks or touches a socket.
#[derive(Debug)]
pub struct SessionHost {
    config: SessionConfig,
    slots: Vec<Connection>,
    clients_by_addr: HashMap<SocketAddr, u16>,
    challenges: HashMap<SocketAddr, PendingChallenge>,
    config_strings: BTreeMap<u16, String>,
    outgoing: Vec<Datagram>,
    pending_events: VecDeque<SessionHostEvent>,
}

impl SessionHost {
    pub fn new(config: SessionConfig, now: Instant) -> Result<Self, ConfigError> {
        config.validate()?;
        let slots = (0..config.max_clients)
            .map(|slot| Connection::new(slot as u16, &config, now))
            .collect();

        Ok(Self {
            config,
            slots,
            clients_by_addr: HashMap::new(),
            challenges: HashMap::new(),
            config_strings: BTreeMap::new(),
            outgoing: Vec::new(),
            pending_events: VecDeque::new(),
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn slots(&self) -> &[Connection] {
        &self.slots
    }

    pub fn connection(&self, slot: u16) -> Option<&Connection> {
        self.slots.get(slot as usize)
    }

    pub fn slot_for(&self, addr: &SocketAddr) -> Option<u16> {
        self.clients_by_addr.get(addr).copied()
    }

    pub fn live_count(&self) -> usize {
        self.slots.iter().filter(|c| c.state().is_live()).count()
    }

    pub fn take_outgoing(&mut self) -> Vec<Datagram> {
        std::mem::take(&mut self.outgoing)
    }

    pub fn drain_events(&mut self) -> impl Iterator<Item = SessionHostEvent> + '_ {
        self.pending_events.drain(..)
    }

    pub fn config_string(&self, index: u16) -> Option<&str> {
        self.config_strings.get(&index).map(String::as_str)
    }

    /// Updates a config string. Clients still waiting on their game state get
    /// a fresh one; clients past it get a `cs` reliable command.
    pub fn set_config_string(&mut self, index: u16, value: impl Into<String>, now: Instant) {
        let value = value.into();
        if self.config_strings.get(&index) == Some(&value) {
            return;
        }
        self.config_strings.insert(index, value.clone());

        for slot in 0..self.slots.len() {
            let conn = &mut self.slots[slot];
            match conn.state() {
                SessionState::Connected => {
                    conn.gamestate_sequence = None;
                    conn.gamestate_sent_at = None;
                }
                SessionState::Primed | SessionState::Active => {
                    let _ = self.send_reliable(slot as u16, format!("cs {index} {value}"), now);
                }
                SessionState::Free | SessionState::Zombie => {}
            }
        }
    }

    /// Queues a reliable command for one client. Overflowing the queue drops
    /// the client.
    pub fn send_reliable(
        &mut self,
        slot: u16,
        text: impl Into<String>,
        now: Instant,
    ) -> Result<u32, SessionError> {
        let Some(conn) = self.slots.get_mut(slot as usize) else {
            return Err(SessionError::ProtocolViolation {
                state: SessionState::Free,
                message: "reliable command",
            });
        };
        if !conn.state().is_live() {
            return Err(SessionError::ProtocolViolation {
                state: conn.state(),
                message: "reliable command",
            });
        }

        match conn.reliable.enqueue(text) {
            Ok(sequence) => Ok(sequence),
            Err(e) => {
                log::warn!("slot {}: {}, dropping client", slot, e);
                self.drop_client(slot, SessionEvent::Disconnect, DisconnectReason::Overflowed, now);
                Err(e)
            }
        }
    }

    pub fn broadcast_reliable(&mut self, text: &str, now: Instant) {
        for slot in 0..self.slots.len() {
            if self.slots[slot].state().is_live() {
                let _ = self.send_reliable(slot as u16, text, now);
            }
        }
    }

    pub fn disconnect(&mut self, slot: u16, reason: DisconnectReason, now: Instant) {
        self.drop_client(slot, SessionEvent::Disconnect, reason, now);
    }

    pub fn handle_datagram(&mut self, addr: SocketAddr, data: &[u8], now: Instant) {
        if is_connectionless(data) {
            self.handle_connectionless(addr, data, now);
            return;
        }

        let Some(&slot) = self.clients_by_addr.get(&addr) else {
            log::debug!("datagram from unknown address {}", addr);
            return;
        };

        let conn = &mut self.slots[slot as usize];
        if conn.state() == SessionState::Zombie {
            log::debug!("slot {}: discarding late packet from closed session", slot);
            return;
        }

        let body = match conn.channel.process(data, now) {
            Ok(Some(body)) => body,
            Ok(None) => return,
            Err(e) => {
                log::debug!("slot {}: {}", slot, e);
                return;
            }
        };
        conn.touch(now);

        let messages = match decode_body::<ClientMessage>(&body) {
            Ok(messages) => messages,
            Err(e) => {
                log::debug!("slot {}: undecodable message: {}", slot, e);
                return;
            }
        };

        for message in messages {
            self.execute(slot, message, now);
        }
    }

    fn handle_connectionless(&mut self, addr: SocketAddr, data: &[u8], now: Instant) {
        let packet = match HandshakePacket::decode(data) {
            Ok(packet) => packet,
            Err(e) => {
                log::debug!("bad connectionless packet from {}: {}", addr, e);
                return;
            }
        };

        match packet {
            HandshakePacket::GetChallenge { protocol } => {
                if protocol != PROTOCOL_VERSION {
                    self.deny(addr, format!("server uses protocol {PROTOCOL_VERSION}"));
                    return;
                }
                let challenge = self.issue_challenge(addr, now);
                self.send_connectionless(addr, &HandshakePacket::Challenge { challenge });
            }
            HandshakePacket::Connect {
                protocol,
                challenge,
                name,
                rate,
            } => self.handle_connect(addr, protocol, challenge, name, rate, now),
            other => log::debug!("ignoring {:?} from {}", other, addr),
        }
    }

    fn issue_challenge(&mut self, addr: SocketAddr, now: Instant) -> u64 {
        self.expire_challenges(now);
        if let Some(pending) = self.challenges.get(&addr) {
            return pending.challenge;
        }

        if self.challenges.len() >= self.config.max_challenges {
            let oldest = self
                .challenges
                .iter()
                .min_by_key(|(_, p)| p.issued)
                .map(|(addr, _)| *addr);
            if let Some(oldest) = oldest {
                self.challenges.remove(&oldest);
            }
        }

        let challenge = rand::random::<u64>();
        self.challenges.insert(
            addr,
            PendingChallenge {
                challenge,
                issued: now,
            },
        );
        challenge
    }

    fn expire_challenges(&mut self, now: Instant) {
        let expiry = self.config.challenge_expiry;
        self.challenges
            .retain(|_, p| now.saturating_duration_since(p.issued) < expiry);
    }

    fn handle_connect(
        &mut self,
        addr: SocketAddr,
        protocol: u32,
        challenge: u64,
        name: String,
        rate: u32,
        now: Instant,
    ) {
        if protocol != PROTOCOL_VERSION {
            self.deny(addr, format!("server uses protocol {PROTOCOL_VERSION}"));
            return;
        }

        if let Some(&slot) = self.clients_by_addr.get(&addr) {
            let conn = &self.slots[slot as usize];
            if conn.state().is_live() && conn.challenge == challenge {
                // our response was lost; the client is retrying
                self.send_connectionless(addr, &HandshakePacket::ConnectResponse { slot });
                return;
            }
            if conn.state().is_live() {
                self.drop_client(slot, SessionEvent::Disconnect, DisconnectReason::Reconnected, now);
            }
            self.deny(addr, "previous session is closing, retry shortly".to_string());
            return;
        }

        self.expire_challenges(now);
        match self.challenges.get(&addr) {
            Some(pending) if pending.challenge == challenge => {
                self.challenges.remove(&addr);
            }
            _ => {
                self.deny(addr, "bad challenge".to_string());
                return;
            }
        }

        let Some(index) = self
            .slots
            .iter()
            .position(|c| c.state() == SessionState::Free)
        else {
            self.deny(addr, "server is full".to_string());
            return;
        };

        let mut name: String = name.chars().filter(|c| !c.is_control()).take(MAX_NAME_LEN).collect();
        if name.trim().is_empty() {
            name = "player".to_string();
        }
        let rate = self.config.clamp_rate(rate);

        let conn = &mut self.slots[index];
        if let Err(e) = conn.assign(addr, name.clone(), challenge, rate, now) {
            log::warn!("slot {}: {}", index, e);
            return;
        }

        let slot = index as u16;
        self.clients_by_addr.insert(addr, slot);
        self.send_connectionless(addr, &HandshakePacket::ConnectResponse { slot });
        log::info!("slot {}: {} connected from {} at {} B/s", slot, name, addr, rate);
        self.pending_events
            .push_back(SessionHostEvent::ClientConnected { slot, addr, name });
    }

    fn deny(&mut self, addr: SocketAddr, reason: String) {
        log::info!("denying {}: {}", addr, reason);
        self.send_connectionless(
            addr,
            &HandshakePacket::Denied {
                reason: reason.clone(),
            },
        );
        self.pending_events
            .push_back(SessionHostEvent::ConnectionDenied { addr, reason });
    }

    fn send_connectionless(&mut self, addr: SocketAddr, packet: &HandshakePacket) {
        match packet.encode() {
            Ok(data) => self.outgoing.push(Datagram { addr, data }),
            Err(e) => log::warn!("failed to encode {:?}: {}", packet, e),
        }
    }

    fn execute(&mut self, slot: u16, message: ClientMessage, now: Instant) {
        let conn = &mut self.slots[slot as usize];
        let state = conn.state();
        if !state.permits(&message) {
            let violation = SessionError::ProtocolViolation {
                state,
                message: message.name(),
            };
            log::debug!("slot {}: {}", slot, violation);
            return;
        }

        match message {
            ClientMessage::Ack {
                message_ack,
                reliable_ack,
                frame_ack,
            } => {
                conn.rtt.process_ack(message_ack, now);
                conn.reliable.acknowledge(reliable_ack);
                if let Some(frame) = frame_ack {
                    conn.acknowledge_frame(frame);
                }
                if state == SessionState::Connected
                    && conn.gamestate_acknowledged(message_ack)
                    && conn.apply(SessionEvent::GameStateAcknowledged).is_ok()
                {
                    log::info!("slot {}: game state acknowledged", slot);
                }
            }
            ClientMessage::ReliableCommands(batch) => {
                conn.reliable.acknowledge(batch.ack);
                let texts: Vec<String> = conn
                    .commands
                    .accept(&batch)
                    .into_iter()
                    .map(|c| c.text.clone())
                    .collect();
                for text in texts {
                    self.client_command(slot, text, now);
                }
            }
            ClientMessage::UserCommands(cmds) => {
                if state == SessionState::Primed && conn.apply(SessionEvent::UserCommand).is_ok() {
                    log::info!("slot {}: {} entered the game", slot, conn.name);
                    self.pending_events
                        .push_back(SessionHostEvent::ClientEnteredGame { slot });
                }
                for cmd in cmds {
                    // resent commands from earlier packets are already executed
                    if cmd.server_time <= conn.last_usercmd_time {
                        continue;
                    }
                    conn.last_usercmd_time = cmd.server_time;
                    self.pending_events
                        .push_back(SessionHostEvent::UserCommand { slot, cmd });
                }
            }
            ClientMessage::DownloadAck { index } => {
                let Some(download) = conn.download.as_mut() else {
                    log::debug!("slot {}: download ack {} with no transfer", slot, index);
                    return;
                };
                download.announced = true;
                if let Err(e) = download.window.acknowledge(index) {
                    log::debug!("slot {}: {}", slot, e);
                }
                if download.window.is_complete() {
                    let name = download.window.name().to_string();
                    conn.download = None;
                    log::info!("slot {}: download of {} complete", slot, name);
                    self.pending_events
                        .push_back(SessionHostEvent::DownloadFinished { slot, name });
                }
            }
            ClientMessage::Disconnect => {
                self.drop_client(slot, SessionEvent::Disconnect, DisconnectReason::Graceful, now);
            }
        }
    }

    fn client_command(&mut self, slot: u16, text: String, now: Instant) {
        let conn = &mut self.slots[slot as usize];
        let (verb, rest) = text.split_once(' ').unwrap_or((text.as_str(), ""));

        match verb {
            "download" => {
                conn.download = None;
                conn.pending_download = Some(rest.trim().to_string());
            }
            "stopdl" => {
                if let Some(download) = conn.download.take() {
                    log::debug!("slot {}: stopped download of {}", slot, download.window.name());
                }
                conn.pending_download = None;
            }
            "disconnect" => {
                self.drop_client(slot, SessionEvent::Disconnect, DisconnectReason::Graceful, now);
            }
            _ => self
                .pending_events
                .push_back(SessionHostEvent::ClientCommand { slot, text }),
        }
    }

    fn drop_client(
        &mut self,
        slot: u16,
        event: SessionEvent,
        reason: DisconnectReason,
        now: Instant,
    ) {
        let Some(conn) = self.slots.get_mut(slot as usize) else {
            return;
        };
        if !conn.state().is_live() {
            return;
        }

        if let Some(addr) = conn.addr {
            let body = encode_body(&[ServerMessage::Disconnect {
                reason: reason.as_str().to_string(),
            }]);
            match conn.channel.transmit(&body, now) {
                Ok(transmit) => self.outgoing.extend(
                    transmit
                        .datagrams
                        .into_iter()
                        .map(|data| Datagram { addr, data }),
                ),
                Err(e) => log::warn!("slot {}: disconnect not sent: {}", slot, e),
            }
        }

        if let Err(e) = conn.zombify(event, now) {
            log::warn!("slot {}: {}", slot, e);
            return;
        }
        log::info!("slot {}: {} {}", slot, conn.name, reason.as_str());
        self.pending_events
            .push_back(SessionHostEvent::ClientDisconnected { slot, reason });
    }

    /// Runs one server frame: expires quarantines and timeouts, then sends
    /// each live connection its packet for this tick.
    pub fn tick(&mut self, source: &impl SnapshotSource, files: &impl FileSource, now: Instant) {
        self.expire_challenges(now);

        for index in 0..self.slots.len() {
            let slot = index as u16;
            let conn = &mut self.slots[index];

            if conn.quarantine_elapsed(now, self.config.zombie_quarantine) {
                if let Some(addr) = conn.addr {
                    if self.clients_by_addr.get(&addr) == Some(&slot) {
                        self.clients_by_addr.remove(&addr);
                    }
                }
                if let Err(e) = conn.free() {
                    log::warn!("slot {}: {}", slot, e);
                }
                continue;
            }

            if conn.is_timed_out(now, self.config.timeout) {
                let timeout = SessionError::Timeout {
                    millis: self.config.timeout.as_millis() as u64,
                };
                log::warn!("slot {}: {}", slot, timeout);
                self.drop_client(slot, SessionEvent::Timeout, DisconnectReason::Timeout, now);
                continue;
            }

            if conn.state().is_live()
                && let Err(e) = self.send_frame(index, source, files, now)
            {
                log::warn!("slot {}: {}", slot, e);
                self.drop_client(slot, SessionEvent::Disconnect, DisconnectReason::Overflowed, now);
            }
        }
    }

    fn send_frame(
        &mut self,
        index: usize,
        source: &impl SnapshotSource,
        files: &impl FileSource,
        now: Instant,
    ) -> Result<(), SessionError> {
        let Self {
            config,
            slots,
            config_strings,
            outgoing,
            pending_events,
            ..
        } = self;
        let conn = &mut slots[index];
        let slot = conn.slot;
        let Some(addr) = conn.addr else {
            return Ok(());
        };

        if let Some(name) = conn.pending_download.take() {
            start_download(conn, config, files, &name, pending_events);
        }

        let snapshots = matches!(conn.state(), SessionState::Primed | SessionState::Active);
        if snapshots && !conn.snapshot_due(now, config.snapshot_interval) {
            return Ok(());
        }

        if conn.is_choked(now) {
            conn.choked += 1;
            log::trace!("slot {}: choked", slot);
            return Ok(());
        }

        let sequence = conn.channel.outgoing_sequence();
        let mut body = BodyWriter::new();

        match conn.state() {
            SessionState::Connected => {
                let due = conn
                    .gamestate_sent_at
                    .is_none_or(|sent| now.saturating_duration_since(sent) >= conn.rtt.rto());
                if !due {
                    return Ok(());
                }
                body.push(&ServerMessage::GameState {
                    command_sequence: conn.reliable.acknowledged(),
                    client_slot: slot,
                    config: config_strings
                        .iter()
                        .map(|(index, value)| (*index, value.clone()))
                        .collect(),
                });
                conn.gamestate_sequence.get_or_insert(sequence);
                conn.gamestate_sent_at = Some(now);
                body.push(&ServerMessage::ReliableCommands(
                    conn.reliable.batch(conn.commands.executed()),
                ));
            }
            SessionState::Primed | SessionState::Active => {
                body.push(&ServerMessage::ReliableCommands(
                    conn.reliable.batch(conn.commands.executed()),
                ));

                let current = Snapshot::new(
                    source.server_time(),
                    source.player_state(slot),
                    source.visible_entities(slot),
                    source.area_bits(slot),
                )
                .with_entity_limit(config.max_snapshot_entities);
                let frame = conn.ring.store(current);
                conn.next_snapshot_at = Some(now + config.snapshot_interval);
                let baseline = conn.frame_ack.and_then(|acked| {
                    conn.ring
                        .find_baseline(acked)
                        .inspect_err(|e| log::debug!("slot {}: {}, sending full snapshot", slot, e))
                        .ok()
                });
                if let Some(current) = conn.ring.get(frame) {
                    body.push(&ServerMessage::Snapshot(snapshot::encode(baseline, current)));
                }

                if let Some(reason) = conn.download_refusal.take() {
                    body.push(&ServerMessage::DownloadRefused { reason });
                }
                write_download_blocks(conn, config, &mut body, pending_events, now);
            }
            SessionState::Free | SessionState::Zombie => return Ok(()),
        }

        let payload = body.finish();
        let transmit = conn.channel.transmit(&payload, now)?;
        conn.rtt.track_packet(transmit.sequence, now);
        outgoing.extend(
            transmit
                .datagrams
                .into_iter()
                .map(|data| Datagram { addr, data }),
        );
        Ok(())
    }
}

fn start_download(
    conn: &mut Connection,
    config: &SessionConfig,
    files: &impl FileSource,
    name: &str,
    events: &mut VecDeque<SessionHostEvent>,
) {
    let opened = validate_path(name)
        .and_then(|()| files.open(name))
        .and_then(|reader| {
            let size = reader.size();
            let limit = config.max_download_bytes.min(u32::MAX as u64);
            if size > limit {
                return Err(DownloadError::TooLarge {
                    name: name.to_string(),
                    size,
                    limit,
                });
            }
            Ok(reader)
        });

    match opened {
        Ok(reader) => {
            let window = DownloadWindow::new(
                name,
                reader.size(),
                config.download_block_size,
                config.download_window,
            );
            log::info!(
                "slot {}: sending {} ({} bytes, {} blocks)",
                conn.slot,
                name,
                window.size(),
                window.block_count()
            );
            events.push_back(SessionHostEvent::DownloadStarted {
                slot: conn.slot,
                name: name.to_string(),
                blocks: window.block_count(),
            });
            conn.download = Some(ActiveDownload {
                window,
                reader,
                announced: false,
            });
        }
        Err(e) => {
            log::info!("slot {}: refusing download of {}: {}", conn.slot, name, e);
            conn.download = None;
            conn.download_refusal = Some(e.to_string());
        }
    }
}

/// Fills what is left of this tick's byte budget with download blocks. At
/// least one block goes out per tick so slow-rate clients still progress;
/// the choke check on the next tick pays for any overshoot.
fn write_download_blocks(
    conn: &mut Connection,
    config: &SessionConfig,
    body: &mut BodyWriter,
    events: &mut VecDeque<SessionHostEvent>,
    now: Instant,
) {
    let rto = conn.rtt.rto();
    let budget = conn
        .tick_budget(config.snapshot_interval)
        .min(config.max_message);
    let slot = conn.slot;
    let Some(download) = conn.download.as_mut() else {
        return;
    };

    let window = &mut download.window;
    if !download.announced {
        body.push(&ServerMessage::DownloadBegin {
            file_name: window.name().to_string(),
            size: window.size() as u32,
            block_size: window.block_size() as u16,
            block_count: window.block_count(),
        });
    }

    let mut failure = None;
    let mut sent = 0;
    for index in window.next_blocks_to_send(now, rto) {
        let (offset, len) = window.block_range(index);
        let needed = body.len() + len + BLOCK_OVERHEAD;
        if needed > config.max_message || (sent > 0 && needed > budget) {
            break;
        }

        let mut data = vec![0; len];
        match download.reader.read_at(offset, &mut data) {
            Ok(read) if read == len => {}
            Ok(read) => {
                failure = Some(format!("short read of block {index}: {read} of {len} bytes"));
                break;
            }
            Err(e) => {
                failure = Some(e.to_string());
                break;
            }
        }
        body.push(&ServerMessage::DownloadBlock { index, data });
        window.mark_sent(index, now);
        sent += 1;
    }

    if let Some(reason) = failure {
        log::warn!("slot {}: download of {} failed: {}", slot, window.name(), reason);
        body.push(&ServerMessage::DownloadRefused { reason });
        conn.download = None;
    } else if window.is_complete() {
        // nothing to ack for an empty file; the header alone finishes it
        let name = window.name().to_string();
        conn.download = None;
        events.push_back(SessionHostEvent::DownloadFinished { slot, name });
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::time::Duration;

    use super::*;
    use crate::session::MemoryFiles;

    struct EmptyWorld;

    impl SnapshotSource for EmptyWorld {
        fn server_time(&self) -> u32 {
            0
        }

        fn player_state(&self, _slot: u16) -> PlayerState {
            PlayerState::default()
        }

        fn visible_entities(&self, _slot: u16) -> Vec<EntityState> {
            Vec::new()
        }
    }

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[test]
    fn challenges_differ_per_address() {
        let now = Instant::now();
        let mut host = SessionHost::new(SessionConfig::default(), now).unwrap();
        let challenges: HashSet<u64> = (0..64)
            .map(|port| host.issue_challenge(addr(20_000 + port), now))
            .collect();
        assert_eq!(challenges.len(), 64);

        // a retry from the same address keeps its challenge
        let first = host.issue_challenge(addr(20_000), now);
        assert!(challenges.contains(&first));
    }

    fn reply(host: &mut SessionHost) -> HandshakePacket {
        let out = host.take_outgoing();
        assert_eq!(out.len(), 1);
        HandshakePacket::decode(&out[0].data).unwrap()
    }

    fn handshake(host: &mut SessionHost, from: SocketAddr, now: Instant) -> HandshakePacket {
        let get = HandshakePacket::GetChallenge {
            protocol: PROTOCOL_VERSION,
        };
        host.handle_datagram(from, &get.encode().unwrap(), now);
        let HandshakePacket::Challenge { challenge } = reply(host) else {
            panic!("expected challenge");
        };

        let connect = HandshakePacket::Connect {
            protocol: PROTOCOL_VERSION,
            challenge,
            name: "tester".into(),
            rate: 0,
        };
        host.handle_datagram(from, &connect.encode().unwrap(), now);
        reply(host)
    }

    #[test]
    fn handshake_assigns_lowest_free_slot() {
        let now = Instant::now();
        let mut host = SessionHost::new(SessionConfig::default(), now).unwrap();

        assert_eq!(
            handshake(&mut host, addr(5000), now),
            HandshakePacket::ConnectResponse { slot: 0 }
        );
        assert_eq!(
            handshake(&mut host, addr(5001), now),
            HandshakePacket::ConnectResponse { slot: 1 }
        );
        assert_eq!(host.connection(0).unwrap().state(), SessionState::Connected);
        assert_eq!(host.connection(0).unwrap().rate, 25_000);
        assert_eq!(host.live_count(), 2);
    }

    #[test]
    fn full_server_and_bad_challenge_are_denied() {
        let now = Instant::now();
        let config = SessionConfig {
            max_clients: 1,
            ..Default::default()
        };
        let mut host = SessionHost::new(config, now).unwrap();
        handshake(&mut host, addr(5000), now);

        assert!(matches!(
            handshake(&mut host, addr(5001), now),
            HandshakePacket::Denied { reason } if reason == "server is full"
        ));

        let forged = HandshakePacket::Connect {
            protocol: PROTOCOL_VERSION,
            challenge: 42,
            name: "x".into(),
            rate: 0,
        };
        host.handle_datagram(addr(5002), &forged.encode().unwrap(), now);
        assert!(matches!(reply(&mut host), HandshakePacket::Denied { .. }));
    }

    #[test]
    fn challenges_expire() {
        let now = Instant::now();
        let mut host = SessionHost::new(SessionConfig::default(), now).unwrap();

        let get = HandshakePacket::GetChallenge {
            protocol: PROTOCOL_VERSION,
        };
        host.handle_datagram(addr(5000), &get.encode().unwrap(), now);
        let HandshakePacket::Challenge { challenge } = reply(&mut host) else {
            panic!("expected challenge");
        };

        let connect = HandshakePacket::Connect {
            protocol: PROTOCOL_VERSION,
            challenge,
            name: "late".into(),
            rate: 0,
        };
        let later = now + Duration::from_secs(11);
        host.handle_datagram(addr(5000), &connect.encode().unwrap(), later);
        assert!(matches!(reply(&mut host), HandshakePacket::Denied { .. }));
    }

    #[test]
    fn connected_client_gets_game_state_then_timeout_zombifies() {
        let now = Instant::now();
        let mut host = SessionHost::new(SessionConfig::default(), now).unwrap();
        host.set_config_string(0, "q3dm17", now);
        handshake(&mut host, addr(5000), now);

        host.tick(&EmptyWorld, &MemoryFiles::new(), now);
        let out = host.take_outgoing();
        assert_eq!(out.len(), 1);
        assert_eq!(host.connection(0).unwrap().gamestate_sequence, Some(1));

        // not resent before the retransmit timeout
        host.tick(&EmptyWorld, &MemoryFiles::new(), now + Duration::from_millis(10));
        assert!(host.take_outgoing().is_empty());

        let later = now + Duration::from_secs(31);
        host.tick(&EmptyWorld, &MemoryFiles::new(), later);
        assert_eq!(host.connection(0).unwrap().state(), SessionState::Zombie);
        assert!(host.drain_events().any(|e| matches!(
            e,
            SessionHostEvent::ClientDisconnected {
                slot: 0,
                reason: DisconnectReason::Timeout
            }
        )));

        host.tick(&EmptyWorld, &MemoryFiles::new(), later + Duration::from_secs(2));
        assert_eq!(host.connection(0).unwrap().state(), SessionState::Free);
        assert_eq!(host.slot_for(&addr(5000)), None);
    }
}
