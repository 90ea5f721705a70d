use std::fmt;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use super::config::SessionConfig;
use super::download::{BlockReader, DownloadWindow};
use super::reliable::{CommandSequencer, ReliableQueue};
use super::state::{SessionEvent, SessionState};
use crate::error::SessionError;
use crate::net::{NetChannel, RttTracker, channel_sequence_newer};
use crate::snapshot::SnapshotRing;

/// A file transfer in progress on one connection.
pub struct ActiveDownload {
    pub window: DownloadWindow,
    pub reader: Box<dyn BlockReader>,
    /// The client has confirmed the transfer header by acking a block.
    pub announced: bool,
}

impl fmt::Debug for ActiveDownload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActiveDownload")
            .field("window", &self.window)
            .field("announced", &self.announced)
            .finish_non_exhaustive()
    }
}

/// One client slot. Everything it owns is reset when the slot is assigned,
/// so nothing from a previous occupant leaks into the next.
#[derive(Debug)]
pub struct Connection {
    pub slot: u16,
    pub addr: Option<SocketAddr>,
    state: SessionState,
    pub name: String,
    pub challenge: u64,
    pub rate: u32,
    pub channel: NetChannel,
    pub reliable: ReliableQueue,
    pub commands: CommandSequencer,
    pub ring: SnapshotRing,
    pub frame_ack: Option<u32>,
    /// Earliest channel sequence that carried the current game state. While
    /// connected, every packet the client gets carries the game state, so
    /// any ack at or past this sequence proves delivery.
    pub gamestate_sequence: Option<u32>,
    pub gamestate_sent_at: Option<Instant>,
    pub download: Option<ActiveDownload>,
    pub pending_download: Option<String>,
    pub download_refusal: Option<String>,
    pub rtt: RttTracker,
    pub last_receive: Instant,
    pub zombie_since: Option<Instant>,
    pub last_usercmd_time: u32,
    pub choked: u64,
    /// Snapshots are withheld until this time.
    pub next_snapshot_at: Option<Instant>,
}

impl Connection {
    pub fn new(slot: u16, config: &SessionConfig, now: Instant) -> Self {
        Self {
            slot,
            addr: None,
            state: SessionState::Free,
            name: String::new(),
            challenge: 0,
            rate: config.default_rate,
            channel: NetChannel::new(config.max_datagram, config.fragment_size, config.max_message),
            reliable: ReliableQueue::new(config.reliable_capacity, config.reliable_bytes),
            commands: CommandSequencer::new(),
            ring: SnapshotRing::new(config.ring_capacity),
            frame_ack: None,
            gamestate_sequence: None,
            gamestate_sent_at: None,
            download: None,
            pending_download: None,
            download_refusal: None,
            rtt: RttTracker::default(),
            last_receive: now,
            zombie_since: None,
            last_usercmd_time: 0,
            choked: 0,
            next_snapshot_at: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Applies a lifecycle event, leaving the state alone if it is illegal.
    pub fn apply(&mut self, event: SessionEvent) -> Result<SessionState, SessionError> {
        let next = self.state.transition(event)?;
        if next != self.state {
            log::debug!(
                "slot {}: {} -> {} on {}",
                self.slot,
                self.state.as_str(),
                next.as_str(),
                event.as_str()
            );
        }
        self.state = next;
        Ok(next)
    }

    /// Takes a free slot for a freshly handshaken client.
    pub fn assign(
        &mut self,
        addr: SocketAddr,
        name: String,
        challenge: u64,
        rate: u32,
        now: Instant,
    ) -> Result<(), SessionError> {
        self.apply(SessionEvent::HandshakeComplete)?;
        self.addr = Some(addr);
        self.name = name;
        self.challenge = challenge;
        self.rate = rate;
        self.channel.reset_with_challenge(challenge);
        self.reliable.clear();
        self.commands.reset();
        self.ring.clear();
        self.frame_ack = None;
        self.gamestate_sequence = None;
        self.gamestate_sent_at = None;
        self.download = None;
        self.pending_download = None;
        self.download_refusal = None;
        self.rtt = RttTracker::default();
        self.last_receive = now;
        self.zombie_since = None;
        self.last_usercmd_time = 0;
        self.choked = 0;
        self.next_snapshot_at = None;
        Ok(())
    }

    /// Drops a live session into quarantine. Reassembly state and transfers
    /// are discarded at once; the address stays bound so late packets from
    /// the old session land here and are thrown away.
    pub fn zombify(&mut self, event: SessionEvent, now: Instant) -> Result<(), SessionError> {
        self.apply(event)?;
        self.zombie_since = Some(now);
        self.channel.reset();
        self.download = None;
        self.pending_download = None;
        self.download_refusal = None;
        Ok(())
    }

    pub fn free(&mut self) -> Result<(), SessionError> {
        self.apply(SessionEvent::QuarantineElapsed)?;
        self.addr = None;
        self.zombie_since = None;
        self.name.clear();
        self.ring.clear();
        self.reliable.clear();
        Ok(())
    }

    pub fn touch(&mut self, now: Instant) {
        self.last_receive = now;
    }

    pub fn is_timed_out(&self, now: Instant, timeout: Duration) -> bool {
        self.state.is_live() && now.saturating_duration_since(self.last_receive) > timeout
    }

    pub fn quarantine_elapsed(&self, now: Instant, quarantine: Duration) -> bool {
        self.state == SessionState::Zombie
            && self
                .zombie_since
                .is_some_and(|since| now.saturating_duration_since(since) >= quarantine)
    }

    /// Whether the client's message ack covers the game state we sent.
    pub fn gamestate_acknowledged(&self, message_ack: u32) -> bool {
        self.gamestate_sequence
            .is_some_and(|sent| !channel_sequence_newer(sent, message_ack))
    }

    /// Records the newest snapshot frame the client holds. Frames never sent
    /// and acks older than the current one are ignored.
    pub fn acknowledge_frame(&mut self, frame: u32) {
        let sent = self.ring.next_frame();
        if frame >= sent {
            log::debug!("slot {}: ack for unsent frame {}", self.slot, frame);
            return;
        }
        if self.frame_ack.is_none_or(|acked| frame > acked) {
            self.frame_ack = Some(frame);
        }
    }

    /// Bytes this connection may put on the wire in one snapshot interval.
    pub fn tick_budget(&self, interval: Duration) -> usize {
        (self.rate as f64 * interval.as_secs_f64()) as usize
    }

    /// A snapshot within a quarter interval of its due time counts as due,
    /// absorbing tick jitter.
    pub fn snapshot_due(&self, now: Instant, interval: Duration) -> bool {
        self.next_snapshot_at
            .is_none_or(|due| now + interval / 4 >= due)
    }

    pub fn is_choked(&self, now: Instant) -> bool {
        self.channel.bandwidth().sent_rate(now) > self.rate as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    #[test]
    fn assign_and_quarantine() {
        let config = SessionConfig::default();
        let now = Instant::now();
        let mut conn = Connection::new(0, &config, now);

        conn.assign(addr(), "player".into(), 7, 25_000, now).unwrap();
        assert_eq!(conn.state(), SessionState::Connected);
        assert_eq!(conn.channel.challenge(), 7);
        assert!(conn.assign(addr(), "again".into(), 8, 25_000, now).is_err());

        let later = now + Duration::from_secs(31);
        assert!(conn.is_timed_out(later, config.timeout));
        conn.zombify(SessionEvent::Timeout, later).unwrap();
        assert!(!conn.quarantine_elapsed(later + Duration::from_secs(1), config.zombie_quarantine));
        assert!(conn.quarantine_elapsed(later + Duration::from_secs(2), config.zombie_quarantine));

        conn.free().unwrap();
        assert_eq!(conn.state(), SessionState::Free);
        assert_eq!(conn.addr, None);
    }

    #[test]
    fn snapshot_pacing_tolerates_early_ticks() {
        let config = SessionConfig::default();
        let now = Instant::now();
        let mut conn = Connection::new(0, &config, now);
        let interval = Duration::from_millis(100);
        assert!(conn.snapshot_due(now, interval));

        conn.next_snapshot_at = Some(now + interval);
        assert!(!conn.snapshot_due(now + Duration::from_millis(50), interval));
        assert!(conn.snapshot_due(now + Duration::from_millis(80), interval));
    }

    #[test]
    fn frame_acks_only_move_forward() {
        let config = SessionConfig::default();
        let mut conn = Connection::new(0, &config, Instant::now());
        for _ in 0..3 {
            conn.ring.store(crate::snapshot::Snapshot::new(
                0,
                Default::default(),
                Vec::new(),
                Vec::new(),
            ));
        }

        conn.acknowledge_frame(2);
        conn.acknowledge_frame(1);
        conn.acknowledge_frame(9);
        assert_eq!(conn.frame_ack, Some(2));
    }

    #[test]
    fn gamestate_ack_uses_first_send() {
        let config = SessionConfig::default();
        let mut conn = Connection::new(0, &config, Instant::now());
        assert!(!conn.gamestate_acknowledged(10));
        conn.gamestate_sequence = Some(4);
        assert!(!conn.gamestate_acknowledged(3));
        assert!(conn.gamestate_acknowledged(4));
        assert!(conn.gamestate_acknowledged(12));
    }
}
