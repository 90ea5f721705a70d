use std::time::Instant;

use super::protocol::{
    FRAGMENT_BIT, FRAGMENT_SIZE, MAX_DATAGRAM_SIZE, MAX_FRAGMENTS, MAX_MSG_LEN, SEQUENCE_MASK,
    channel_sequence_newer, next_channel_sequence,
};
use super::stats::{BandwidthWindow, NetworkStats};
use crate::error::SessionError;

const SEQUENCE_HEADER: usize = 4;
const CHECKSUM_HEADER: usize = 4;
const FRAGMENT_HEADER: usize = 2;

/// Sequence plus checksum words that precede every in-band body.
pub const CHANNEL_HEADER: usize = SEQUENCE_HEADER + CHECKSUM_HEADER;
/// Full header of a fragment datagram.
pub const FRAGMENT_OVERHEAD: usize = CHANNEL_HEADER + FRAGMENT_HEADER;

/// Checksum word of a datagram, keyed by the connection challenge.
pub fn challenge_checksum(challenge: u64, sequence: u32) -> u32 {
    let key = (challenge ^ (challenge >> 32)) as u32;
    key ^ sequence.wrapping_mul(key | 1).rotate_left(13)
}

/// Datagrams produced by a single [`NetChannel::transmit`] call.
#[derive(Debug, Clone)]
pub struct Transmit {
    pub sequence: u32,
    pub datagrams: Vec<Vec<u8>>,
}

#[derive(Debug)]
struct FragmentAssembly {
    sequence: u32,
    parts: Vec<Option<Vec<u8>>>,
    received: usize,
    bytes: usize,
}

impl FragmentAssembly {
    fn new(sequence: u32, count: usize) -> Self {
        Self {
            sequence,
            parts: vec![None; count],
            received: 0,
            bytes: 0,
        }
    }

    fn is_complete(&self) -> bool {
        self.received == self.parts.len()
    }

    fn into_message(self) -> Vec<u8> {
        let mut message = Vec::with_capacity(self.bytes);
        for part in self.parts.into_iter().flatten() {
            message.extend_from_slice(&part);
        }
        message
    }
}

/// Sequenced, fragmenting datagram channel for one remote peer.
///
/// Outgoing messages get a fresh 31-bit sequence; anything larger than a
/// datagram is split into `(index, count)` tagged fragments. Incoming traffic
/// is accepted only if its sequence is newer than the last accepted message,
/// so duplicates and stragglers vanish without disturbing the connection.
/// Every datagram also carries [`challenge_checksum`] of its sequence; a
/// mismatch is rejected before the sequence is trusted.
#[derive(Debug)]
pub struct NetChannel {
    challenge: u64,
    outgoing_sequence: u32,
    incoming_sequence: Option<u32>,
    max_datagram: usize,
    fragment_size: usize,
    max_message: usize,
    assembly: Option<FragmentAssembly>,
    bandwidth: BandwidthWindow,
    stats: NetworkStats,
}

impl Default for NetChannel {
    fn default() -> Self {
        Self::new(MAX_DATAGRAM_SIZE, FRAGMENT_SIZE, MAX_MSG_LEN)
    }
}

impl NetChannel {
    pub fn new(max_datagram: usize, fragment_size: usize, max_message: usize) -> Self {
        Self {
            challenge: 0,
            outgoing_sequence: 1,
            incoming_sequence: None,
            max_datagram,
            fragment_size,
            max_message,
            assembly: None,
            bandwidth: BandwidthWindow::default(),
            stats: NetworkStats::default(),
        }
    }

    /// Keys both directions of the channel to the handshake challenge.
    pub fn set_challenge(&mut self, challenge: u64) {
        self.challenge = challenge;
    }

    pub fn challenge(&self) -> u64 {
        self.challenge
    }

    /// Sequence the next transmitted message will carry.
    pub fn outgoing_sequence(&self) -> u32 {
        self.outgoing_sequence
    }

    /// Last accepted incoming sequence.
    pub fn incoming_sequence(&self) -> Option<u32> {
        self.incoming_sequence
    }

    pub fn stats(&self) -> &NetworkStats {
        &self.stats
    }

    pub fn bandwidth(&self) -> &BandwidthWindow {
        &self.bandwidth
    }

    pub fn max_message(&self) -> usize {
        self.max_message
    }

    pub fn has_partial_message(&self) -> bool {
        self.assembly.is_some()
    }

    /// Frames one logical message. A message the channel cannot carry is
    /// refused before a sequence is spent on it.
    pub fn transmit(&mut self, payload: &[u8], now: Instant) -> Result<Transmit, SessionError> {
        let fits_whole = CHANNEL_HEADER + payload.len() <= self.max_datagram;
        let count = payload.len().div_ceil(self.fragment_size);
        if !fits_whole && (count > MAX_FRAGMENTS || payload.len() > self.max_message) {
            return Err(SessionError::MessageTooLarge {
                size: payload.len(),
                limit: self.max_message.min(self.fragment_size * MAX_FRAGMENTS),
            });
        }

        let sequence = self.outgoing_sequence;
        self.outgoing_sequence = next_channel_sequence(sequence);
        let checksum = challenge_checksum(self.challenge, sequence);

        let mut datagrams = Vec::new();
        if fits_whole {
            let mut datagram = Vec::with_capacity(CHANNEL_HEADER + payload.len());
            datagram.extend_from_slice(&sequence.to_le_bytes());
            datagram.extend_from_slice(&checksum.to_le_bytes());
            datagram.extend_from_slice(payload);
            datagrams.push(datagram);
        } else {
            for (index, chunk) in payload.chunks(self.fragment_size).enumerate() {
                let mut datagram = Vec::with_capacity(FRAGMENT_OVERHEAD + chunk.len());
                datagram.extend_from_slice(&(sequence | FRAGMENT_BIT).to_le_bytes());
                datagram.extend_from_slice(&checksum.to_le_bytes());
                datagram.push(index as u8);
                datagram.push(count as u8);
                datagram.extend_from_slice(chunk);
                datagrams.push(datagram);
            }
            self.stats.fragments_sent += count as u64;
        }

        for datagram in &datagrams {
            self.bandwidth.record_sent(datagram.len(), now);
            self.stats.bytes_sent += datagram.len() as u64;
        }
        self.stats.packets_sent += 1;

        Ok(Transmit {
            sequence,
            datagrams,
        })
    }

    /// Feeds one datagram into the channel. Yields the logical message once it
    /// is complete; `Ok(None)` means the datagram was absorbed (a fragment, or
    /// something malformed that is not worth an error).
    pub fn process(
        &mut self,
        datagram: &[u8],
        now: Instant,
    ) -> Result<Option<Vec<u8>>, SessionError> {
        self.bandwidth.record_received(datagram.len(), now);
        self.stats.bytes_received += datagram.len() as u64;

        if datagram.len() < CHANNEL_HEADER {
            log::debug!("runt datagram of {} bytes", datagram.len());
            return Ok(None);
        }

        let word = u32::from_le_bytes([datagram[0], datagram[1], datagram[2], datagram[3]]);
        let sequence = word & SEQUENCE_MASK;
        let checksum = u32::from_le_bytes([datagram[4], datagram[5], datagram[6], datagram[7]]);
        if checksum != challenge_checksum(self.challenge, sequence) {
            return Err(SessionError::ChallengeMismatch { sequence });
        }

        if let Some(last) = self.incoming_sequence {
            if !channel_sequence_newer(sequence, last) {
                return Err(SessionError::SequenceRegression {
                    received: sequence,
                    last,
                });
            }
        }

        if word & FRAGMENT_BIT == 0 {
            if self
                .assembly
                .as_ref()
                .is_some_and(|a| channel_sequence_newer(sequence, a.sequence))
            {
                self.abandon_assembly();
            }
            self.accept(sequence);
            return Ok(Some(datagram[CHANNEL_HEADER..].to_vec()));
        }

        if datagram.len() < FRAGMENT_OVERHEAD {
            log::debug!("fragment {} without fragment header", sequence);
            return Ok(None);
        }

        let index = datagram[CHANNEL_HEADER] as usize;
        let count = datagram[CHANNEL_HEADER + 1] as usize;
        let body = &datagram[FRAGMENT_OVERHEAD..];

        if count == 0 || index >= count || body.len() > self.fragment_size {
            log::debug!(
                "malformed fragment {}/{} for sequence {}",
                index,
                count,
                sequence
            );
            return Ok(None);
        }

        match &self.assembly {
            Some(a) if a.sequence == sequence => {}
            Some(a) if channel_sequence_newer(a.sequence, sequence) => {
                log::debug!(
                    "stale fragment for {} while assembling {}",
                    sequence,
                    a.sequence
                );
                return Ok(None);
            }
            _ => {
                self.abandon_assembly();
                self.assembly = Some(FragmentAssembly::new(sequence, count));
            }
        }

        let Some(assembly) = self.assembly.as_mut() else {
            return Ok(None);
        };

        if assembly.parts.len() != count {
            log::debug!("fragment count changed mid-sequence {}", sequence);
            return Ok(None);
        }

        if assembly.parts[index].is_none() {
            if assembly.bytes + body.len() > self.max_message {
                log::debug!("fragmented message {} exceeds limit", sequence);
                self.abandon_assembly();
                return Ok(None);
            }
            assembly.bytes += body.len();
            assembly.received += 1;
            assembly.parts[index] = Some(body.to_vec());
        }

        if !assembly.is_complete() {
            return Ok(None);
        }

        let complete = self.assembly.take().map(FragmentAssembly::into_message);
        self.accept(sequence);
        Ok(complete)
    }

    fn abandon_assembly(&mut self) {
        if let Some(stale) = self.assembly.take() {
            log::debug!(
                "discarding {}/{} fragments of sequence {}",
                stale.received,
                stale.parts.len(),
                stale.sequence
            );
            self.stats.fragments_discarded += stale.received as u64;
        }
    }

    fn accept(&mut self, sequence: u32) {
        if let Some(last) = self.incoming_sequence {
            let gap = sequence.wrapping_sub(last).wrapping_sub(1) & SEQUENCE_MASK;
            self.stats.packets_dropped += gap as u64;
        }
        self.incoming_sequence = Some(sequence);
        self.stats.packets_received += 1;
    }

    /// Forgets all sequence and reassembly state, as for a freshly assigned slot.
    pub fn reset(&mut self) {
        *self = Self::new(self.max_datagram, self.fragment_size, self.max_message);
    }

    /// Resets the channel and keys it to a new connection challenge.
    pub fn reset_with_challenge(&mut self, challenge: u64) {
        self.reset();
        self.challenge = challenge;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 % 251) as u8).collect()
    }

    #[test]
    fn small_message_is_single_datagram() {
        let now = Instant::now();
        let mut tx = NetChannel::default();
        let mut rx = NetChannel::default();

        let out = tx.transmit(b"hello", now).unwrap();
        assert_eq!(out.datagrams.len(), 1);
        assert_eq!(out.sequence, 1);

        let message = rx.process(&out.datagrams[0], now).unwrap();
        assert_eq!(message.as_deref(), Some(&b"hello"[..]));
        assert_eq!(rx.incoming_sequence(), Some(1));
    }

    #[test]
    fn duplicate_and_older_datagrams_are_rejected() {
        let now = Instant::now();
        let mut tx = NetChannel::default();
        let mut rx = NetChannel::default();

        let first = tx.transmit(b"a", now).unwrap();
        let second = tx.transmit(b"b", now).unwrap();

        assert!(rx.process(&second.datagrams[0], now).unwrap().is_some());
        assert_eq!(
            rx.process(&first.datagrams[0], now),
            Err(SessionError::SequenceRegression {
                received: 1,
                last: 2
            })
        );
        assert!(rx.process(&second.datagrams[0], now).is_err());
    }

    #[test]
    fn gaps_count_as_dropped() {
        let now = Instant::now();
        let mut tx = NetChannel::default();
        let mut rx = NetChannel::default();

        let first = tx.transmit(b"a", now).unwrap();
        tx.transmit(b"lost", now).unwrap();
        tx.transmit(b"lost", now).unwrap();
        let fourth = tx.transmit(b"d", now).unwrap();

        rx.process(&first.datagrams[0], now).unwrap();
        rx.process(&fourth.datagrams[0], now).unwrap();
        assert_eq!(rx.stats().packets_dropped, 2);
    }

    #[test]
    fn oversized_message_reassembles_in_reverse_order() {
        let now = Instant::now();
        let mut tx = NetChannel::default();
        let mut rx = NetChannel::default();
        let data = payload(FRAGMENT_SIZE * 3 + 17);

        let out = tx.transmit(&data, now).unwrap();
        assert_eq!(out.datagrams.len(), 4);
        assert!(out.datagrams.iter().all(|d| d.len() <= MAX_DATAGRAM_SIZE));

        let mut result = None;
        for datagram in out.datagrams.iter().rev() {
            if let Some(message) = rx.process(datagram, now).unwrap() {
                result = Some(message);
            }
        }
        assert_eq!(result, Some(data));
        assert!(!rx.has_partial_message());
    }

    #[test]
    fn incomplete_fragments_discarded_when_newer_sequence_arrives() {
        let now = Instant::now();
        let mut tx = NetChannel::default();
        let mut rx = NetChannel::default();

        let big = tx.transmit(&payload(FRAGMENT_SIZE * 2 + 1), now).unwrap();
        let next = tx.transmit(&payload(FRAGMENT_SIZE * 2 + 5), now).unwrap();

        // first message loses its middle fragment
        assert!(rx.process(&big.datagrams[0], now).unwrap().is_none());
        assert!(rx.process(&big.datagrams[2], now).unwrap().is_none());

        let mut completed = Vec::new();
        for datagram in &next.datagrams {
            if let Some(message) = rx.process(datagram, now).unwrap() {
                completed.push(message);
            }
        }
        assert_eq!(completed, vec![payload(FRAGMENT_SIZE * 2 + 5)]);
        assert_eq!(rx.stats().fragments_discarded, 2);

        // the missing fragment now belongs to a regressed sequence
        assert!(rx.process(&big.datagrams[1], now).is_err());
    }

    #[test]
    fn malformed_fragment_headers_are_ignored() {
        let now = Instant::now();
        let mut rx = NetChannel::default();

        let mut bogus = (5u32 | FRAGMENT_BIT).to_le_bytes().to_vec();
        bogus.extend_from_slice(&challenge_checksum(0, 5).to_le_bytes());
        bogus.extend_from_slice(&[3, 2, 0xAA]);
        assert_eq!(rx.process(&bogus, now), Ok(None));
        assert_eq!(rx.process(&[1, 2], now), Ok(None));
        assert_eq!(rx.incoming_sequence(), None);
    }

    #[test]
    fn foreign_challenge_is_rejected_without_advancing() {
        let now = Instant::now();
        let mut tx = NetChannel::default();
        let mut rx = NetChannel::default();
        tx.set_challenge(0x1234_5678_9abc_def0);
        rx.set_challenge(0x1234_5678_9abc_def0);

        let mut forger = NetChannel::default();
        forger.set_challenge(0xdead_beef);
        for _ in 0..1000 {
            forger.transmit(b"x", now).unwrap();
        }
        let forged = forger.transmit(b"x", now).unwrap();
        assert_eq!(
            rx.process(&forged.datagrams[0], now),
            Err(SessionError::ChallengeMismatch { sequence: 1001 })
        );
        assert_eq!(rx.incoming_sequence(), None);

        let genuine = tx.transmit(b"ok", now).unwrap();
        assert_eq!(
            rx.process(&genuine.datagrams[0], now),
            Ok(Some(b"ok".to_vec()))
        );
    }

    #[test]
    fn oversized_message_is_refused_without_spending_a_sequence() {
        let now = Instant::now();
        let mut tx = NetChannel::new(MAX_DATAGRAM_SIZE, FRAGMENT_SIZE, 4096);

        assert_eq!(
            tx.transmit(&payload(5000), now).map(|t| t.sequence),
            Err(SessionError::MessageTooLarge {
                size: 5000,
                limit: 4096
            })
        );
        assert_eq!(tx.outgoing_sequence(), 1);
        assert_eq!(tx.stats().packets_sent, 0);
        assert_eq!(tx.transmit(&payload(4096), now).unwrap().sequence, 1);
    }
}
