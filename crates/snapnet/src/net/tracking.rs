use std::collections::VecDeque;
use std::time::{Duration, Instant};

use super::protocol::channel_sequence_newer;

const MIN_RTO: Duration = Duration::from_millis(100);
const MAX_RTO: Duration = Duration::from_secs(3);

#[derive(Debug, Clone)]
pub struct PendingPacket {
    pub sequence: u32,
    pub send_time: Instant,
}

/// Smoothed round-trip estimate fed by the remote side's message acks.
#[derive(Debug)]
pub struct RttTracker {
    pending: VecDeque<PendingPacket>,
    max_pending: usize,
    srtt: f32,
    rtt_var: f32,
    sampled: bool,
}

impl Default for RttTracker {
    fn default() -> Self {
        Self::new(64)
    }
}

impl RttTracker {
    pub fn new(max_pending: usize) -> Self {
        Self {
            pending: VecDeque::with_capacity(max_pending),
            max_pending,
            srtt: 100.0,
            rtt_var: 50.0,
            sampled: false,
        }
    }

    pub fn track_packet(&mut self, sequence: u32, now: Instant) {
        while self.pending.len() >= self.max_pending {
            self.pending.pop_front();
        }

        self.pending.push_back(PendingPacket {
            sequence,
            send_time: now,
        });
    }

    /// Retires every tracked packet at or below `ack`; the newest retired one
    /// yields the RTT sample. Returns the sample in milliseconds.
    pub fn process_ack(&mut self, ack: u32, now: Instant) -> Option<f32> {
        let mut newest = None;

        while let Some(front) = self.pending.front() {
            if channel_sequence_newer(front.sequence, ack) {
                break;
            }
            newest = self.pending.pop_front();
        }

        let sample = newest.map(|p| now.saturating_duration_since(p.send_time).as_secs_f32() * 1000.0)?;
        self.update_rtt(sample);
        Some(sample)
    }

    fn update_rtt(&mut self, rtt: f32) {
        const ALPHA: f32 = 0.125;
        const BETA: f32 = 0.25;

        if !self.sampled {
            self.srtt = rtt;
            self.rtt_var = rtt / 2.0;
            self.sampled = true;
            return;
        }

        let diff = (rtt - self.srtt).abs();
        self.rtt_var = (1.0 - BETA) * self.rtt_var + BETA * diff;
        self.srtt = (1.0 - ALPHA) * self.srtt + ALPHA * rtt;
    }

    pub fn srtt(&self) -> f32 {
        self.srtt
    }

    pub fn rtt_var(&self) -> f32 {
        self.rtt_var
    }

    /// Retransmission timeout derived from the smoothed estimate.
    pub fn rto(&self) -> Duration {
        let ms = self.srtt + 4.0 * self.rtt_var;
        Duration::from_secs_f32(ms.max(0.0) / 1000.0).clamp(MIN_RTO, MAX_RTO)
    }

    pub fn unacked_count(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ack_retires_everything_up_to_sequence() {
        let mut tracker = RttTracker::new(32);
        let start = Instant::now();

        for seq in 1..=5 {
            tracker.track_packet(seq, start);
        }

        let sample = tracker.process_ack(3, start + Duration::from_millis(40));
        assert_eq!(sample.map(|s| s.round()), Some(40.0));
        assert_eq!(tracker.unacked_count(), 2);
        assert_eq!(tracker.srtt().round(), 40.0);
    }

    #[test]
    fn stale_ack_yields_no_sample() {
        let mut tracker = RttTracker::new(32);
        let start = Instant::now();
        tracker.track_packet(10, start);

        assert!(tracker.process_ack(9, start).is_none());
        assert_eq!(tracker.unacked_count(), 1);
    }

    #[test]
    fn rto_is_clamped() {
        let mut tracker = RttTracker::new(8);
        let start = Instant::now();
        tracker.track_packet(1, start);
        tracker.process_ack(1, start);
        assert_eq!(tracker.rto(), MIN_RTO);
    }
}
