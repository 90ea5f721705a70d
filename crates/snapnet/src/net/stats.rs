use std::collections::VecDeque;
use std::time::{Duration, Instant};

const DEFAULT_SLICE_MS: u64 = 100;
const DEFAULT_SLICE_COUNT: usize = 10;

#[derive(Debug, Clone, Default)]
pub struct PacketLossSimulation {
    pub enabled: bool,
    pub loss_percent: f32,
}

impl PacketLossSimulation {
    pub fn should_drop(&self) -> bool {
        if !self.enabled || self.loss_percent <= 0.0 {
            return false;
        }
        rand_percent() < self.loss_percent
    }
}

#[derive(Debug, Clone, Default)]
pub struct NetworkStats {
    pub packets_sent: u64,
    pub packets_received: u64,
    pub packets_dropped: u64,
    pub fragments_sent: u64,
    pub fragments_discarded: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

#[derive(Debug, Clone, Copy)]
struct BandwidthSlice {
    start: Instant,
    sent: u64,
    received: u64,
}

/// Rolling per-connection byte accounting over a short span of time slices.
#[derive(Debug, Clone)]
pub struct BandwidthWindow {
    slice: Duration,
    max_slices: usize,
    slices: VecDeque<BandwidthSlice>,
}

impl Default for BandwidthWindow {
    fn default() -> Self {
        Self::new(Duration::from_millis(DEFAULT_SLICE_MS), DEFAULT_SLICE_COUNT)
    }
}

impl BandwidthWindow {
    pub fn new(slice: Duration, max_slices: usize) -> Self {
        Self {
            slice,
            max_slices: max_slices.max(1),
            slices: VecDeque::with_capacity(max_slices.max(1)),
        }
    }

    pub fn span(&self) -> Duration {
        self.slice * self.max_slices as u32
    }

    fn current(&mut self, now: Instant) -> &mut BandwidthSlice {
        let stale = self
            .slices
            .back()
            .is_none_or(|s| now.saturating_duration_since(s.start) >= self.slice);

        if stale {
            self.slices.push_back(BandwidthSlice {
                start: now,
                sent: 0,
                received: 0,
            });
            while self.slices.len() > self.max_slices {
                self.slices.pop_front();
            }
        }

        // push_back above guarantees a slice exists
        let last = self.slices.len() - 1;
        &mut self.slices[last]
    }

    pub fn record_sent(&mut self, bytes: usize, now: Instant) {
        self.current(now).sent += bytes as u64;
    }

    pub fn record_received(&mut self, bytes: usize, now: Instant) {
        self.current(now).received += bytes as u64;
    }

    fn sum(&self, now: Instant, pick: impl Fn(&BandwidthSlice) -> u64) -> u64 {
        let span = self.span();
        self.slices
            .iter()
            .filter(|s| now.saturating_duration_since(s.start) < span)
            .map(pick)
            .sum()
    }

    /// Bytes per second sent over the window span.
    pub fn sent_rate(&self, now: Instant) -> u64 {
        (self.sum(now, |s| s.sent) as f64 / self.span().as_secs_f64()) as u64
    }

    pub fn received_rate(&self, now: Instant) -> u64 {
        (self.sum(now, |s| s.received) as f64 / self.span().as_secs_f64()) as u64
    }

    pub fn clear(&mut self) {
        self.slices.clear();
    }
}

fn rand_percent() -> f32 {
    rand::random::<f32>() * 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bandwidth_rate_covers_recent_slices_only() {
        let mut window = BandwidthWindow::new(Duration::from_millis(100), 10);
        let start = Instant::now();

        window.record_sent(500, start);
        window.record_sent(500, start + Duration::from_millis(150));
        assert_eq!(window.sent_rate(start + Duration::from_millis(200)), 1000);

        // first slice has aged out of the one second span
        assert_eq!(window.sent_rate(start + Duration::from_millis(1050)), 500);
        assert_eq!(window.sent_rate(start + Duration::from_secs(5)), 0);
    }

    #[test]
    fn bandwidth_window_is_bounded() {
        let mut window = BandwidthWindow::new(Duration::from_millis(10), 4);
        let start = Instant::now();
        for i in 0..20 {
            window.record_received(10, start + Duration::from_millis(i * 10));
        }
        assert!(window.slices.len() <= 4);
    }

    #[test]
    fn disabled_simulation_never_drops() {
        let sim = PacketLossSimulation {
            enabled: false,
            loss_percent: 100.0,
        };
        assert!((0..100).all(|_| !sim.should_drop()));

        let sim = PacketLossSimulation {
            enabled: true,
            loss_percent: 100.0,
        };
        assert!((0..100).all(|_| sim.should_drop()));
    }

    #[test]
    fn partial_loss_drops_about_that_share() {
        let sim = PacketLossSimulation {
            enabled: true,
            loss_percent: 50.0,
        };
        let dropped = (0..1000).filter(|_| sim.should_drop()).count();
        assert!((300..700).contains(&dropped), "dropped {dropped}");
    }
}
