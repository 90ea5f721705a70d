use super::frame::Snapshot;
use crate::error::SessionError;

/// Per-connection history of transmitted snapshots, indexed by frame.
#[derive(Debug)]
pub struct SnapshotRing {
    snapshots: Vec<Option<Snapshot>>,
    capacity: usize,
    next_frame: u32,
}

impl SnapshotRing {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            snapshots: (0..capacity).map(|_| None).collect(),
            capacity,
            next_frame: 1,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Frame number the next stored snapshot will receive.
    pub fn next_frame(&self) -> u32 {
        self.next_frame
    }

    /// Stores the snapshot in the next slot, evicting the oldest, and
    /// returns the frame number assigned to it.
    pub fn store(&mut self, mut snapshot: Snapshot) -> u32 {
        let frame = self.next_frame;
        self.next_frame = self.next_frame.wrapping_add(1);

        snapshot.set_frame(frame);
        let index = frame as usize % self.capacity;
        self.snapshots[index] = Some(snapshot);
        frame
    }

    pub fn get(&self, frame: u32) -> Option<&Snapshot> {
        let index = frame as usize % self.capacity;
        self.snapshots[index].as_ref().filter(|s| s.frame() == frame)
    }

    /// Snapshot for a frame the client acknowledged, if it is still held.
    pub fn find_baseline(&self, acked_frame: u32) -> Result<&Snapshot, SessionError> {
        self.get(acked_frame)
            .ok_or(SessionError::BaselineExpired { frame: acked_frame })
    }

    pub fn latest(&self) -> Option<&Snapshot> {
        self.get(self.next_frame.wrapping_sub(1))
    }

    pub fn oldest_frame(&self) -> Option<u32> {
        self.snapshots
            .iter()
            .filter_map(|s| s.as_ref())
            .map(|s| s.frame())
            .min()
    }

    pub fn clear(&mut self) {
        for slot in &mut self.snapshots {
            *slot = None;
        }
    }

    pub fn len(&self) -> usize {
        self.snapshots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::PlayerState;

    fn snapshot(time: u32) -> Snapshot {
        Snapshot::new(time, PlayerState::default(), Vec::new(), Vec::new())
    }

    #[test]
    fn frames_are_monotonic() {
        let mut ring = SnapshotRing::new(4);
        let frames: Vec<u32> = (0..6).map(|t| ring.store(snapshot(t))).collect();
        assert_eq!(frames, vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(ring.latest().map(|s| s.server_time()), Some(5));
    }

    #[test]
    fn oldest_is_evicted_past_capacity() {
        let mut ring = SnapshotRing::new(32);
        let first = ring.store(snapshot(0));
        for t in 1..32 {
            ring.store(snapshot(t));
        }
        assert!(ring.find_baseline(first).is_ok());

        ring.store(snapshot(32));
        assert_eq!(
            ring.find_baseline(first).unwrap_err(),
            SessionError::BaselineExpired { frame: first }
        );
        assert_eq!(ring.oldest_frame(), Some(first + 1));
        assert_eq!(ring.len(), 32);
    }

    #[test]
    fn future_frames_are_not_baselines() {
        let mut ring = SnapshotRing::new(8);
        ring.store(snapshot(0));
        assert!(ring.find_baseline(9).is_err());
        assert!(ring.find_baseline(0).is_err());
    }
}
