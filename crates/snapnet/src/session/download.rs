use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::DownloadError;

/// Read access to one opened file, block by block.
pub trait BlockReader {
    fn size(&self) -> u64;

    /// Fills `buf` from `offset`, returning the bytes read. Only the final
    /// block of a file reads short.
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize, DownloadError>;
}

/// The file-access collaborator: resolves logical paths to readable files.
pub trait FileSource {
    fn open(&self, path: &str) -> Result<Box<dyn BlockReader>, DownloadError>;
}

/// Rejects names that could escape the served tree. Logical paths are
/// relative, slash-separated and contain no `..` components.
pub fn validate_path(path: &str) -> Result<(), DownloadError> {
    let illegal = path.is_empty()
        || path.starts_with('/')
        || path.contains('\\')
        || path.contains(':')
        || path.contains('\0')
        || path.split('/').any(|part| part.is_empty() || part == "." || part == "..");

    if illegal {
        return Err(DownloadError::IllegalPath(path.to_string()));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, Default)]
struct BlockSlot {
    acked: bool,
    sent_at: Option<Instant>,
}

/// Sliding acknowledgement window over the blocks of one file transfer.
///
/// At most `window` blocks starting at the floor are in flight. Acks may
/// arrive in any order; the floor only moves across a contiguous run of
/// acknowledged blocks.
#[derive(Debug, Clone)]
pub struct DownloadWindow {
    name: String,
    size: u64,
    block_size: usize,
    window: usize,
    blocks: Vec<BlockSlot>,
    floor: u32,
    acked: usize,
}

impl DownloadWindow {
    pub fn new(name: impl Into<String>, size: u64, block_size: usize, window: usize) -> Self {
        let block_size = block_size.max(1);
        let count = size.div_ceil(block_size as u64) as usize;
        Self {
            name: name.into(),
            size,
            block_size,
            window: window.max(1),
            blocks: vec![BlockSlot::default(); count],
            floor: 0,
            acked: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn block_count(&self) -> u32 {
        self.blocks.len() as u32
    }

    /// Lowest block not yet acknowledged.
    pub fn floor(&self) -> u32 {
        self.floor
    }

    pub fn acked_count(&self) -> usize {
        self.acked
    }

    /// Byte range of a block within the file.
    pub fn block_range(&self, index: u32) -> (u64, usize) {
        let offset = index as u64 * self.block_size as u64;
        let len = (self.size.saturating_sub(offset)).min(self.block_size as u64) as usize;
        (offset, len)
    }

    /// Blocks inside the window that have never been sent, or whose last
    /// send is older than `rto`, lowest index first.
    pub fn next_blocks_to_send(&self, now: Instant, rto: Duration) -> Vec<u32> {
        let start = self.floor as usize;
        let end = (start + self.window).min(self.blocks.len());

        (start..end)
            .filter(|&i| {
                let slot = &self.blocks[i];
                !slot.acked
                    && slot
                        .sent_at
                        .is_none_or(|sent| now.saturating_duration_since(sent) >= rto)
            })
            .map(|i| i as u32)
            .collect()
    }

    pub fn mark_sent(&mut self, index: u32, now: Instant) {
        if let Some(slot) = self.blocks.get_mut(index as usize) {
            slot.sent_at = Some(now);
        }
    }

    /// Records an ack. Returns whether it was new.
    pub fn acknowledge(&mut self, index: u32) -> Result<bool, DownloadError> {
        let count = self.block_count();
        let Some(slot) = self.blocks.get_mut(index as usize) else {
            return Err(DownloadError::BlockOutOfRange { index, count });
        };

        if slot.acked {
            return Ok(false);
        }
        slot.acked = true;
        self.acked += 1;

        while self
            .blocks
            .get(self.floor as usize)
            .is_some_and(|slot| slot.acked)
        {
            self.floor += 1;
        }
        Ok(true)
    }

    pub fn is_complete(&self) -> bool {
        self.floor as usize == self.blocks.len()
    }
}

/// In-memory file tree, handy for tests and embedding small assets.
#[derive(Debug, Clone, Default)]
pub struct MemoryFiles {
    files: HashMap<String, Arc<[u8]>>,
}

impl MemoryFiles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl Into<String>, data: impl Into<Vec<u8>>) {
        self.files.insert(path.into(), Arc::from(data.into()));
    }
}

struct MemoryReader {
    data: Arc<[u8]>,
}

impl BlockReader for MemoryReader {
    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize, DownloadError> {
        let start = (offset as usize).min(self.data.len());
        let len = buf.len().min(self.data.len() - start);
        buf[..len].copy_from_slice(&self.data[start..start + len]);
        Ok(len)
    }
}

impl FileSource for MemoryFiles {
    fn open(&self, path: &str) -> Result<Box<dyn BlockReader>, DownloadError> {
        let data = self
            .files
            .get(path)
            .cloned()
            .ok_or_else(|| DownloadError::NotFound(path.to_string()))?;
        Ok(Box::new(MemoryReader { data }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_of_order_acks_hold_the_floor() {
        let mut window = DownloadWindow::new("maps/q3dm17.bsp", 5000, 1024, 4);
        assert_eq!(window.block_count(), 5);

        assert!(window.acknowledge(2).unwrap());
        assert_eq!(window.floor(), 0);
        window.acknowledge(0).unwrap();
        assert_eq!(window.floor(), 1);
        window.acknowledge(1).unwrap();
        assert_eq!(window.floor(), 3);

        assert!(!window.acknowledge(1).unwrap());
        assert!(matches!(
            window.acknowledge(5),
            Err(DownloadError::BlockOutOfRange { index: 5, count: 5 })
        ));

        window.acknowledge(3).unwrap();
        window.acknowledge(4).unwrap();
        assert!(window.is_complete());
    }

    #[test]
    fn window_bounds_sends_and_retransmits_after_rto() {
        let mut window = DownloadWindow::new("f", 10 * 100, 100, 3);
        let now = Instant::now();
        let rto = Duration::from_millis(200);

        let first = window.next_blocks_to_send(now, rto);
        assert_eq!(first, vec![0, 1, 2]);
        for &i in &first {
            window.mark_sent(i, now);
        }
        assert!(window.next_blocks_to_send(now, rto).is_empty());

        window.acknowledge(1).unwrap();
        let later = now + Duration::from_millis(250);
        assert_eq!(window.next_blocks_to_send(later, rto), vec![0, 2]);

        window.acknowledge(0).unwrap();
        window.mark_sent(2, later);
        assert_eq!(window.next_blocks_to_send(later, rto), vec![3, 4]);
    }

    #[test]
    fn last_block_is_short_and_empty_file_is_complete() {
        let window = DownloadWindow::new("f", 2500, 1024, 8);
        assert_eq!(window.block_range(2), (2048, 452));

        let empty = DownloadWindow::new("empty", 0, 1024, 8);
        assert_eq!(empty.block_count(), 0);
        assert!(empty.is_complete());
    }

    #[test]
    fn memory_files_read_blocks() {
        let mut files = MemoryFiles::new();
        files.insert("a.txt", b"hello world".to_vec());

        let mut reader = files.open("a.txt").unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(reader.read_at(8, &mut buf).unwrap(), 3);
        assert_eq!(&buf[..3], b"rld");
        assert!(matches!(files.open("b.txt"), Err(DownloadError::NotFound(_))));
    }

    #[test]
    fn paths_cannot_escape() {
        assert!(validate_path("maps/dm1.bsp").is_ok());
        for bad in ["", "/etc/passwd", "../secret", "maps/../../x", "c:\\x", "a//b"] {
            assert!(validate_path(bad).is_err(), "{bad}");
        }
    }
}
