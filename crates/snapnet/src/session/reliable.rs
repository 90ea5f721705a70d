use std::collections::VecDeque;

use crate::error::SessionError;
use crate::net::{MAX_STRING_LEN, ReliableBatch, ReliableCommand};

// sequence word and string length prefix
const COMMAND_OVERHEAD: usize = 6;

/// Bytes a command occupies in a [`ReliableBatch`] on the wire.
pub fn wire_size(text: &str) -> usize {
    COMMAND_OVERHEAD + text.len().min(MAX_STRING_LEN)
}

/// Outgoing reliable commands awaiting acknowledgement.
///
/// Sequences start at 1 and are never reused. Nothing is retransmitted on a
/// timer: every outgoing message carries the whole pending backlog, so
/// redundancy is the retry mechanism. The backlog is bounded both in
/// commands and in wire bytes, so a full batch always fits one message.
#[derive(Debug)]
pub struct ReliableQueue {
    pending: VecDeque<ReliableCommand>,
    capacity: usize,
    max_bytes: usize,
    pending_bytes: usize,
    next_sequence: u32,
    acknowledged: u32,
}

impl ReliableQueue {
    pub fn new(capacity: usize, max_bytes: usize) -> Self {
        Self {
            pending: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
            max_bytes,
            pending_bytes: 0,
            next_sequence: 1,
            acknowledged: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    /// Wire bytes of everything still unacknowledged.
    pub fn pending_bytes(&self) -> usize {
        self.pending_bytes
    }

    pub fn enqueue(&mut self, text: impl Into<String>) -> Result<u32, SessionError> {
        let text = text.into();
        let size = wire_size(&text);
        if self.pending.len() >= self.capacity || self.pending_bytes + size > self.max_bytes {
            return Err(SessionError::QueueFull {
                pending: self.pending.len(),
                bytes: self.pending_bytes,
            });
        }

        let sequence = self.next_sequence;
        self.next_sequence = self.next_sequence.wrapping_add(1);
        self.pending_bytes += size;
        self.pending.push_back(ReliableCommand { sequence, text });
        Ok(sequence)
    }

    /// Retires every command with a sequence at or below `sequence`.
    /// Acks for commands never issued, or older than the last ack, are ignored.
    pub fn acknowledge(&mut self, sequence: u32) {
        if sequence <= self.acknowledged || sequence >= self.next_sequence {
            return;
        }
        self.acknowledged = sequence;
        while self
            .pending
            .front()
            .is_some_and(|c| c.sequence <= sequence)
        {
            if let Some(command) = self.pending.pop_front() {
                self.pending_bytes -= wire_size(&command.text);
            }
        }
    }

    pub fn pending(&self) -> impl Iterator<Item = &ReliableCommand> {
        self.pending.iter()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn acknowledged(&self) -> u32 {
        self.acknowledged
    }

    pub fn last_sequence(&self) -> u32 {
        self.next_sequence.wrapping_sub(1)
    }

    /// Message body for this tick, stamped with our own incoming ack.
    pub fn batch(&self, ack: u32) -> ReliableBatch {
        ReliableBatch {
            ack,
            commands: self.pending.iter().cloned().collect(),
        }
    }

    pub fn clear(&mut self) {
        *self = Self::new(self.capacity, self.max_bytes);
    }
}

/// Receiving end of a reliable stream: yields commands strictly in sequence.
#[derive(Debug, Default)]
pub struct CommandSequencer {
    executed: u32,
}

impl CommandSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last sequence applied; this is what the receiver acknowledges.
    pub fn executed(&self) -> u32 {
        self.executed
    }

    /// Filters a batch down to the commands that are next in line. Already
    /// applied sequences are skipped; a gap stops the scan so later commands
    /// wait for the redundant resend that fills it.
    pub fn accept<'a>(&mut self, batch: &'a ReliableBatch) -> Vec<&'a ReliableCommand> {
        let mut ready = Vec::new();
        for command in &batch.commands {
            if command.sequence <= self.executed {
                continue;
            }
            if command.sequence != self.executed.wrapping_add(1) {
                log::debug!(
                    "reliable gap: have {}, got {}",
                    self.executed,
                    command.sequence
                );
                break;
            }
            self.executed = command.sequence;
            ready.push(command);
        }
        ready
    }

    /// Treats everything up to `sequence` as applied, as when a game state
    /// carries the sender's acknowledged position.
    pub fn skip_to(&mut self, sequence: u32) {
        self.executed = self.executed.max(sequence);
    }

    pub fn reset(&mut self) {
        self.executed = 0;
    }
}
