pub const PROTOCOL_VERSION: u32 = 1;
pub const DEFAULT_PORT: u16 = 27960;
pub const DEFAULT_TICK_RATE: u32 = 20;

/// Largest datagram handed to the socket.
pub const MAX_DATAGRAM_SIZE: usize = 1400;
/// Payload bytes carried by each fragment of an oversized message.
pub const FRAGMENT_SIZE: usize = 1300;
/// Largest logical message after reassembly.
pub const MAX_MSG_LEN: usize = 16384;
pub const MAX_FRAGMENTS: usize = 255;

/// Set on the sequence word of a datagram that carries a fragment header.
pub const FRAGMENT_BIT: u32 = 1 << 31;
pub const SEQUENCE_MASK: u32 = !FRAGMENT_BIT;
/// Sequence word of a connectionless (handshake) packet.
pub const CONNECTIONLESS_SEQUENCE: u32 = u32::MAX;

pub const ENTITY_NUM_BITS: u8 = 10;
pub const MAX_ENTITIES: usize = 1 << ENTITY_NUM_BITS;

/// Baseline frame sentinel meaning "full snapshot, no delta".
pub const NO_FRAME: u32 = u32::MAX;

const CHANNEL_WRAP_THRESHOLD: u32 = SEQUENCE_MASK / 2;

/// Serial comparison in the 31-bit channel sequence space.
#[inline]
pub fn channel_sequence_newer(s1: u32, s2: u32) -> bool {
    let diff = s1.wrapping_sub(s2) & SEQUENCE_MASK;
    diff != 0 && diff <= CHANNEL_WRAP_THRESHOLD
}

/// `0x7FFFFFFF` is never issued: with the fragment bit set it would read as
/// the connectionless marker.
#[inline]
pub fn next_channel_sequence(sequence: u32) -> u32 {
    match sequence.wrapping_add(1) & SEQUENCE_MASK {
        SEQUENCE_MASK => 0,
        next => next,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_sequence_wraps_in_31_bits() {
        assert!(channel_sequence_newer(1, 0));
        assert!(!channel_sequence_newer(0, 0));
        assert!(channel_sequence_newer(0, SEQUENCE_MASK));
        assert_eq!(next_channel_sequence(SEQUENCE_MASK - 1), 0);
        assert_eq!(next_channel_sequence(0), 1);
        assert!(channel_sequence_newer(0, SEQUENCE_MASK - 1));
    }
}
