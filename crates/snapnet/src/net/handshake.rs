use rkyv::util::AlignedVec;
use rkyv::{Archive, Deserialize, Serialize, rancor};

use super::protocol::CONNECTIONLESS_SEQUENCE;
use crate::error::HandshakeError;

/// Out-of-band packets exchanged before a slot is assigned.
///
/// On the wire these are `[0xFFFFFFFF][rkyv archive]`, distinguishable from
/// channel traffic by the sequence word alone.
#[derive(Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub enum HandshakePacket {
    GetChallenge { protocol: u32 },
    Challenge { challenge: u64 },
    Connect {
        protocol: u32,
        challenge: u64,
        name: String,
        rate: u32,
    },
    ConnectResponse { slot: u16 },
    Denied { reason: String },
}

pub fn is_connectionless(datagram: &[u8]) -> bool {
    datagram.len() >= 4
        && u32::from_le_bytes([datagram[0], datagram[1], datagram[2], datagram[3]])
            == CONNECTIONLESS_SEQUENCE
}

impl HandshakePacket {
    pub fn encode(&self) -> Result<Vec<u8>, HandshakeError> {
        let archived = rkyv::to_bytes::<rancor::Error>(self).map_err(HandshakeError::Serialize)?;

        let mut out = Vec::with_capacity(4 + archived.len());
        out.extend_from_slice(&CONNECTIONLESS_SEQUENCE.to_le_bytes());
        out.extend_from_slice(&archived);
        Ok(out)
    }

    pub fn decode(datagram: &[u8]) -> Result<Self, HandshakeError> {
        if !is_connectionless(datagram) {
            return Err(HandshakeError::NotConnectionless);
        }

        // The archive starts 4 bytes into the datagram; bytecheck wants it aligned.
        let body = &datagram[4..];
        let mut aligned = AlignedVec::<16>::with_capacity(body.len());
        aligned.extend_from_slice(body);

        rkyv::from_bytes::<Self, rancor::Error>(&aligned).map_err(HandshakeError::Deserialize)
    }
}
