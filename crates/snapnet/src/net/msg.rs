//! Bit-level message buffers.
//!
//! Bits are packed least-significant first into consecutive bytes, so a value
//! written with `write_bits(v, n)` occupies the next `n` bits of the stream
//! regardless of byte alignment. Multi-byte integers are therefore little
//! endian when the stream happens to be byte aligned.

use crate::error::MsgError;

/// Upper bound on any length-prefixed string carried in a message.
pub const MAX_STRING_LEN: usize = 1024;

#[inline]
fn low_mask(bits: u8) -> u32 {
    if bits >= 32 {
        u32::MAX
    } else {
        (1u32 << bits) - 1
    }
}

#[derive(Debug, Clone, Default)]
pub struct MsgWriter {
    data: Vec<u8>,
    bit_len: usize,
}

impl MsgWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(bytes: usize) -> Self {
        Self {
            data: Vec::with_capacity(bytes),
            bit_len: 0,
        }
    }

    pub fn write_bits(&mut self, value: u32, bits: u8) {
        debug_assert!(bits <= 32);
        let value = value & low_mask(bits);

        for i in 0..bits {
            let offset = self.bit_len % 8;
            if offset == 0 {
                self.data.push(0);
            }
            if (value >> i) & 1 != 0 {
                let last = self.data.len() - 1;
                self.data[last] |= 1 << offset;
            }
            self.bit_len += 1;
        }
    }

    /// Two's complement value truncated to `bits`; the reader sign-extends.
    pub fn write_signed(&mut self, value: i32, bits: u8) {
        self.write_bits(value as u32, bits);
    }

    pub fn write_bool(&mut self, value: bool) {
        self.write_bits(value as u32, 1);
    }

    pub fn write_u8(&mut self, value: u8) {
        self.write_bits(value as u32, 8);
    }

    pub fn write_u16(&mut self, value: u16) {
        self.write_bits(value as u32, 16);
    }

    pub fn write_u32(&mut self, value: u32) {
        self.write_bits(value, 32);
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        if self.bit_len % 8 == 0 {
            self.data.extend_from_slice(bytes);
            self.bit_len += bytes.len() * 8;
        } else {
            for &b in bytes {
                self.write_u8(b);
            }
        }
    }

    /// Length-prefixed (16 bit) UTF-8 string. Strings longer than
    /// [`MAX_STRING_LEN`] are truncated on a char boundary.
    pub fn write_string(&mut self, value: &str) {
        let mut end = value.len().min(MAX_STRING_LEN);
        while !value.is_char_boundary(end) {
            end -= 1;
        }
        self.write_u16(end as u16);
        self.write_bytes(&value.as_bytes()[..end]);
    }

    pub fn bit_len(&self) -> usize {
        self.bit_len
    }

    pub fn byte_len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bit_len == 0
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }
}

#[derive(Debug, Clone)]
pub struct MsgReader<'a> {
    data: &'a [u8],
    bit_pos: usize,
}

impl<'a> MsgReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, bit_pos: 0 }
    }

    pub fn remaining_bits(&self) -> usize {
        (self.data.len() * 8).saturating_sub(self.bit_pos)
    }

    pub fn bit_pos(&self) -> usize {
        self.bit_pos
    }

    pub fn read_bits(&mut self, bits: u8) -> Result<u32, MsgError> {
        debug_assert!(bits <= 32);
        if self.remaining_bits() < bits as usize {
            return Err(MsgError::Overrun {
                needed: bits as usize,
                remaining: self.remaining_bits(),
            });
        }

        let mut value = 0u32;
        for i in 0..bits {
            let byte = self.data[self.bit_pos / 8];
            if (byte >> (self.bit_pos % 8)) & 1 != 0 {
                value |= 1 << i;
            }
            self.bit_pos += 1;
        }
        Ok(value)
    }

    pub fn read_signed(&mut self, bits: u8) -> Result<i32, MsgError> {
        let raw = self.read_bits(bits)?;
        if bits == 0 || bits >= 32 {
            return Ok(raw as i32);
        }
        let shift = 32 - bits as u32;
        Ok(((raw << shift) as i32) >> shift)
    }

    pub fn read_bool(&mut self) -> Result<bool, MsgError> {
        Ok(self.read_bits(1)? != 0)
    }

    pub fn read_u8(&mut self) -> Result<u8, MsgError> {
        Ok(self.read_bits(8)? as u8)
    }

    pub fn read_u16(&mut self) -> Result<u16, MsgError> {
        Ok(self.read_bits(16)? as u16)
    }

    pub fn read_u32(&mut self) -> Result<u32, MsgError> {
        self.read_bits(32)
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>, MsgError> {
        if self.remaining_bits() < len * 8 {
            return Err(MsgError::Overrun {
                needed: len * 8,
                remaining: self.remaining_bits(),
            });
        }

        if self.bit_pos % 8 == 0 {
            let start = self.bit_pos / 8;
            self.bit_pos += len * 8;
            return Ok(self.data[start..start + len].to_vec());
        }

        (0..len).map(|_| self.read_u8()).collect()
    }

    pub fn read_string(&mut self) -> Result<String, MsgError> {
        let len = self.read_u16()? as usize;
        if len > MAX_STRING_LEN {
            return Err(MsgError::StringTooLong {
                len,
                max: MAX_STRING_LEN,
            });
        }
        let bytes = self.read_bytes(len)?;
        String::from_utf8(bytes).map_err(|_| MsgError::InvalidString)
    }
}
