//! Field-level diffing shared by entity and player state.
//!
//! A networked record exposes its members as a fixed table of integer fields.
//! A delta against a baseline is the bitmask of fields that differ followed by
//! only those values, each written with the width its [`FieldSpec`] declares.

use bitflags::bitflags;

use crate::error::MsgError;
use crate::net::{MsgReader, MsgWriter};

bitflags! {
    /// Bit `i` set means field `i` of the record's field table changed.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct FieldMask: u32 {
        const _ = !0;
    }
}

impl FieldMask {
    pub fn field(index: usize) -> Self {
        Self::from_bits_retain(1 << index)
    }

    pub fn has(self, index: usize) -> bool {
        self.bits() & (1 << index) != 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub bits: u8,
    pub signed: bool,
}

impl FieldSpec {
    pub const fn unsigned(name: &'static str, bits: u8) -> Self {
        Self {
            name,
            bits,
            signed: false,
        }
    }

    pub const fn signed(name: &'static str, bits: u8) -> Self {
        Self {
            name,
            bits,
            signed: true,
        }
    }

    /// Clamps a value into what this field can carry on the wire.
    pub fn clamp(&self, value: i32) -> i32 {
        if self.bits >= 32 {
            return value;
        }
        if self.signed {
            let max = (1i32 << (self.bits - 1)) - 1;
            value.clamp(-max - 1, max)
        } else {
            let max = ((1i64 << self.bits) - 1) as i32;
            value.clamp(0, max)
        }
    }

    fn write(&self, w: &mut MsgWriter, value: i32) {
        if self.signed {
            w.write_signed(value, self.bits);
        } else {
            w.write_bits(value as u32, self.bits);
        }
    }

    fn read(&self, r: &mut MsgReader<'_>) -> Result<i32, MsgError> {
        if self.signed {
            r.read_signed(self.bits)
        } else {
            Ok(r.read_bits(self.bits)? as i32)
        }
    }
}

/// A fixed-layout record whose all-default value is the implicit baseline.
pub trait NetFields: Default + Clone + PartialEq {
    const FIELDS: &'static [FieldSpec];

    fn field(&self, index: usize) -> i32;
    fn set_field(&mut self, index: usize, value: i32);

    /// Copy with every field clamped to its wire range, so that what is
    /// compared is exactly what the decoder will reproduce.
    fn normalized(&self) -> Self {
        let mut out = self.clone();
        for (index, spec) in Self::FIELDS.iter().enumerate() {
            out.set_field(index, spec.clamp(self.field(index)));
        }
        out
    }
}

/// Changed-field mask plus the new values of exactly those fields.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FieldDelta {
    pub mask: FieldMask,
    pub values: Vec<i32>,
}

impl FieldDelta {
    pub fn between<T: NetFields>(from: &T, to: &T) -> Self {
        let mut delta = Self::default();
        for index in 0..T::FIELDS.len() {
            let value = to.field(index);
            if from.field(index) != value {
                delta.mask |= FieldMask::field(index);
                delta.values.push(value);
            }
        }
        delta
    }

    pub fn is_empty(&self) -> bool {
        self.mask.is_empty()
    }

    pub fn apply<T: NetFields>(&self, base: &T) -> T {
        let mut out = base.clone();
        let mut values = self.values.iter();
        for index in 0..T::FIELDS.len() {
            if self.mask.has(index) {
                if let Some(&value) = values.next() {
                    out.set_field(index, value);
                }
            }
        }
        out
    }

    pub fn write<T: NetFields>(&self, w: &mut MsgWriter) {
        w.write_bits(self.mask.bits(), T::FIELDS.len() as u8);
        let mut values = self.values.iter();
        for (index, spec) in T::FIELDS.iter().enumerate() {
            if self.mask.has(index) {
                spec.write(w, values.next().copied().unwrap_or_default());
            }
        }
    }

    pub fn read<T: NetFields>(r: &mut MsgReader<'_>) -> Result<Self, MsgError> {
        let mask = FieldMask::from_bits_retain(r.read_bits(T::FIELDS.len() as u8)?);
        let mut values = Vec::with_capacity(mask.bits().count_ones() as usize);
        for (index, spec) in T::FIELDS.iter().enumerate() {
            if mask.has(index) {
                values.push(spec.read(r)?);
            }
        }
        Ok(Self { mask, values })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_respects_width_and_sign() {
        let s = FieldSpec::signed("x", 8);
        assert_eq!(s.clamp(200), 127);
        assert_eq!(s.clamp(-200), -128);

        let u = FieldSpec::unsigned("y", 10);
        assert_eq!(u.clamp(-1), 0);
        assert_eq!(u.clamp(5000), 1023);

        let wide = FieldSpec::unsigned("t", 32);
        assert_eq!(wide.clamp(-7), -7);
    }

    #[test]
    fn mask_bits_address_fields() {
        let mask = FieldMask::field(0) | FieldMask::field(17);
        assert!(mask.has(0));
        assert!(mask.has(17));
        assert!(!mask.has(1));
    }
}
