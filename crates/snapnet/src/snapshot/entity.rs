use glam::Vec3;

use super::fields::{FieldSpec, NetFields};
use crate::net::protocol::MAX_ENTITIES;

/// Fixed-point scale for positions and velocities (1/8 unit).
pub const COORD_SCALE: f32 = 8.0;
pub const ORIGIN_BITS: u8 = 24;
pub const VELOCITY_BITS: u8 = 20;

fn signed_limit(bits: u8) -> (i32, i32) {
    let max = (1i32 << (bits - 1)) - 1;
    (-max - 1, max)
}

pub fn quantize_coord(value: f32, bits: u8) -> i32 {
    let (min, max) = signed_limit(bits);
    // NaN quantizes to zero
    ((value * COORD_SCALE).round() as i32).clamp(min, max)
}

pub fn dequantize_coord(value: i32) -> f32 {
    value as f32 / COORD_SCALE
}

/// Degrees to a 16-bit fraction of a full turn.
pub fn angle_to_short(degrees: f32) -> u16 {
    ((degrees * 65536.0 / 360.0).round() as i64 & 0xFFFF) as u16
}

pub fn short_to_angle(value: u16) -> f32 {
    value as f32 * 360.0 / 65536.0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum EntityType {
    #[default]
    General = 0,
    Player = 1,
    Item = 2,
    Missile = 3,
    Mover = 4,
    Beam = 5,
    Portal = 6,
    Speaker = 7,
    Event = 8,
}

impl From<u8> for EntityType {
    fn from(value: u8) -> Self {
        match value {
            1 => Self::Player,
            2 => Self::Item,
            3 => Self::Missile,
            4 => Self::Mover,
            5 => Self::Beam,
            6 => Self::Portal,
            7 => Self::Speaker,
            8 => Self::Event,
            _ => Self::General,
        }
    }
}

/// Networked entity record. Every field is already quantized; copies of it
/// are what snapshots hold, never references into the game world.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct EntityState {
    pub number: u16,
    pub entity_type: u8,
    pub flags: u16,
    pub origin: [i32; 3],
    pub velocity: [i32; 3],
    pub angles: [u16; 3],
    pub model_index: u16,
    pub frame: u16,
    pub legs_anim: u8,
    pub torso_anim: u8,
    pub event: u8,
    pub event_parm: u8,
    pub other_entity: u16,
}

impl EntityState {
    pub fn new(number: u16, entity_type: EntityType) -> Self {
        Self {
            number,
            entity_type: entity_type as u8,
            ..Self::default()
        }
    }

    pub fn origin(&self) -> Vec3 {
        Vec3::new(
            dequantize_coord(self.origin[0]),
            dequantize_coord(self.origin[1]),
            dequantize_coord(self.origin[2]),
        )
    }

    pub fn set_origin(&mut self, origin: Vec3) {
        self.origin = [
            quantize_coord(origin.x, ORIGIN_BITS),
            quantize_coord(origin.y, ORIGIN_BITS),
            quantize_coord(origin.z, ORIGIN_BITS),
        ];
    }

    pub fn velocity(&self) -> Vec3 {
        Vec3::new(
            dequantize_coord(self.velocity[0]),
            dequantize_coord(self.velocity[1]),
            dequantize_coord(self.velocity[2]),
        )
    }

    pub fn set_velocity(&mut self, velocity: Vec3) {
        self.velocity = [
            quantize_coord(velocity.x, VELOCITY_BITS),
            quantize_coord(velocity.y, VELOCITY_BITS),
            quantize_coord(velocity.z, VELOCITY_BITS),
        ];
    }

    pub fn angles(&self) -> Vec3 {
        Vec3::new(
            short_to_angle(self.angles[0]),
            short_to_angle(self.angles[1]),
            short_to_angle(self.angles[2]),
        )
    }

    pub fn set_angles(&mut self, degrees: Vec3) {
        self.angles = [
            angle_to_short(degrees.x),
            angle_to_short(degrees.y),
            angle_to_short(degrees.z),
        ];
    }
}

impl NetFields for EntityState {
    const FIELDS: &'static [FieldSpec] = &[
        FieldSpec::unsigned("entity_type", 8),
        FieldSpec::unsigned("flags", 16),
        FieldSpec::signed("origin[0]", ORIGIN_BITS),
        FieldSpec::signed("origin[1]", ORIGIN_BITS),
        FieldSpec::signed("origin[2]", ORIGIN_BITS),
        FieldSpec::signed("velocity[0]", VELOCITY_BITS),
        FieldSpec::signed("velocity[1]", VELOCITY_BITS),
        FieldSpec::signed("velocity[2]", VELOCITY_BITS),
        FieldSpec::unsigned("angles[0]", 16),
        FieldSpec::unsigned("angles[1]", 16),
        FieldSpec::unsigned("angles[2]", 16),
        FieldSpec::unsigned("model_index", 10),
        FieldSpec::unsigned("frame", 16),
        FieldSpec::unsigned("legs_anim", 8),
        FieldSpec::unsigned("torso_anim", 8),
        FieldSpec::unsigned("event", 8),
        FieldSpec::unsigned("event_parm", 8),
        FieldSpec::unsigned("other_entity", 10),
    ];

    fn field(&self, index: usize) -> i32 {
        match index {
            0 => self.entity_type as i32,
            1 => self.flags as i32,
            2..=4 => self.origin[index - 2],
            5..=7 => self.velocity[index - 5],
            8..=10 => self.angles[index - 8] as i32,
            11 => self.model_index as i32,
            12 => self.frame as i32,
            13 => self.legs_anim as i32,
            14 => self.torso_anim as i32,
            15 => self.event as i32,
            16 => self.event_parm as i32,
            17 => self.other_entity as i32,
            _ => 0,
        }
    }

    fn set_field(&mut self, index: usize, value: i32) {
        match index {
            0 => self.entity_type = value as u8,
            1 => self.flags = value as u16,
            2..=4 => self.origin[index - 2] = value,
            5..=7 => self.velocity[index - 5] = value,
            8..=10 => self.angles[index - 8] = value as u16,
            11 => self.model_index = value as u16,
            12 => self.frame = value as u16,
            13 => self.legs_anim = value as u8,
            14 => self.torso_anim = value as u8,
            15 => self.event = value as u8,
            16 => self.event_parm = value as u8,
            17 => self.other_entity = value as u16,
            _ => {}
        }
    }
}

/// Game-side entity in float space, as a snapshot source would hold it.
#[derive(Debug, Clone)]
pub struct Entity {
    pub id: u16,
    pub entity_type: EntityType,
    pub position: Vec3,
    pub velocity: Vec3,
    pub angles: Vec3,
    pub model_index: u16,
    pub animation_time: f32,
    pub legs_anim: u8,
    pub torso_anim: u8,
    pub event: u8,
    pub event_parm: u8,
    pub flags: u16,
}

impl Entity {
    pub fn new(id: u16, entity_type: EntityType) -> Self {
        Self {
            id,
            entity_type,
            position: Vec3::ZERO,
            velocity: Vec3::ZERO,
            angles: Vec3::ZERO,
            model_index: 0,
            animation_time: 0.0,
            legs_anim: 0,
            torso_anim: 0,
            event: 0,
            event_parm: 0,
            flags: 0,
        }
    }

    pub fn player(id: u16, spawn_position: Vec3) -> Self {
        Self {
            position: spawn_position,
            ..Self::new(id, EntityType::Player)
        }
    }

    pub fn is_networkable(&self) -> bool {
        (self.id as usize) < MAX_ENTITIES
    }

    pub fn to_network_state(&self) -> EntityState {
        let mut state = EntityState::new(self.id, self.entity_type);
        state.set_origin(self.position);
        state.set_velocity(self.velocity);
        state.set_angles(self.angles);
        state.model_index = self.model_index;
        state.frame = (self.animation_time.max(0.0) * 10.0) as u16;
        state.legs_anim = self.legs_anim;
        state.torso_anim = self.torso_anim;
        state.event = self.event;
        state.event_parm = self.event_parm;
        state.flags = self.flags;
        state.normalized()
    }

    pub fn from_network_state(state: &EntityState) -> Self {
        Self {
            id: state.number,
            entity_type: EntityType::from(state.entity_type),
            position: state.origin(),
            velocity: state.velocity(),
            angles: state.angles(),
            model_index: state.model_index,
            animation_time: state.frame as f32 / 10.0,
            legs_anim: state.legs_anim,
            torso_anim: state.torso_anim,
            event: state.event,
            event_parm: state.event_parm,
            flags: state.flags,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_roundtrip() {
        let mut entity = Entity::player(42, Vec3::new(10.0, 5.0, -3.0));
        entity.velocity = Vec3::new(2.5, -1.0, 0.5);
        entity.angles = Vec3::new(0.0, 90.0, 0.0);

        let network_state = entity.to_network_state();
        let reconstructed = Entity::from_network_state(&network_state);

        assert_eq!(entity.id, reconstructed.id);
        assert!((entity.position - reconstructed.position).length() < 0.125);
        assert!((entity.velocity - reconstructed.velocity).length() < 0.125);
        assert!((entity.angles - reconstructed.angles).length() < 0.01);
    }

    #[test]
    fn quantization_is_stable() {
        let q = quantize_coord(123.456, ORIGIN_BITS);
        assert_eq!(quantize_coord(dequantize_coord(q), ORIGIN_BITS), q);
        assert_eq!(quantize_coord(f32::NAN, ORIGIN_BITS), 0);
        assert_eq!(quantize_coord(1.0e9, ORIGIN_BITS), (1 << 23) - 1);
    }

    #[test]
    fn angles_wrap_into_sixteen_bits() {
        assert_eq!(angle_to_short(360.0), 0);
        assert_eq!(angle_to_short(-90.0), angle_to_short(270.0));
    }

    #[test]
    fn normalized_clamps_narrow_fields() {
        let mut state = EntityState::new(1, EntityType::Item);
        state.model_index = 5000;
        state.origin[0] = i32::MAX;
        let normalized = state.normalized();
        assert_eq!(normalized.model_index, 1023);
        assert_eq!(normalized.origin[0], (1 << 23) - 1);
        assert_eq!(normalized.number, 1);
    }

    #[test]
    fn field_table_matches_accessors() {
        let mut state = EntityState::default();
        for index in 0..EntityState::FIELDS.len() {
            state.set_field(index, index as i32 + 1);
        }
        for index in 0..EntityState::FIELDS.len() {
            assert_eq!(state.field(index), index as i32 + 1);
        }
    }
}
