use glam::Vec3;

use super::entity::{
    ORIGIN_BITS, VELOCITY_BITS, angle_to_short, dequantize_coord, quantize_coord, short_to_angle,
};
use super::fields::{FieldSpec, NetFields};

/// The receiving client's own view state, delta-compressed like entities.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct PlayerState {
    pub command_time: u32,
    pub pm_type: u8,
    pub pm_flags: u16,
    pub origin: [i32; 3],
    pub velocity: [i32; 3],
    pub view_angles: [u16; 3],
    pub view_height: i8,
    pub ground_entity: u16,
    pub weapon: u8,
    pub health: i16,
    pub armor: i16,
}

impl PlayerState {
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

    pub fn set_velocity(&mut self, velocity: Vec3) {
        self.velocity = [
            quantize_coord(velocity.x, VELOCITY_BITS),
            quantize_coord(velocity.y, VELOCITY_BITS),
            quantize_coord(velocity.z, VELOCITY_BITS),
        ];
    }

    pub fn view_angles(&self) -> Vec3 {
        Vec3::new(
            short_to_angle(self.view_angles[0]),
            short_to_angle(self.view_angles[1]),
            short_to_angle(self.view_angles[2]),
        )
    }

    pub fn set_view_angles(&mut self, degrees: Vec3) {
        self.view_angles = [
            angle_to_short(degrees.x),
            angle_to_short(degrees.y),
            angle_to_short(degrees.z),
        ];
    }
}

impl NetFields for PlayerState {
    const FIELDS: &'static [FieldSpec] = &[
        FieldSpec::unsigned("command_time", 32),
        FieldSpec::unsigned("pm_type", 8),
        FieldSpec::unsigned("pm_flags", 16),
        FieldSpec::signed("origin[0]", ORIGIN_BITS),
        FieldSpec::signed("origin[1]", ORIGIN_BITS),
        FieldSpec::signed("origin[2]", ORIGIN_BITS),
        FieldSpec::signed("velocity[0]", VELOCITY_BITS),
        FieldSpec::signed("velocity[1]", VELOCITY_BITS),
        FieldSpec::signed("velocity[2]", VELOCITY_BITS),
        FieldSpec::unsigned("view_angles[0]", 16),
        FieldSpec::unsigned("view_angles[1]", 16),
        FieldSpec::unsigned("view_angles[2]", 16),
        FieldSpec::signed("view_height", 8),
        FieldSpec::unsigned("ground_entity", 10),
        FieldSpec::unsigned("weapon", 8),
        FieldSpec::signed("health", 16),
        FieldSpec::signed("armor", 16),
    ];

    fn field(&self, index: usize) -> i32 {
        match index {
            0 => self.command_time as i32,
            1 => self.pm_type as i32,
            2 => self.pm_flags as i32,
            3..=5 => self.origin[index - 3],
            6..=8 => self.velocity[index - 6],
            9..=11 => self.view_angles[index - 9] as i32,
            12 => self.view_height as i32,
            13 => self.ground_entity as i32,
            14 => self.weapon as i32,
            15 => self.health as i32,
            16 => self.armor as i32,
            _ => 0,
        }
    }

    fn set_field(&mut self, index: usize, value: i32) {
        match index {
            0 => self.command_time = value as u32,
            1 => self.pm_type = value as u8,
            2 => self.pm_flags = value as u16,
            3..=5 => self.origin[index - 3] = value,
            6..=8 => self.velocity[index - 6] = value,
            9..=11 => self.view_angles[index - 9] = value as u16,
            12 => self.view_height = value as i8,
            13 => self.ground_entity = value as u16,
            14 => self.weapon = value as u8,
            15 => self.health = value as i16,
            16 => self.armor = value as i16,
            _ => {}
        }
    }
}
