mod delta;
mod entity;
mod fields;
mod frame;
mod player;
mod ring;

pub use delta::{
    DeltaSet, EntityDelta, SnapshotDelta, decode, decode_entities, encode, encode_entities,
    max_snapshot_bytes,
};
pub use entity::{
    COORD_SCALE, Entity, EntityState, EntityType, ORIGIN_BITS, VELOCITY_BITS, angle_to_short,
    dequantize_coord, quantize_coord, short_to_angle,
};
pub use fields::{FieldDelta, FieldMask, FieldSpec, NetFields};
pub use frame::{MAX_AREA_BYTES, Snapshot};
pub use player::PlayerState;
pub use ring::SnapshotRing;
