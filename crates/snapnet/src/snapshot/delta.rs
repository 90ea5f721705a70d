//! Baseline + delta snapshot encoding.
//!
//! Both directions are pure functions over immutable snapshots. The encoder
//! merge-scans two number-sorted entity lists and emits, per entity, one of:
//! changed fields against the baseline entry, a full field set against the
//! all-zero default (new entity), or a bare removal. Entities that did not
//! change are not mentioned at all and carry over on decode.

use std::iter::Peekable;
use std::slice::Iter;

use super::entity::EntityState;
use super::fields::{FieldDelta, FieldSpec, NetFields};
use super::frame::{MAX_AREA_BYTES, Snapshot};
use super::player::PlayerState;
use crate::error::{DeltaError, MsgError};
use crate::net::protocol::{ENTITY_NUM_BITS, MAX_ENTITIES, NO_FRAME};
use crate::net::{MsgReader, MsgWriter};

const KIND_BITS: u8 = 2;
const KIND_CHANGED: u32 = 0;
const KIND_ADDED: u32 = 1;
const KIND_REMOVED: u32 = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityDelta {
    Changed { number: u16, fields: FieldDelta },
    Added { number: u16, fields: FieldDelta },
    Removed { number: u16 },
}

impl EntityDelta {
    pub fn number(&self) -> u16 {
        match self {
            Self::Changed { number, .. } | Self::Added { number, .. } | Self::Removed { number } => {
                *number
            }
        }
    }
}

/// Entity portion of a snapshot delta, ordered by entity number.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DeltaSet {
    pub entries: Vec<EntityDelta>,
}

impl DeltaSet {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn write(&self, w: &mut MsgWriter) {
        w.write_u16(self.entries.len() as u16);
        for entry in &self.entries {
            w.write_bits(entry.number() as u32, ENTITY_NUM_BITS);
            match entry {
                EntityDelta::Changed { fields, .. } => {
                    w.write_bits(KIND_CHANGED, KIND_BITS);
                    fields.write::<EntityState>(w);
                }
                EntityDelta::Added { fields, .. } => {
                    w.write_bits(KIND_ADDED, KIND_BITS);
                    fields.write::<EntityState>(w);
                }
                EntityDelta::Removed { .. } => w.write_bits(KIND_REMOVED, KIND_BITS),
            }
        }
    }

    pub fn read(r: &mut MsgReader<'_>) -> Result<Self, MsgError> {
        let count = r.read_u16()? as usize;
        if count > MAX_ENTITIES {
            return Err(MsgError::OutOfRange {
                what: "entity entry count",
                value: count as u64,
            });
        }

        let mut entries = Vec::with_capacity(count);
        for _ in 0..count {
            let number = r.read_bits(ENTITY_NUM_BITS)? as u16;
            let entry = match r.read_bits(KIND_BITS)? {
                KIND_CHANGED => EntityDelta::Changed {
                    number,
                    fields: FieldDelta::read::<EntityState>(r)?,
                },
                KIND_ADDED => EntityDelta::Added {
                    number,
                    fields: FieldDelta::read::<EntityState>(r)?,
                },
                KIND_REMOVED => EntityDelta::Removed { number },
                other => {
                    return Err(MsgError::OutOfRange {
                        what: "entity delta kind",
                        value: other as u64,
                    });
                }
            };
            entries.push(entry);
        }
        Ok(Self { entries })
    }
}

fn full_mask_bits(fields: &[FieldSpec]) -> usize {
    fields.len() + fields.iter().map(|f| f.bits as usize).sum::<usize>()
}

/// Upper bound on the encoded size of a snapshot that carries at most
/// `entities` entities, diffed against a baseline that held at most as many.
/// Every current entity is charged as a full addition and every baseline
/// entity not in the current set as a removal.
pub fn max_snapshot_bytes(entities: usize) -> usize {
    let live = entities.min(MAX_ENTITIES);
    let entry_head = ENTITY_NUM_BITS as usize + KIND_BITS as usize;
    let header = 8 * (4 + 4 + 4 + 1 + MAX_AREA_BYTES) + 16;
    let bits = header
        + full_mask_bits(PlayerState::FIELDS)
        + live * (entry_head + full_mask_bits(EntityState::FIELDS))
        + live.min(MAX_ENTITIES - live) * entry_head;
    bits.div_ceil(8)
}

/// Merge-scan diff of two number-sorted entity lists.
pub fn encode_entities(baseline: &[EntityState], current: &[EntityState]) -> DeltaSet {
    let default = EntityState::default();
    let mut entries = Vec::new();
    let (mut i, mut j) = (0, 0);

    loop {
        match (baseline.get(i), current.get(j)) {
            (Some(old), Some(new)) if old.number == new.number => {
                let fields = FieldDelta::between(old, new);
                if !fields.is_empty() {
                    entries.push(EntityDelta::Changed {
                        number: new.number,
                        fields,
                    });
                }
                i += 1;
                j += 1;
            }
            (Some(old), Some(new)) if old.number < new.number => {
                entries.push(EntityDelta::Removed { number: old.number });
                i += 1;
            }
            (Some(old), None) => {
                entries.push(EntityDelta::Removed { number: old.number });
                i += 1;
            }
            (_, Some(new)) => {
                entries.push(EntityDelta::Added {
                    number: new.number,
                    fields: FieldDelta::between(&default, new),
                });
                j += 1;
            }
            (None, None) => break,
        }
    }

    DeltaSet { entries }
}

fn carry_below(
    number: u16,
    base: &mut Peekable<Iter<'_, EntityState>>,
    out: &mut Vec<EntityState>,
) -> Option<EntityState> {
    while let Some(entity) = base.next_if(|e| e.number < number) {
        out.push(*entity);
    }
    base.next_if(|e| e.number == number).copied()
}

/// Inverse of [`encode_entities`] against the same baseline.
pub fn decode_entities(
    baseline: &[EntityState],
    delta: &DeltaSet,
) -> Result<Vec<EntityState>, DeltaError> {
    let mut out = Vec::with_capacity(baseline.len() + delta.len());
    let mut base = baseline.iter().peekable();
    let mut last: Option<u16> = None;

    for entry in &delta.entries {
        let number = entry.number();
        if last.is_some_and(|l| number <= l) {
            return Err(DeltaError::Unsorted(number));
        }
        last = Some(number);

        let existing = carry_below(number, &mut base, &mut out);

        match entry {
            EntityDelta::Removed { .. } => {
                if existing.is_none() {
                    return Err(DeltaError::NotInBaseline(number));
                }
            }
            EntityDelta::Changed { fields, .. } => {
                let old = existing.ok_or(DeltaError::NotInBaseline(number))?;
                out.push(fields.apply(&old));
            }
            EntityDelta::Added { fields, .. } => {
                if existing.is_some() {
                    return Err(DeltaError::AlreadyInBaseline(number));
                }
                let mut state = fields.apply(&EntityState::default());
                state.number = number;
                out.push(state);
            }
        }
    }

    out.extend(base.copied());
    Ok(out)
}

/// Complete wire payload for one snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotDelta {
    pub frame: u32,
    pub baseline_frame: Option<u32>,
    pub server_time: u32,
    pub area_bits: Vec<u8>,
    pub player: FieldDelta,
    pub entities: DeltaSet,
}

impl SnapshotDelta {
    pub fn is_full(&self) -> bool {
        self.baseline_frame.is_none()
    }

    pub fn write(&self, w: &mut MsgWriter) {
        w.write_u32(self.frame);
        w.write_u32(self.baseline_frame.unwrap_or(NO_FRAME));
        w.write_u32(self.server_time);
        w.write_u8(self.area_bits.len() as u8);
        w.write_bytes(&self.area_bits);
        self.player.write::<PlayerState>(w);
        self.entities.write(w);
    }

    pub fn read(r: &mut MsgReader<'_>) -> Result<Self, MsgError> {
        let frame = r.read_u32()?;
        let baseline_frame = match r.read_u32()? {
            NO_FRAME => None,
            f => Some(f),
        };
        let server_time = r.read_u32()?;

        let area_len = r.read_u8()? as usize;
        if area_len > MAX_AREA_BYTES {
            return Err(MsgError::OutOfRange {
                what: "area bytes",
                value: area_len as u64,
            });
        }
        let area_bits = r.read_bytes(area_len)?;

        Ok(Self {
            frame,
            baseline_frame,
            server_time,
            area_bits,
            player: FieldDelta::read::<PlayerState>(r)?,
            entities: DeltaSet::read(r)?,
        })
    }
}

/// Encodes `current` against `baseline`; `None` produces a full snapshot in
/// which every entity is new against the default state.
pub fn encode(baseline: Option<&Snapshot>, current: &Snapshot) -> SnapshotDelta {
    let default_player = PlayerState::default();
    let (base_player, base_entities) = match baseline {
        Some(b) => (b.player(), b.entities()),
        None => (&default_player, &[][..]),
    };

    SnapshotDelta {
        frame: current.frame(),
        baseline_frame: baseline.map(|b| b.frame()),
        server_time: current.server_time(),
        area_bits: current.area_bits().to_vec(),
        player: FieldDelta::between(base_player, current.player()),
        entities: encode_entities(base_entities, current.entities()),
    }
}

/// Rebuilds the snapshot a delta describes. The caller must supply exactly
/// the baseline the delta names; anything else is refused rather than
/// producing a corrupt snapshot.
pub fn decode(baseline: Option<&Snapshot>, delta: &SnapshotDelta) -> Result<Snapshot, DeltaError> {
    let default_player = PlayerState::default();
    let (base_player, base_entities) = match (delta.baseline_frame, baseline) {
        (None, _) => (&default_player, &[][..]),
        (Some(expected), Some(b)) if b.frame() == expected => (b.player(), b.entities()),
        (expected, held) => {
            return Err(DeltaError::BaselineMismatch {
                expected,
                held: held.map(|b| b.frame()),
            });
        }
    };

    let entities = decode_entities(base_entities, &delta.entities)?;
    Ok(Snapshot::from_parts(
        delta.frame,
        delta.server_time,
        delta.player.apply(base_player),
        entities,
        delta.area_bits.clone(),
    ))
}

#[cfg(test)]
mod tests {
    use glam::Vec3;

    use super::*;
    use crate::snapshot::{EntityType, FieldMask, NetFields, SnapshotRing};

    fn entity(number: u16, x: f32) -> EntityState {
        let mut state = EntityState::new(number, EntityType::General);
        state.set_origin(Vec3::new(x, 0.0, 0.0));
        state
    }

    fn stored(ring: &mut SnapshotRing, entities: Vec<EntityState>) -> Snapshot {
        let frame = ring.store(Snapshot::new(
            ring.next_frame() * 50,
            PlayerState::default(),
            entities,
            vec![0xFF],
        ));
        ring.get(frame).cloned().unwrap()
    }

    #[test]
    fn unchanged_entities_are_omitted() {
        let mut ring = SnapshotRing::new(8);
        let base = stored(&mut ring, vec![entity(1, 1.0), entity(2, 2.0)]);
        let current = stored(&mut ring, vec![entity(1, 1.0), entity(2, 3.0)]);

        let delta = encode(Some(&base), &current);
        assert_eq!(delta.baseline_frame, Some(base.frame()));
        assert_eq!(delta.entities.len(), 1);

        match &delta.entities.entries[0] {
            EntityDelta::Changed { number, fields } => {
                assert_eq!(*number, 2);
                // only origin[0] moved
                assert_eq!(fields.mask, FieldMask::field(2));
                assert_eq!(fields.values, vec![24]);
            }
            other => panic!("unexpected entry {other:?}"),
        }
        assert_eq!(decode(Some(&base), &delta).unwrap(), current);
    }

    #[test]
    fn removals_and_additions_merge() {
        let mut ring = SnapshotRing::new(8);
        let base = stored(&mut ring, vec![entity(1, 1.0), entity(4, 4.0), entity(9, 9.0)]);
        let current = stored(&mut ring, vec![entity(2, 2.0), entity(4, 4.0), entity(10, 1.0)]);

        let delta = encode(Some(&base), &current);
        let kinds: Vec<(u16, &str)> = delta
            .entities
            .entries
            .iter()
            .map(|e| match e {
                EntityDelta::Changed { number, .. } => (*number, "changed"),
                EntityDelta::Added { number, .. } => (*number, "added"),
                EntityDelta::Removed { number } => (*number, "removed"),
            })
            .collect();
        assert_eq!(
            kinds,
            vec![(1, "removed"), (2, "added"), (9, "removed"), (10, "added")]
        );
        assert_eq!(decode(Some(&base), &delta).unwrap(), current);
    }

    #[test]
    fn full_snapshot_treats_everything_as_new() {
        let mut ring = SnapshotRing::new(8);
        let current = stored(&mut ring, vec![EntityState::new(5, EntityType::General)]);

        let delta = encode(None, &current);
        assert!(delta.is_full());
        // an all-default entity is still announced, with an empty mask
        assert_eq!(
            delta.entities.entries,
            vec![EntityDelta::Added {
                number: 5,
                fields: FieldDelta::default()
            }]
        );
        assert_eq!(decode(None, &delta).unwrap(), current);
    }

    #[test]
    fn wire_form_decodes_identically() {
        let mut ring = SnapshotRing::new(8);
        let base = stored(&mut ring, vec![entity(1, -5.5), entity(3, 7.25)]);
        let mut player = PlayerState::default();
        player.health = -20;
        player.command_time = 4000;
        let frame = ring.store(Snapshot::new(
            900,
            player,
            vec![entity(1, -6.0), entity(8, 100.0)],
            vec![1, 2, 3],
        ));
        let current = ring.get(frame).cloned().unwrap();

        let delta = encode(Some(&base), &current);
        let mut w = MsgWriter::new();
        delta.write(&mut w);
        let bytes = w.into_bytes();
        let read = SnapshotDelta::read(&mut MsgReader::new(&bytes)).unwrap();

        assert_eq!(read, delta);
        assert_eq!(decode(Some(&base), &read).unwrap(), current);
    }

    #[test]
    fn worst_case_snapshot_stays_within_bound() {
        let saturated = |number: u16| {
            let mut state = EntityState::default();
            for (index, spec) in EntityState::FIELDS.iter().enumerate() {
                state.set_field(index, spec.clamp(i32::MAX));
            }
            state.number = number;
            state
        };
        let mut player = PlayerState::default();
        for (index, spec) in PlayerState::FIELDS.iter().enumerate() {
            player.set_field(index, spec.clamp(i32::MAX));
        }

        let mut ring = SnapshotRing::new(8);
        let base = stored(&mut ring, (0..16).map(saturated).collect());
        let frame = ring.store(Snapshot::new(
            u32::MAX,
            player,
            (16..32).map(saturated).collect::<Vec<_>>(),
            vec![0xFF; MAX_AREA_BYTES],
        ));
        let current = ring.get(frame).cloned().unwrap();

        let delta = encode(Some(&base), &current);
        assert_eq!(delta.entities.len(), 32);
        let mut w = MsgWriter::new();
        delta.write(&mut w);
        assert!(w.into_bytes().len() <= max_snapshot_bytes(16));
        assert!(max_snapshot_bytes(256) < max_snapshot_bytes(257));
    }

    #[test]
    fn wrong_baseline_is_refused() {
        let mut ring = SnapshotRing::new(8);
        let a = stored(&mut ring, vec![entity(1, 1.0)]);
        let b = stored(&mut ring, vec![entity(1, 2.0)]);
        let c = stored(&mut ring, vec![entity(1, 3.0)]);

        let delta = encode(Some(&a), &c);
        assert!(matches!(
            decode(Some(&b), &delta),
            Err(DeltaError::BaselineMismatch { .. })
        ));
        assert!(matches!(
            decode(None, &delta),
            Err(DeltaError::BaselineMismatch { held: None, .. })
        ));
    }

    #[test]
    fn malformed_delta_sets_are_rejected() {
        let base = vec![entity(1, 1.0)];

        let unsorted = DeltaSet {
            entries: vec![
                EntityDelta::Removed { number: 1 },
                EntityDelta::Removed { number: 1 },
            ],
        };
        assert_eq!(
            decode_entities(&base, &unsorted),
            Err(DeltaError::Unsorted(1))
        );

        let ghost = DeltaSet {
            entries: vec![EntityDelta::Removed { number: 2 }],
        };
        assert_eq!(
            decode_entities(&base, &ghost),
            Err(DeltaError::NotInBaseline(2))
        );

        let double = DeltaSet {
            entries: vec![EntityDelta::Added {
                number: 1,
                fields: FieldDelta::default(),
            }],
        };
        assert_eq!(
            decode_entities(&base, &double),
            Err(DeltaError::AlreadyInBaseline(1))
        );
    }

    #[test]
    fn player_delta_only_sends_changes() {
        let mut before = PlayerState::default();
        before.weapon = 3;
        let mut after = before;
        after.health = 75;

        let delta = FieldDelta::between(&before, &after);
        assert_eq!(delta.values, vec![75]);
        assert_eq!(delta.apply(&before), after);
        assert_eq!(PlayerState::FIELDS[15].name, "health");
    }
}
