use std::time::Instant;

use proptest::prelude::*;
use snapnet::net::{MsgReader, MsgWriter, NetChannel};
use snapnet::snapshot::{self, SnapshotDelta};
use snapnet::{EntityState, PlayerState, Snapshot, SnapshotRing};

fn entity_strategy() -> impl Strategy<Value = EntityState> {
    (
        (0u16..64, any::<u8>(), any::<u16>()),
        (any::<[i32; 3]>(), any::<[i32; 3]>(), any::<[u16; 3]>()),
        (any::<u16>(), any::<u16>(), any::<u8>(), any::<u8>()),
        (any::<u8>(), any::<u8>(), any::<u16>()),
    )
        .prop_map(
            |(
                (number, entity_type, flags),
                (origin, velocity, angles),
                (model_index, frame, legs_anim, torso_anim),
                (event, event_parm, other_entity),
            )| EntityState {
                number,
                entity_type,
                flags,
                origin,
                velocity,
                angles,
                model_index,
                frame,
                legs_anim,
                torso_anim,
                event,
                event_parm,
                other_entity,
            },
        )
}

fn player_strategy() -> impl Strategy<Value = PlayerState> {
    (
        (any::<u32>(), any::<u8>(), any::<u16>()),
        (any::<[i32; 3]>(), any::<[i32; 3]>(), any::<[u16; 3]>()),
        (any::<i8>(), any::<u16>(), any::<u8>(), any::<i16>(), any::<i16>()),
    )
        .prop_map(
            |(
                (command_time, pm_type, pm_flags),
                (origin, velocity, view_angles),
                (view_height, ground_entity, weapon, health, armor),
            )| PlayerState {
                command_time,
                pm_type,
                pm_flags,
                origin,
                velocity,
                view_angles,
                view_height,
                ground_entity,
                weapon,
                health,
                armor,
            },
        )
}

fn snapshot_strategy() -> impl Strategy<Value = Snapshot> {
    (
        any::<u32>(),
        player_strategy(),
        prop::collection::vec(entity_strategy(), 0..24),
        prop::collection::vec(any::<u8>(), 0..8),
    )
        .prop_map(|(time, player, entities, area)| Snapshot::new(time, player, entities, area))
}

/// Encodes, pushes the delta through the bit stream, and decodes it again.
fn over_the_wire(baseline: Option<&Snapshot>, current: &Snapshot) -> Snapshot {
    let delta = snapshot::encode(baseline, current);
    let mut w = MsgWriter::new();
    delta.write(&mut w);
    let bytes = w.into_bytes();

    let read = SnapshotDelta::read(&mut MsgReader::new(&bytes)).unwrap();
    assert_eq!(read, delta);
    snapshot::decode(baseline, &read).unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn prop_delta_reproduces_current(base in snapshot_strategy(), next in snapshot_strategy()) {
        let mut ring = SnapshotRing::new(4);
        let base_frame = ring.store(base);
        let next_frame = ring.store(next);
        let baseline = ring.get(base_frame).unwrap();
        let current = ring.get(next_frame).unwrap();

        prop_assert_eq!(&over_the_wire(Some(baseline), current), current);
        prop_assert_eq!(&over_the_wire(None, current), current);
    }

    #[test]
    fn prop_unchanged_snapshot_sends_no_entities(base in snapshot_strategy()) {
        let delta = snapshot::encode(Some(&base), &base);
        prop_assert!(delta.entities.is_empty());
        prop_assert!(delta.player.is_empty());
    }

    #[test]
    fn prop_fragments_reassemble_in_any_order(
        payload in prop::collection::vec(any::<u8>(), 1400..6000),
        seed in any::<u64>(),
    ) {
        let now = Instant::now();
        let mut sender = NetChannel::default();
        let mut receiver = NetChannel::default();

        let mut datagrams = sender.transmit(&payload, now).unwrap().datagrams;
        prop_assert!(datagrams.len() > 1);

        // deterministic shuffle driven by the seed
        let mut state = seed | 1;
        for i in (1..datagrams.len()).rev() {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            datagrams.swap(i, (state % (i as u64 + 1)) as usize);
        }

        let mut assembled = None;
        for datagram in &datagrams {
            if let Some(message) = receiver.process(datagram, now).unwrap() {
                assembled = Some(message);
            }
        }
        prop_assert_eq!(assembled, Some(payload));
    }
}
