use super::entity::EntityState;
use super::fields::NetFields;
use super::player::PlayerState;
use crate::net::protocol::{MAX_ENTITIES, NO_FRAME};

pub const MAX_AREA_BYTES: usize = 32;

/// Immutable capture of what one client sees at one server frame.
///
/// Entities are kept sorted by number with no duplicates; the delta encoder's
/// merge-scan depends on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    frame: u32,
    server_time: u32,
    player: PlayerState,
    entities: Vec<EntityState>,
    area_bits: Vec<u8>,
}

impl Snapshot {
    /// Builds an unnumbered snapshot; the ring assigns the frame on store.
    /// Entities are quantized, sorted and de-duplicated (last write wins);
    /// numbers beyond the wire limit are dropped.
    pub fn new(
        server_time: u32,
        player: PlayerState,
        entities: impl IntoIterator<Item = EntityState>,
        mut area_bits: Vec<u8>,
    ) -> Self {
        let mut entities: Vec<EntityState> = entities
            .into_iter()
            .filter(|e| {
                let ok = (e.number as usize) < MAX_ENTITIES;
                if !ok {
                    log::debug!("dropping entity {} beyond wire limit", e.number);
                }
                ok
            })
            .map(|e| e.normalized())
            .collect();

        // stable sort keeps insertion order among equal numbers; keep the last
        entities.sort_by_key(|e| e.number);
        let mut deduped: Vec<EntityState> = Vec::with_capacity(entities.len());
        for entity in entities {
            match deduped.last_mut() {
                Some(last) if last.number == entity.number => *last = entity,
                _ => deduped.push(entity),
            }
        }

        area_bits.truncate(MAX_AREA_BYTES);

        Self {
            frame: NO_FRAME,
            server_time,
            player: player.normalized(),
            entities: deduped,
            area_bits,
        }
    }

    /// Keeps only the `limit` lowest-numbered entities.
    pub fn with_entity_limit(mut self, limit: usize) -> Self {
        if self.entities.len() > limit {
            log::debug!(
                "snapshot holds {} entities, sending the first {}",
                self.entities.len(),
                limit
            );
            self.entities.truncate(limit);
        }
        self
    }

    /// Trusted constructor for decoded data that is already ordered.
    pub(crate) fn from_parts(
        frame: u32,
        server_time: u32,
        player: PlayerState,
        entities: Vec<EntityState>,
        area_bits: Vec<u8>,
    ) -> Self {
        debug_assert!(entities.windows(2).all(|w| w[0].number < w[1].number));
        Self {
            frame,
            server_time,
            player,
            entities,
            area_bits,
        }
    }

    pub(crate) fn set_frame(&mut self, frame: u32) {
        self.frame = frame;
    }

    /// Frame number, or [`NO_FRAME`] before the snapshot is stored.
    pub fn frame(&self) -> u32 {
        self.frame
    }

    pub fn server_time(&self) -> u32 {
        self.server_time
    }

    pub fn player(&self) -> &PlayerState {
        &self.player
    }

    pub fn entities(&self) -> &[EntityState] {
        &self.entities
    }

    pub fn entity(&self, number: u16) -> Option<&EntityState> {
        self.entities
            .binary_search_by_key(&number, |e| e.number)
            .ok()
            .map(|i| &self.entities[i])
    }

    pub fn area_bits(&self) -> &[u8] {
        &self.area_bits
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::EntityType;

    #[test]
    fn entities_sorted_and_deduplicated() {
        let mut late = EntityState::new(3, EntityType::Item);
        late.frame = 9;
        let snapshot = Snapshot::new(
            0,
            PlayerState::default(),
            [
                EntityState::new(7, EntityType::Missile),
                EntityState::new(3, EntityType::Item),
                EntityState::new(1, EntityType::Player),
                late,
                EntityState::new(2000, EntityType::General),
            ],
            Vec::new(),
        );

        let numbers: Vec<u16> = snapshot.entities().iter().map(|e| e.number).collect();
        assert_eq!(numbers, vec![1, 3, 7]);
        assert_eq!(snapshot.entity(3).map(|e| e.frame), Some(9));
        assert!(snapshot.entity(4).is_none());
        assert_eq!(snapshot.frame(), NO_FRAME);
    }

    #[test]
    fn entity_limit_keeps_lowest_numbers() {
        let snapshot = Snapshot::new(
            0,
            PlayerState::default(),
            [9, 4, 4, 12, 1, 30].map(|n| EntityState::new(n, EntityType::Missile)),
            Vec::new(),
        )
        .with_entity_limit(3);

        let numbers: Vec<u16> = snapshot.entities().iter().map(|e| e.number).collect();
        assert_eq!(numbers, vec![1, 4, 9]);
    }
}
