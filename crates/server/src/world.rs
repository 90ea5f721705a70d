use std::collections::HashMap;

use glam::Vec3;

use snapnet::snapshot::short_to_angle;
use snapnet::{Entity, EntityState, EntityType, PlayerState, SnapshotSource, UserCmd};

const RUN_SPEED: f32 = 320.0;
const MISSILE_SPEED: f32 = 900.0;
const MISSILE_LIFETIME: f32 = 3.0;
const GRAVITY: f32 = 800.0;
const VIEW_HEIGHT: i8 = 26;
const MAX_ENTITY_ID: u16 = 1023;

struct Missile {
    entity: Entity,
    age: f32,
}

struct Player {
    entity: Entity,
    last_cmd: UserCmd,
    health: i16,
}

/// Small demo arena: one player entity per client slot plus missiles fired
/// with the attack button. It only exists to feed the session host.
pub struct World {
    players: HashMap<u16, Player>,
    missiles: Vec<Missile>,
    next_id: u16,
    time_ms: u32,
}

impl World {
    pub fn new() -> Self {
        Self {
            players: HashMap::new(),
            missiles: Vec::new(),
            // low ids are reserved for player slots
            next_id: 64,
            time_ms: 0,
        }
    }

    pub fn time_ms(&self) -> u32 {
        self.time_ms
    }

    pub fn entity_count(&self) -> usize {
        self.players.len() + self.missiles.len()
    }

    pub fn spawn_player(&mut self, slot: u16) {
        let spawn = Vec3::new(slot as f32 * 64.0, 0.0, 24.0);
        self.players.insert(
            slot,
            Player {
                entity: Entity::player(slot, spawn),
                last_cmd: UserCmd::default(),
                health: 100,
            },
        );
    }

    pub fn despawn_player(&mut self, slot: u16) {
        self.players.remove(&slot);
    }

    pub fn apply_usercmd(&mut self, slot: u16, cmd: &UserCmd) {
        let Some(player) = self.players.get_mut(&slot) else {
            return;
        };

        let pitch = short_to_angle(cmd.angles[0]);
        let yaw = short_to_angle(cmd.angles[1]);
        let (sin_yaw, cos_yaw) = yaw.to_radians().sin_cos();
        let forward = Vec3::new(cos_yaw, sin_yaw, 0.0);
        let right = Vec3::new(sin_yaw, -cos_yaw, 0.0);

        let wish = forward * cmd.forward as f32 + right * cmd.right as f32;
        let speed = if cmd.has_button(UserCmd::BUTTON_WALKING) {
            RUN_SPEED * 0.5
        } else {
            RUN_SPEED
        };
        player.entity.velocity = if wish.length_squared() > 0.001 {
            wish.normalize() * speed
        } else {
            Vec3::ZERO
        };
        player.entity.angles = Vec3::new(pitch, yaw, 0.0);

        let fired = cmd.has_button(UserCmd::BUTTON_ATTACK)
            && !player.last_cmd.has_button(UserCmd::BUTTON_ATTACK);
        player.last_cmd = *cmd;

        if fired {
            let origin = player.entity.position + Vec3::Z * VIEW_HEIGHT as f32;
            let (sin_pitch, cos_pitch) = pitch.to_radians().sin_cos();
            let aim = Vec3::new(cos_pitch * cos_yaw, cos_pitch * sin_yaw, -sin_pitch);
            self.spawn_missile(origin, aim * MISSILE_SPEED, slot);
        }
    }

    fn spawn_missile(&mut self, origin: Vec3, velocity: Vec3, owner: u16) {
        let id = self.next_id;
        self.next_id = if id >= MAX_ENTITY_ID { 64 } else { id + 1 };
        if self.missiles.iter().any(|m| m.entity.id == id) {
            log::debug!("missile limit reached");
            return;
        }

        let mut entity = Entity::new(id, EntityType::Missile);
        entity.position = origin;
        entity.velocity = velocity;
        entity.event_parm = owner as u8;
        self.missiles.push(Missile { entity, age: 0.0 });
    }

    pub fn simulate(&mut self, dt: f32) {
        self.time_ms = self.time_ms.wrapping_add((dt * 1000.0) as u32);

        for player in self.players.values_mut() {
            player.entity.position += player.entity.velocity * dt;
            player.entity.animation_time += dt;
        }

        for missile in &mut self.missiles {
            missile.age += dt;
            missile.entity.velocity.z -= GRAVITY * dt;
            missile.entity.position += missile.entity.velocity * dt;
        }
        self.missiles
            .retain(|m| m.age < MISSILE_LIFETIME && m.entity.position.z > 0.0);
    }
}

impl SnapshotSource for World {
    fn server_time(&self) -> u32 {
        self.time_ms
    }

    fn player_state(&self, slot: u16) -> PlayerState {
        let mut state = PlayerState::default();
        let Some(player) = self.players.get(&slot) else {
            return state;
        };
        state.command_time = player.last_cmd.server_time;
        state.set_origin(player.entity.position);
        state.set_velocity(player.entity.velocity);
        state.set_view_angles(player.entity.angles);
        state.view_height = VIEW_HEIGHT;
        state.weapon = player.last_cmd.weapon;
        state.health = player.health;
        state
    }

    fn visible_entities(&self, slot: u16) -> Vec<EntityState> {
        self.players
            .iter()
            .filter(|(other, _)| **other != slot)
            .map(|(_, p)| &p.entity)
            .chain(self.missiles.iter().map(|m| &m.entity))
            .filter(|e| e.is_networkable())
            .map(Entity::to_network_state)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use snapnet::snapshot::angle_to_short;

    #[test]
    fn players_do_not_see_themselves() {
        let mut world = World::new();
        world.spawn_player(0);
        world.spawn_player(1);

        let seen: Vec<u16> = world.visible_entities(0).iter().map(|e| e.number).collect();
        assert_eq!(seen, vec![1]);
    }

    #[test]
    fn usercmd_moves_player_along_yaw() {
        let mut world = World::new();
        world.spawn_player(0);
        world.apply_usercmd(
            0,
            &UserCmd {
                angles: [0, angle_to_short(90.0), 0],
                forward: 127,
                ..UserCmd::default()
            },
        );
        world.simulate(0.5);

        let origin = world.player_state(0).origin();
        assert!(origin.x.abs() < 1.0);
        assert!((origin.y - 160.0).abs() < 1.0);
    }

    #[test]
    fn attack_fires_once_per_press() {
        let mut world = World::new();
        world.spawn_player(0);
        let attack = UserCmd {
            buttons: UserCmd::BUTTON_ATTACK,
            ..UserCmd::default()
        };
        world.apply_usercmd(0, &attack);
        world.apply_usercmd(0, &attack);
        assert_eq!(world.entity_count(), 2);

        // falls below the floor and is removed
        for _ in 0..100 {
            world.simulate(0.05);
        }
        assert_eq!(world.entity_count(), 1);
    }
}
