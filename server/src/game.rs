use log::{debug, info, warn};
use shared::authority::{AuthorityVerdict, ClientAuthStack};
use shared::config::NetworkSettings;
use shared::modifier::{ModifierCategory, ModifierTable};
use shared::modifier_stack::ModifierTier;
use shared::mover::{Mover, NetRole};
use shared::movement::MovementState;
use shared::protocol::{CorrectionWants, MoveData, MoveResponse, Packet, ReplicatedEntity};
use shared::{GroundPhysics, MovementConfig, Vec3, SPAWN_LOCATION, SPAWN_SPACING};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum MoveRejection {
    #[error("no entity for client {0}")]
    UnknownClient(u32),
    #[error("move at {timestamp} is not newer than {last_processed}")]
    Stale { timestamp: f32, last_processed: f32 },
    #[error("invalid move delta time {0}")]
    InvalidDeltaTime(f32),
    #[error("move at {timestamp} has a non-finite {field}")]
    NonFinite { timestamp: f32, field: &'static str },
}

/// Which parts of a client move disagreed with the server result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Divergence {
    pub position: bool,
    pub stamina: bool,
    pub modifiers: bool,
}

impl Divergence {
    pub fn any(&self) -> bool {
        self.position || self.stamina || self.modifiers
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MoveVerdict {
    pub timestamp: f32,
    pub divergence: Divergence,
    /// Server result before any client authority was applied.
    pub simulated: MovementState,
    pub client_auth_alpha: Option<f32>,
}

/// Server copy of one client's entity.
pub struct ServerEntity {
    pub mover: Mover,
    pub authority: ClientAuthStack,
    last_processed_timestamp: Option<f32>,
}

impl ServerEntity {
    pub fn new(table: Arc<ModifierTable>, config: &MovementConfig, spawn: Vec3) -> Self {
        let mut mover = Mover::new(NetRole::Authority, table, config);
        mover.set_movement(MovementState::at(spawn));
        Self {
            mover,
            authority: ClientAuthStack::new(Arc::new(config.client_auth.clone())),
            last_processed_timestamp: None,
        }
    }

    pub fn last_processed_timestamp(&self) -> Option<f32> {
        self.last_processed_timestamp
    }

    /// Simulates one client move authoritatively and compares the result with
    /// what the client reported.
    ///
    /// The client's Correction tier is only compared; it is confirmed once server
    /// gameplay issues the same request.
    pub fn process_move(
        &mut self,
        data: &MoveData,
        physics: &GroundPhysics,
        settings: &NetworkSettings,
    ) -> Result<MoveVerdict, MoveRejection> {
        if let Some(last_processed) = self.last_processed_timestamp {
            if data.timestamp <= last_processed {
                return Err(MoveRejection::Stale {
                    timestamp: data.timestamp,
                    last_processed,
                });
            }
        }
        if !data.delta_time.is_finite() || data.delta_time <= 0.0 || !data.timestamp.is_finite() {
            return Err(MoveRejection::InvalidDeltaTime(data.delta_time));
        }
        let non_finite = if !data.acceleration.is_finite() {
            Some("acceleration")
        } else if !data.location.is_finite() {
            Some("location")
        } else if !data.stamina().is_finite() {
            Some("stamina")
        } else {
            None
        };
        if let Some(field) = non_finite {
            return Err(MoveRejection::NonFinite {
                timestamp: data.timestamp,
                field,
            });
        }

        let mut dt = data.delta_time.min(settings.max_move_delta_time);
        if let Some(last_processed) = self.last_processed_timestamp {
            dt = dt.min(data.timestamp - last_processed + settings.timestamp_tolerance);
        }
        if dt < data.delta_time {
            debug!("Clamped move delta time {:.4} to {:.4}", data.delta_time, dt);
        }

        let before = self.mover.snapshot();
        self.mover
            .set_gait_intent(data.wants_to_walk(), data.wants_to_sprint());

        let mut divergence = Divergence::default();
        for category in ModifierCategory::ALL {
            let wants = data.wants(category);
            self.mover
                .replace_wants(category, ModifierTier::Local, &wants.local);
            if self
                .mover
                .stack(category)
                .diverges_from(&wants.correction, &wants.server)
            {
                debug!("{:?} want-sets diverge at {:.3}", category, data.timestamp);
                divergence.modifiers = true;
            }
        }

        self.mover.perform_move(&data.input(), dt, physics);
        let simulated = *self.mover.movement();
        if !simulated.location.is_finite() || !simulated.velocity.is_finite() {
            // Finite but extreme input can still overflow the physics step.
            self.mover.restore(&before);
            return Err(MoveRejection::NonFinite {
                timestamp: data.timestamp,
                field: "simulated state",
            });
        }
        self.last_processed_timestamp = Some(data.timestamp);

        let verdict = self.authority.evaluate(
            data.location,
            simulated.location,
            settings.authority_tolerance,
        );
        let mut client_auth_alpha = None;
        match verdict {
            AuthorityVerdict::Accept { location, alpha, .. } => {
                self.mover.set_location(location);
                if alpha < 1.0 {
                    client_auth_alpha = Some(alpha);
                    divergence.position = true;
                }
            }
            AuthorityVerdict::Reject { .. } => {
                divergence.position = true;
            }
            AuthorityVerdict::NoAuthority => {
                let error = data.location.distance_squared(&simulated.location);
                if error > settings.max_position_error_squared {
                    divergence.position = true;
                }
            }
        }
        if data.movement_mode != simulated.mode {
            divergence.position = true;
        }

        if (data.stamina() - self.mover.stamina()).abs() > settings.stamina_correction_threshold {
            divergence.stamina = true;
        }

        Ok(MoveVerdict {
            timestamp: data.timestamp,
            divergence,
            simulated,
            client_auth_alpha,
        })
    }

    /// Correction covering every move up to `verdict.timestamp`.
    pub fn build_response(&self, verdict: &MoveVerdict) -> MoveResponse {
        let movement = match verdict.client_auth_alpha {
            Some(_) => verdict.simulated,
            None => *self.mover.movement(),
        };
        MoveResponse {
            timestamp: verdict.timestamp,
            movement,
            stamina: self.mover.stamina(),
            stamina_drained: self.mover.is_stamina_drained(),
            modifiers: ModifierCategory::ALL.map(|category| {
                let stack = self.mover.stack(category);
                CorrectionWants {
                    correction: stack.wants(ModifierTier::Correction).clone(),
                    server: stack.wants(ModifierTier::Server).clone(),
                }
            }),
            client_auth_alpha: verdict.client_auth_alpha,
        }
    }
}

/// Authoritative world: one entity per connected client.
pub struct GameState {
    pub tick: u32,
    pub entities: HashMap<u32, ServerEntity>,
    config: MovementConfig,
    table: Arc<ModifierTable>,
    physics: GroundPhysics,
}

impl GameState {
    pub fn new(config: MovementConfig, table: ModifierTable) -> Self {
        Self {
            tick: 0,
            entities: HashMap::new(),
            physics: config.physics.clone(),
            config,
            table: Arc::new(table),
        }
    }

    pub fn config(&self) -> &MovementConfig {
        &self.config
    }

    pub fn add_player(&mut self, client_id: u32) -> Vec3 {
        let spawn = SPAWN_LOCATION + Vec3::new(client_id as f32 * SPAWN_SPACING, 0.0, 0.0);
        let entity = ServerEntity::new(Arc::clone(&self.table), &self.config, spawn);
        info!("Added player {} at ({}, {}, {})", client_id, spawn.x, spawn.y, spawn.z);
        self.entities.insert(client_id, entity);
        spawn
    }

    pub fn remove_player(&mut self, client_id: &u32) {
        if self.entities.remove(client_id).is_some() {
            info!("Removed player {}", client_id);
        }
    }

    /// Processes a client's queued moves in order and answers with one packet: a
    /// correction if any move diverged, otherwise an acknowledgement.
    pub fn process_moves(&mut self, client_id: u32, moves: &[MoveData]) -> Option<Packet> {
        let Some(entity) = self.entities.get_mut(&client_id) else {
            warn!("{}", MoveRejection::UnknownClient(client_id));
            return None;
        };

        let mut needs_correction = false;
        let mut last_verdict = None;
        for data in moves {
            match entity.process_move(data, &self.physics, &self.config.network) {
                Ok(verdict) => {
                    needs_correction |= verdict.divergence.any();
                    last_verdict = Some(verdict);
                }
                Err(rejection) => debug!("Client {}: {}", client_id, rejection),
            }
        }
        for event in entity.mover.take_events() {
            debug!("Client {} event {:?}", client_id, event);
        }

        let verdict = last_verdict?;
        if needs_correction {
            Some(Packet::MoveResponse(entity.build_response(&verdict)))
        } else {
            Some(Packet::AckGoodMove {
                timestamp: verdict.timestamp,
            })
        }
    }

    /// Advances per-entity server timers.
    pub fn tick(&mut self, dt: f32) {
        for entity in self.entities.values_mut() {
            entity.authority.tick(dt);
        }
        self.tick = self.tick.wrapping_add(1);
    }

    pub fn snapshot_entities(&self) -> Vec<ReplicatedEntity> {
        let mut entities: Vec<ReplicatedEntity> = self
            .entities
            .iter()
            .map(|(id, entity)| ReplicatedEntity::from_snapshot(*id, &entity.mover.snapshot()))
            .collect();
        entities.sort_by_key(|e| e.id);
        entities
    }

    // Gameplay hooks

    pub fn start_modifier(
        &mut self,
        client_id: u32,
        category: ModifierCategory,
        name: &str,
        tier: ModifierTier,
    ) -> bool {
        self.entities
            .get_mut(&client_id)
            .map_or(false, |e| e.mover.start_modifier_by_name(category, name, tier))
    }

    pub fn end_modifier(
        &mut self,
        client_id: u32,
        category: ModifierCategory,
        name: &str,
        tier: ModifierTier,
    ) -> bool {
        self.entities
            .get_mut(&client_id)
            .map_or(false, |e| e.mover.end_modifier_by_name(category, name, tier))
    }

    pub fn clear_modifiers(&mut self, client_id: u32, category: ModifierCategory, tier: ModifierTier) {
        if let Some(entity) = self.entities.get_mut(&client_id) {
            entity.mover.clear_modifiers(category, tier);
        }
    }

    pub fn grant_client_authority(
        &mut self,
        client_id: u32,
        source: &str,
        override_duration: Option<f32>,
    ) -> Option<u32> {
        self.entities
            .get_mut(&client_id)
            .and_then(|e| e.authority.grant(source, override_duration))
    }

    pub fn set_stamina(&mut self, client_id: u32, value: f32) {
        if let Some(entity) = self.entities.get_mut(&client_id) {
            entity.mover.set_stamina(value);
        }
    }

    pub fn set_max_stamina(&mut self, client_id: u32, value: f32) {
        if let Some(entity) = self.entities.get_mut(&client_id) {
            entity.mover.set_max_stamina(value);
        }
    }
}
