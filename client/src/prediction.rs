//! Client-side prediction: saved moves, move combining, send decisions and
//! replay on top of server corrections.

use log::{debug, info, trace};
use shared::protocol::{MoveData, MoveResponse, Packet, ReplicatedEntity};
use shared::{
    blend_toward_prediction, GroundPhysics, ModifierCategory, ModifierTable, ModifierTier,
    MoveInput, MovementConfig, MovementEvent, MovementPhysics, Mover, NetRole, NetworkSettings,
    SavedMoveBuffer, SavedMoveHandle, Vec3,
};
use std::collections::HashMap;
use std::sync::Arc;

/// Float slack when comparing elapsed client time to the send interval.
const SEND_INTERVAL_SLACK: f32 = 1e-5;

/// Counters surfaced in the client's periodic status log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PredictionStats {
    pub moves_recorded: u32,
    pub moves_combined: u32,
    pub packets_sent: u32,
    pub acks: u32,
    pub corrections: u32,
    pub stale_responses: u32,
}

pub struct ClientPrediction<P: MovementPhysics = GroundPhysics> {
    client_id: u32,
    mover: Mover,
    physics: P,
    moves: SavedMoveBuffer,
    settings: NetworkSettings,
    config: MovementConfig,
    table: Arc<ModifierTable>,

    client_time: f32,
    last_send_time: f32,
    last_response_timestamp: f32,

    remotes: HashMap<u32, Mover>,
    stats: PredictionStats,
}

impl ClientPrediction<GroundPhysics> {
    pub fn new(client_id: u32, spawn: Vec3, config: MovementConfig, table: ModifierTable) -> Self {
        let physics = config.physics.clone();
        Self::with_physics(client_id, spawn, config, table, physics)
    }
}

impl<P: MovementPhysics> ClientPrediction<P> {
    pub fn with_physics(
        client_id: u32,
        spawn: Vec3,
        config: MovementConfig,
        table: ModifierTable,
        physics: P,
    ) -> Self {
        let table = Arc::new(table);
        let mut mover = Mover::new(NetRole::AutonomousProxy, Arc::clone(&table), &config);
        mover.set_location(spawn);
        Self {
            client_id,
            mover,
            physics,
            moves: SavedMoveBuffer::new(config.network.saved_move_capacity),
            settings: config.network.clone(),
            config,
            table,
            client_time: 0.0,
            last_send_time: 0.0,
            last_response_timestamp: f32::NEG_INFINITY,
            remotes: HashMap::new(),
            stats: PredictionStats::default(),
        }
    }

    pub fn client_id(&self) -> u32 {
        self.client_id
    }

    pub fn mover(&self) -> &Mover {
        &self.mover
    }

    /// Gameplay access to the local mover: gait intent, Local and Correction
    /// modifier requests, stamina.
    pub fn mover_mut(&mut self) -> &mut Mover {
        &mut self.mover
    }

    pub fn saved_moves(&self) -> &SavedMoveBuffer {
        &self.moves
    }

    pub fn client_time(&self) -> f32 {
        self.client_time
    }

    pub fn stats(&self) -> PredictionStats {
        self.stats
    }

    pub fn remote(&self, id: u32) -> Option<&Mover> {
        self.remotes.get(&id)
    }

    pub fn remote_ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.remotes.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn start_modifier(&mut self, category: ModifierCategory, name: &str) -> bool {
        self.mover
            .start_modifier_by_name(category, name, ModifierTier::Local)
    }

    pub fn end_modifier(&mut self, category: ModifierCategory, name: &str) -> bool {
        self.mover
            .end_modifier_by_name(category, name, ModifierTier::Local)
    }

    pub fn take_events(&mut self) -> Vec<MovementEvent> {
        self.mover.take_events()
    }

    /// Predicts one client tick and returns the move packet to send, if any.
    ///
    /// The tick is recorded as a saved move, merged into the previous unsent move
    /// when nothing relevant changed, simulated, and finalized. Important moves
    /// go out immediately; everything else waits for the send interval.
    pub fn tick(&mut self, input: MoveInput, dt: f32) -> Option<Packet> {
        if !dt.is_finite() || dt <= 0.0 {
            debug!("Ignoring client tick with delta time {}", dt);
            return None;
        }
        self.client_time += dt;
        self.stats.moves_recorded += 1;

        let handle = self
            .moves
            .record(self.client_time, dt, input, self.mover.snapshot());

        let mut sim_dt = dt;
        if self
            .moves
            .try_combine(handle, self.settings.max_move_delta_time)
        {
            if let Some(combined) = self.moves.get(handle) {
                sim_dt = combined.delta_time;
                let start = combined.start.clone();
                self.mover.restore(&start);
            }
            self.stats.moves_combined += 1;
        }

        self.mover.perform_move(&input, sim_dt, &self.physics);
        let important = self.moves.finalize(handle, self.mover.snapshot());

        let interval_elapsed = self.client_time - self.last_send_time + SEND_INTERVAL_SLACK
            >= self.settings.client_send_interval;
        if important || interval_elapsed {
            self.build_move_packet()
        } else {
            None
        }
    }

    /// Packs every finalized unsent move, plus the oldest important move still
    /// waiting for an acknowledgement, and marks the new moves as sent.
    pub fn build_move_packet(&mut self) -> Option<Packet> {
        let unsent: Vec<SavedMoveHandle> = self.moves.unsent().map(|m| m.handle()).collect();
        if unsent.is_empty() {
            return None;
        }

        let old = self
            .moves
            .oldest_unacked_important()
            .map(MoveData::from_saved_move);
        let moves: Vec<MoveData> = unsent
            .iter()
            .filter_map(|handle| self.moves.get(*handle))
            .map(MoveData::from_saved_move)
            .collect();
        for handle in unsent {
            self.moves.mark_sent(handle);
        }

        self.last_send_time = self.client_time;
        self.stats.packets_sent += 1;
        trace!(
            "Sending {} moves (resend: {})",
            moves.len(),
            old.is_some()
        );
        Some(Packet::Move { old, moves })
    }

    /// Drops every saved move up to the acknowledged timestamp.
    pub fn handle_ack(&mut self, timestamp: f32) -> usize {
        self.stats.acks += 1;
        self.moves.evict_up_to(timestamp)
    }

    /// Applies a server correction and replays the moves the server has not seen.
    ///
    /// Returns false for a response older than one already applied or than the
    /// newest acknowledgement; applying the same response twice is a no-op.
    pub fn handle_response(&mut self, response: &MoveResponse) -> bool {
        if response.timestamp <= self.last_response_timestamp
            || response.timestamp <= self.moves.ack_timestamp()
        {
            debug!("Ignoring stale correction at {:.3}", response.timestamp);
            self.stats.stale_responses += 1;
            return false;
        }
        self.last_response_timestamp = response.timestamp;
        self.stats.corrections += 1;

        let predicted = self.mover.location();
        let intent = self.mover.snapshot();
        let checkpoint = self.mover.replay_checkpoint();
        self.moves.evict_up_to(response.timestamp);

        self.mover.set_movement(response.movement);
        self.mover
            .restore_stamina(response.stamina, response.stamina_drained);
        for category in ModifierCategory::ALL {
            let wants = response.wants(category);
            self.mover
                .replace_wants(category, ModifierTier::Correction, &wants.correction);
            self.mover
                .replace_wants(category, ModifierTier::Server, &wants.server);
        }
        self.mover.update_modifiers(&self.physics);

        let replayed = self.replay_saved_moves();
        self.mover.restore_client_intent(&intent);

        if let Some(alpha) = response.client_auth_alpha {
            let computed = self.mover.location();
            self.mover
                .set_location(blend_toward_prediction(computed, predicted, alpha));
        }
        self.mover.settle_replay(checkpoint);

        info!(
            "Correction at {:.3}: replayed {} moves, error {:.2}",
            response.timestamp,
            replayed,
            predicted.distance(&self.mover.location())
        );
        true
    }

    fn replay_saved_moves(&mut self) -> usize {
        let handles: Vec<SavedMoveHandle> = self
            .moves
            .iter()
            .filter(|m| m.is_finalized())
            .map(|m| m.handle())
            .collect();

        let mut replayed = 0;
        for handle in handles {
            let Some(saved) = self.moves.get(handle) else {
                continue;
            };
            let (intent, input, dt) = (saved.start.clone(), saved.input, saved.delta_time);

            self.mover.restore_client_intent(&intent);
            let start = self.mover.snapshot();
            self.mover.perform_move(&input, dt, &self.physics);
            let end = self.mover.snapshot();

            if let Some(saved) = self.moves.get_mut(handle) {
                saved.start = start;
                saved.end = Some(end);
            }
            replayed += 1;
        }
        replayed
    }

    /// Updates remote-observed entities from a world snapshot. Entities missing
    /// from the snapshot are dropped; the local entity is owned by prediction.
    pub fn apply_world_state(&mut self, entities: &[ReplicatedEntity]) {
        self.remotes
            .retain(|id, _| entities.iter().any(|e| e.id == *id));

        for entity in entities {
            if entity.id == self.client_id {
                continue;
            }
            let remote = self.remotes.entry(entity.id).or_insert_with(|| {
                debug!("Observing remote entity {}", entity.id);
                Mover::new(NetRole::SimulatedProxy, Arc::clone(&self.table), &self.config)
            });
            remote.set_movement(entity.movement);
            remote.restore_stamina(entity.stamina, false);
            remote.apply_replicated_levels(entity.levels);
            remote.apply_replicated_gait(entity.is_walking, entity.is_sprinting);
            for event in remote.take_events() {
                trace!("Remote {} event {:?}", entity.id, event);
            }
        }
    }
}
