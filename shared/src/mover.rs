//! Predictable movement state of one entity and the per-move driver shared by
//! the server, the predicting client and remote-observed copies.

use crate::config::MovementConfig;
use crate::math::{is_nearly_equal, Vec3};
use crate::modifier::{ModifierCategory, ModifierLevel, ModifierTable, MovementModifierParams};
use crate::modifier_stack::{GatherScope, ModifierStack, ModifierTier, ModifierWantSet};
use crate::movement::{EffectiveScalars, MoveInput, MovementMode, MovementPhysics, MovementState};
use crate::stamina::{Stamina, StaminaEvent};
use log::{debug, warn};
use std::sync::Arc;

/// Which instance of an entity this mover is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetRole {
    /// Server copy; authoritative Gather ignores the Local tier.
    Authority,
    /// Locally controlled, predicting client copy.
    AutonomousProxy,
    /// Remote-observed copy; levels arrive by replication.
    SimulatedProxy,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MovementEvent {
    LevelChanged {
        category: ModifierCategory,
        previous: ModifierLevel,
        current: ModifierLevel,
    },
    SprintStarted,
    SprintEnded,
    WalkStarted,
    WalkEnded,
    Stamina(StaminaEvent),
}

impl MovementEvent {
    /// Events that must fire exactly once per transition.
    pub fn is_discrete(&self) -> bool {
        match self {
            MovementEvent::Stamina(event) => event.is_discrete(),
            _ => true,
        }
    }
}

/// Want-sets of every tier plus the committed level for one category.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CategorySnapshot {
    pub local: ModifierWantSet,
    pub correction: ModifierWantSet,
    pub server: ModifierWantSet,
    pub level: ModifierLevel,
}

impl CategorySnapshot {
    pub fn wants(&self, tier: ModifierTier) -> &ModifierWantSet {
        match tier {
            ModifierTier::Local => &self.local,
            ModifierTier::Correction => &self.correction,
            ModifierTier::Server => &self.server,
        }
    }
}

/// Full predictable state of one mover at a tick boundary.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MoverSnapshot {
    pub movement: MovementState,
    pub stamina: f32,
    pub stamina_drained: bool,
    pub wants_to_walk: bool,
    pub wants_to_sprint: bool,
    pub is_walking: bool,
    pub is_sprinting: bool,
    pub modifiers: [CategorySnapshot; 3],
}

impl MoverSnapshot {
    pub fn category(&self, category: ModifierCategory) -> &CategorySnapshot {
        &self.modifiers[category.index()]
    }
}

/// Event log position and mover state taken before a correction is applied.
#[derive(Debug, Clone)]
pub struct ReplayCheckpoint {
    events: usize,
    baseline: MoverSnapshot,
}

/// Movement state for one entity: transform, stamina, gait and modifier stacks.
#[derive(Debug, Clone)]
pub struct Mover {
    role: NetRole,
    table: Arc<ModifierTable>,
    movement: MovementState,
    stamina: Stamina,
    stacks: [ModifierStack; 3],
    wants_to_walk: bool,
    wants_to_sprint: bool,
    is_walking: bool,
    is_sprinting: bool,
    events: Vec<MovementEvent>,
}

impl Mover {
    pub fn new(role: NetRole, table: Arc<ModifierTable>, config: &MovementConfig) -> Self {
        let stack = |category: ModifierCategory| {
            ModifierStack::new(
                category,
                config.modifiers.cap(category),
                config.modifiers.policy,
            )
        };
        Self {
            role,
            table,
            movement: MovementState::default(),
            stamina: Stamina::new(config.stamina.clone()),
            stacks: ModifierCategory::ALL.map(stack),
            wants_to_walk: false,
            wants_to_sprint: false,
            is_walking: false,
            is_sprinting: false,
            events: Vec::new(),
        }
    }

    pub fn role(&self) -> NetRole {
        self.role
    }

    pub fn table(&self) -> &ModifierTable {
        &self.table
    }

    pub fn movement(&self) -> &MovementState {
        &self.movement
    }

    pub fn set_movement(&mut self, movement: MovementState) {
        self.movement = movement;
    }

    pub fn location(&self) -> Vec3 {
        self.movement.location
    }

    pub fn set_location(&mut self, location: Vec3) {
        self.movement.location = location;
    }

    pub fn take_events(&mut self) -> Vec<MovementEvent> {
        std::mem::take(&mut self.events)
    }

    // Modifiers

    pub fn stack(&self, category: ModifierCategory) -> &ModifierStack {
        &self.stacks[category.index()]
    }

    pub fn level(&self, category: ModifierCategory) -> ModifierLevel {
        self.stack(category).level()
    }

    pub fn level_name(&self, category: ModifierCategory) -> Option<&str> {
        self.table.name_of(category, self.level(category))
    }

    pub fn is_modifier_active(&self, category: ModifierCategory) -> bool {
        self.level(category).is_some()
    }

    fn may_request(&self, tier: ModifierTier) -> bool {
        match (self.role, tier) {
            (NetRole::SimulatedProxy, _) => false,
            (NetRole::Authority, ModifierTier::Local) => false,
            (NetRole::AutonomousProxy, ModifierTier::Server) => false,
            _ => true,
        }
    }

    /// Requests `level` at `tier`. Takes effect at the next processing pass.
    pub fn start_modifier(
        &mut self,
        category: ModifierCategory,
        level: ModifierLevel,
        tier: ModifierTier,
    ) -> bool {
        if !self.may_request(tier) {
            warn!("{:?} mover cannot request {:?} tier modifiers", self.role, tier);
            return false;
        }
        if !self.table.contains(category, level) {
            warn!("Unknown {:?} level {:?}", category, level);
            return false;
        }
        self.stacks[category.index()].start(tier, level)
    }

    pub fn start_modifier_by_name(
        &mut self,
        category: ModifierCategory,
        name: &str,
        tier: ModifierTier,
    ) -> bool {
        let level = self.table.level_of(category, name);
        if level.is_none() {
            warn!("Unknown {:?} modifier '{}'", category, name);
            return false;
        }
        self.start_modifier(category, level, tier)
    }

    pub fn end_modifier(
        &mut self,
        category: ModifierCategory,
        level: ModifierLevel,
        tier: ModifierTier,
    ) -> bool {
        if !self.may_request(tier) {
            return false;
        }
        self.stacks[category.index()].end(tier, level)
    }

    pub fn end_modifier_by_name(
        &mut self,
        category: ModifierCategory,
        name: &str,
        tier: ModifierTier,
    ) -> bool {
        let level = self.table.level_of(category, name);
        self.end_modifier(category, level, tier)
    }

    pub fn clear_modifiers(&mut self, category: ModifierCategory, tier: ModifierTier) {
        if self.may_request(tier) {
            self.stacks[category.index()].clear(tier);
        }
    }

    /// Overwrites one tier wholesale. Used for server responses and the server's
    /// mirror of the client Local tier.
    pub fn replace_wants(
        &mut self,
        category: ModifierCategory,
        tier: ModifierTier,
        wants: &ModifierWantSet,
    ) {
        self.stacks[category.index()].replace(tier, wants);
    }

    /// Runs Gather, Resolve, Gate and Commit for every category.
    pub fn update_modifiers<P: MovementPhysics + ?Sized>(&mut self, physics: &P) {
        let scope = match self.role {
            NetRole::SimulatedProxy => return,
            NetRole::Authority => GatherScope::Authority,
            NetRole::AutonomousProxy => GatherScope::Predicting,
        };
        for category in ModifierCategory::ALL {
            let gate_open = physics.resolve_gate(category, &self.movement);
            let transition = self.stacks[category.index()].process(scope, gate_open);
            if transition.changed() {
                self.events.push(MovementEvent::LevelChanged {
                    category,
                    previous: transition.previous,
                    current: transition.current,
                });
            }
        }
    }

    /// Levels received through replication for a remote-observed entity.
    pub fn apply_replicated_levels(&mut self, levels: [ModifierLevel; 3]) {
        for category in ModifierCategory::ALL {
            let transition =
                self.stacks[category.index()].set_replicated_level(levels[category.index()]);
            if transition.changed() {
                self.events.push(MovementEvent::LevelChanged {
                    category,
                    previous: transition.previous,
                    current: transition.current,
                });
            }
        }
    }

    pub fn levels(&self) -> [ModifierLevel; 3] {
        ModifierCategory::ALL.map(|category| self.level(category))
    }

    // Stamina

    pub fn stamina(&self) -> f32 {
        self.stamina.value()
    }

    pub fn max_stamina(&self) -> f32 {
        self.stamina.max()
    }

    pub fn is_stamina_drained(&self) -> bool {
        self.stamina.is_drained()
    }

    pub fn set_stamina(&mut self, value: f32) {
        self.stamina.set(value);
        self.collect_stamina_events();
    }

    pub fn set_max_stamina(&mut self, value: f32) {
        self.stamina.set_max(value);
        self.collect_stamina_events();
    }

    /// Accepts server stamina unconditionally.
    pub fn restore_stamina(&mut self, value: f32, drained: bool) {
        self.stamina.restore(value, drained);
    }

    fn collect_stamina_events(&mut self) {
        self.events
            .extend(self.stamina.take_events().into_iter().map(MovementEvent::Stamina));
    }

    // Gait

    pub fn start_sprint(&mut self) {
        self.wants_to_sprint = true;
    }

    pub fn end_sprint(&mut self) {
        self.wants_to_sprint = false;
    }

    pub fn start_walk(&mut self) {
        self.wants_to_walk = true;
    }

    pub fn end_walk(&mut self) {
        self.wants_to_walk = false;
    }

    pub fn set_gait_intent(&mut self, wants_to_walk: bool, wants_to_sprint: bool) {
        self.wants_to_walk = wants_to_walk;
        self.wants_to_sprint = wants_to_sprint;
    }

    pub fn wants_to_walk(&self) -> bool {
        self.wants_to_walk
    }

    pub fn wants_to_sprint(&self) -> bool {
        self.wants_to_sprint
    }

    pub fn is_walking(&self) -> bool {
        self.is_walking
    }

    pub fn is_sprinting(&self) -> bool {
        self.is_sprinting
    }

    /// Gait received through replication for a remote-observed entity.
    pub fn apply_replicated_gait(&mut self, is_walking: bool, is_sprinting: bool) {
        if self.is_sprinting && !is_sprinting {
            self.unsprint();
        }
        if self.is_walking && !is_walking {
            self.unwalk();
        }
        if is_sprinting && !self.is_sprinting {
            self.sprint();
        }
        if is_walking && !self.is_walking {
            self.walk();
        }
    }

    pub fn can_sprint_in_current_state(&self) -> bool {
        let pct = self.stamina.pct();
        if self.stamina.is_drained() || pct <= 0.0 {
            return false;
        }
        if !self.is_sprinting && pct < self.stamina.config().start_sprint_pct {
            return false;
        }
        self.movement.mode.is_grounded_or_falling()
    }

    pub fn can_walk_in_current_state(&self) -> bool {
        self.movement.mode.is_grounded_or_falling()
    }

    /// Sprinting with movement input; this is what drains stamina.
    pub fn is_sprinting_in_effect(&self, input: &MoveInput) -> bool {
        self.is_sprinting && input.has_acceleration()
    }

    fn sprint(&mut self) {
        if self.is_walking {
            self.unwalk();
        }
        self.is_sprinting = true;
        self.events.push(MovementEvent::SprintStarted);
    }

    fn unsprint(&mut self) {
        self.is_sprinting = false;
        self.events.push(MovementEvent::SprintEnded);
    }

    fn walk(&mut self) {
        if self.is_sprinting {
            self.unsprint();
        }
        self.is_walking = true;
        self.events.push(MovementEvent::WalkStarted);
    }

    fn unwalk(&mut self) {
        self.is_walking = false;
        self.events.push(MovementEvent::WalkEnded);
    }

    // Scalars

    pub fn current_effective_scalars(&self) -> EffectiveScalars {
        let haste = self
            .table
            .movement_params(ModifierCategory::Haste, self.level(ModifierCategory::Haste));
        let slow = self
            .table
            .movement_params(ModifierCategory::Slow, self.level(ModifierCategory::Slow));
        let slow_fall = self
            .table
            .falling_params(self.level(ModifierCategory::SlowFall));

        let config = self.stamina.config();
        let (drained_speed, drained_accel, drained_braking) = if self.stamina.is_drained() {
            (
                config.drained_speed_scalar,
                config.drained_accel_scalar,
                config.drained_braking_scalar,
            )
        } else {
            (1.0, 1.0, 1.0)
        };

        let haste_or = |f: fn(&MovementModifierParams) -> f32| haste.map_or(1.0, f);
        let slow_or = |f: fn(&MovementModifierParams) -> f32| slow.map_or(1.0, f);

        EffectiveScalars {
            speed: drained_speed * slow_or(|p| p.max_walk_speed) * haste_or(|p| p.max_walk_speed),
            accel: drained_accel
                * slow_or(|p| p.max_acceleration)
                * haste_or(|p| p.max_acceleration),
            braking: drained_braking
                * slow_or(|p| p.braking_deceleration)
                * haste_or(|p| p.braking_deceleration),
            ground_friction: slow_or(|p| p.ground_friction) * haste_or(|p| p.ground_friction),
            braking_friction: slow_or(|p| p.braking_friction) * haste_or(|p| p.braking_friction),
            gravity_z: slow_fall.map_or(1.0, |p| p.gravity_scalar_at(self.movement.velocity.z)),
            root_motion: slow
                .filter(|p| p.affects_root_motion)
                .map_or(1.0, |p| p.max_walk_speed),
            air_control: slow_fall
                .filter(|p| !p.override_air_control)
                .map_or(1.0, |p| p.air_control_scalar),
            air_control_override: slow_fall
                .filter(|p| p.override_air_control)
                .map(|p| p.air_control_override),
        }
    }

    fn removes_velocity_z_on_slow_fall_start(&self) -> bool {
        if self.movement.mode == MovementMode::Walking {
            return false;
        }
        self.table
            .falling_params(self.level(ModifierCategory::SlowFall))
            .map_or(false, |p| {
                p.remove_velocity_z_on_start
                    .removes(self.movement.velocity.z)
            })
    }

    // Tick

    /// Simulates one move: modifier processing and gait transitions, stamina, the
    /// physics step, then post-movement checks. Remote-observed movers do nothing.
    pub fn perform_move<P: MovementPhysics + ?Sized>(
        &mut self,
        input: &MoveInput,
        dt: f32,
        physics: &P,
    ) {
        if self.role == NetRole::SimulatedProxy {
            return;
        }
        if !dt.is_finite() || dt <= 0.0 {
            debug!("Skipping move with delta time {}", dt);
            return;
        }

        self.update_state_before_movement(physics);

        let draining = self.is_sprinting_in_effect(input);
        self.stamina.tick(dt, draining);
        self.collect_stamina_events();

        let scalars = self.current_effective_scalars();
        physics.simulate_tick(&mut self.movement, input, &scalars, dt);

        self.update_state_after_movement();
    }

    fn update_state_before_movement<P: MovementPhysics + ?Sized>(&mut self, physics: &P) {
        let was_slow_falling = self.is_modifier_active(ModifierCategory::SlowFall);
        self.update_modifiers(physics);
        if !was_slow_falling
            && self.is_modifier_active(ModifierCategory::SlowFall)
            && self.removes_velocity_z_on_slow_fall_start()
        {
            self.movement.velocity.z = 0.0;
        }

        if self.is_sprinting && !self.wants_to_sprint {
            self.unsprint();
        } else if !self.is_sprinting && self.wants_to_sprint && self.can_sprint_in_current_state() {
            self.sprint();
        }

        if self.is_walking && !self.wants_to_walk {
            self.unwalk();
        } else if !self.is_walking && self.wants_to_walk && self.can_walk_in_current_state() {
            self.walk();
        }
    }

    fn update_state_after_movement(&mut self) {
        if self.is_sprinting && !self.can_sprint_in_current_state() {
            self.unsprint();
        }
        if self.is_walking && !self.can_walk_in_current_state() {
            self.unwalk();
        }
    }

    // Snapshots

    pub fn snapshot(&self) -> MoverSnapshot {
        MoverSnapshot {
            movement: self.movement,
            stamina: self.stamina.value(),
            stamina_drained: self.stamina.is_drained(),
            wants_to_walk: self.wants_to_walk,
            wants_to_sprint: self.wants_to_sprint,
            is_walking: self.is_walking,
            is_sprinting: self.is_sprinting,
            modifiers: ModifierCategory::ALL.map(|category| {
                let stack = self.stack(category);
                CategorySnapshot {
                    local: stack.wants(ModifierTier::Local).clone(),
                    correction: stack.wants(ModifierTier::Correction).clone(),
                    server: stack.wants(ModifierTier::Server).clone(),
                    level: stack.level(),
                }
            }),
        }
    }

    /// Puts every predictable field back to `snapshot` without firing events.
    pub fn restore(&mut self, snapshot: &MoverSnapshot) {
        self.movement = snapshot.movement;
        self.stamina
            .restore(snapshot.stamina, snapshot.stamina_drained);
        self.wants_to_walk = snapshot.wants_to_walk;
        self.wants_to_sprint = snapshot.wants_to_sprint;
        self.is_walking = snapshot.is_walking;
        self.is_sprinting = snapshot.is_sprinting;
        for category in ModifierCategory::ALL {
            let saved = snapshot.category(category);
            let stack = &mut self.stacks[category.index()];
            stack.replace(ModifierTier::Local, &saved.local);
            stack.replace(ModifierTier::Correction, &saved.correction);
            stack.replace(ModifierTier::Server, &saved.server);
            stack.restore_level(saved.level);
        }
    }

    /// Restores only what the client itself asked for in a saved move: gait intent
    /// and the Local tier. Used while replaying moves on top of a corrected baseline.
    pub fn restore_client_intent(&mut self, snapshot: &MoverSnapshot) {
        self.wants_to_walk = snapshot.wants_to_walk;
        self.wants_to_sprint = snapshot.wants_to_sprint;
        for category in ModifierCategory::ALL {
            self.stacks[category.index()]
                .replace(ModifierTier::Local, &snapshot.category(category).local);
        }
    }

    pub fn replay_checkpoint(&self) -> ReplayCheckpoint {
        ReplayCheckpoint {
            events: self.events.len(),
            baseline: self.snapshot(),
        }
    }

    /// Drops every event raised since `checkpoint` and records only the net
    /// transitions from its baseline to the current state. Replayed moves were
    /// already observed once, live.
    pub fn settle_replay(&mut self, checkpoint: ReplayCheckpoint) {
        self.events.truncate(checkpoint.events);
        let before = checkpoint.baseline;

        for category in ModifierCategory::ALL {
            let previous = before.category(category).level;
            let current = self.level(category);
            if previous != current {
                self.events.push(MovementEvent::LevelChanged {
                    category,
                    previous,
                    current,
                });
            }
        }

        if before.is_sprinting != self.is_sprinting {
            self.events.push(if self.is_sprinting {
                MovementEvent::SprintStarted
            } else {
                MovementEvent::SprintEnded
            });
        }
        if before.is_walking != self.is_walking {
            self.events.push(if self.is_walking {
                MovementEvent::WalkStarted
            } else {
                MovementEvent::WalkEnded
            });
        }

        let stamina = self.stamina.value();
        if !is_nearly_equal(before.stamina, stamina) {
            self.events.push(MovementEvent::Stamina(StaminaEvent::Changed {
                previous: before.stamina,
                current: stamina,
            }));
        }
        if before.stamina_drained != self.stamina.is_drained() {
            self.events.push(MovementEvent::Stamina(if self.stamina.is_drained() {
                StaminaEvent::Drained
            } else {
                StaminaEvent::Recovered
            }));
        }
    }
}
