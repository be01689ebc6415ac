use crate::math::Vec3;
use crate::modifier::ModifierCategory;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum MovementMode {
    #[default]
    Walking,
    Falling,
    Flying,
}

impl MovementMode {
    pub fn is_grounded_or_falling(self) -> bool {
        matches!(self, MovementMode::Walking | MovementMode::Falling)
    }
}

/// Authoritative transform fields owned by the physics step.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct MovementState {
    pub location: Vec3,
    pub velocity: Vec3,
    pub mode: MovementMode,
}

impl MovementState {
    pub fn at(location: Vec3) -> Self {
        Self {
            location,
            ..Self::default()
        }
    }
}

/// Per-tick input consumed by the physics step.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct MoveInput {
    pub acceleration: Vec3,
    pub jump: bool,
}

impl MoveInput {
    pub fn new(acceleration: Vec3) -> Self {
        Self {
            acceleration,
            jump: false,
        }
    }

    pub fn has_acceleration(&self) -> bool {
        !self.acceleration.is_nearly_zero()
    }
}

/// Multipliers the physics step applies to its own base values this tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EffectiveScalars {
    pub speed: f32,
    pub accel: f32,
    pub braking: f32,
    pub ground_friction: f32,
    pub braking_friction: f32,
    pub gravity_z: f32,
    pub root_motion: f32,
    pub air_control: f32,
    /// Replaces the base air control entirely when set.
    pub air_control_override: Option<f32>,
}

impl Default for EffectiveScalars {
    fn default() -> Self {
        Self {
            speed: 1.0,
            accel: 1.0,
            braking: 1.0,
            ground_friction: 1.0,
            braking_friction: 1.0,
            gravity_z: 1.0,
            root_motion: 1.0,
            air_control: 1.0,
            air_control_override: None,
        }
    }
}

impl EffectiveScalars {
    pub fn apply_air_control(&self, base: f32) -> f32 {
        self.air_control_override
            .unwrap_or(self.air_control * base)
    }
}

/// Deterministic integration step, called identically on client and server.
pub trait MovementPhysics {
    fn simulate_tick(
        &self,
        state: &mut MovementState,
        input: &MoveInput,
        scalars: &EffectiveScalars,
        dt: f32,
    );

    /// Whether `category` may take effect in the current movement state.
    fn resolve_gate(&self, _category: ModifierCategory, state: &MovementState) -> bool {
        state.mode.is_grounded_or_falling()
    }
}
