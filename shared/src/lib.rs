pub mod authority;
pub mod config;
pub mod error;
pub mod math;
pub mod modifier;
pub mod modifier_stack;
pub mod movement;
pub mod mover;
pub mod physics;
pub mod protocol;
pub mod saved_move;
pub mod stamina;

pub use authority::{blend_toward_prediction, AuthorityVerdict, ClientAuthParams, ClientAuthStack};
pub use config::{MovementConfig, NetworkSettings};
pub use error::{ConfigError, TableError, WireError};
pub use math::Vec3;
pub use modifier::{ModifierCategory, ModifierLevel, ModifierTable, NO_LEVEL};
pub use modifier_stack::{ModifierTier, ModifierWantSet, SelectionPolicy};
pub use movement::{EffectiveScalars, MoveInput, MovementMode, MovementPhysics, MovementState};
pub use mover::{Mover, MoverSnapshot, MovementEvent, NetRole, ReplayCheckpoint};
pub use physics::GroundPhysics;
pub use protocol::{MoveData, MoveResponse, Packet, ReplicatedEntity};
pub use saved_move::{SavedMove, SavedMoveBuffer, SavedMoveHandle};
pub use stamina::{Stamina, StaminaConfig, StaminaEvent};

pub const SERVER_PORT: u16 = 8080;
pub const DEFAULT_TICK_RATE: u32 = 60;
/// Seconds without a packet before a client is dropped.
pub const CLIENT_TIMEOUT_SECS: u64 = 5;
pub const SPAWN_LOCATION: Vec3 = Vec3::new(0.0, 0.0, 0.0);
/// Horizontal gap between consecutive spawn points.
pub const SPAWN_SPACING: f32 = 200.0;
