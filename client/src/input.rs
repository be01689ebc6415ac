//! Scripted input for headless clients, reproducible from a seed

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::{ModifierCategory, MoveInput, Vec3};

/// Acceleration magnitude the bot requests while moving.
const BOT_ACCELERATION: f32 = 2048.0;

/// What the bot does during one client tick
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct InputFrame {
    pub input: MoveInput,
    pub wants_to_sprint: bool,
    pub wants_to_walk: bool,
    /// Category whose modifier request was pressed this frame
    pub toggle_modifier: Option<ModifierCategory>,
}

/// Produces wandering movement with occasional gait and modifier changes
pub struct InputManager {
    rng: StdRng,
    direction: Vec3,
    hold_remaining: f32,
    sprinting: bool,
    walking: bool,
}

impl InputManager {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            direction: Vec3::ZERO,
            hold_remaining: 0.0,
            sprinting: false,
            walking: false,
        }
    }

    /// Advances the script by `dt` seconds
    pub fn update(&mut self, dt: f32) -> InputFrame {
        self.hold_remaining -= dt;
        if self.hold_remaining <= 0.0 {
            self.pick_direction();
        }

        // Per-second rates scaled to this tick
        if self.rng.gen_bool((0.3 * dt as f64).clamp(0.0, 1.0)) {
            self.sprinting = !self.sprinting;
            if self.sprinting {
                self.walking = false;
            }
        }
        if self.rng.gen_bool((0.1 * dt as f64).clamp(0.0, 1.0)) {
            self.walking = !self.walking;
            if self.walking {
                self.sprinting = false;
            }
        }

        let toggle_modifier = if self.rng.gen_bool((0.2 * dt as f64).clamp(0.0, 1.0)) {
            Some(ModifierCategory::ALL[self.rng.gen_range(0..ModifierCategory::ALL.len())])
        } else {
            None
        };

        let jump = self.rng.gen_bool((0.2 * dt as f64).clamp(0.0, 1.0));

        InputFrame {
            input: MoveInput {
                acceleration: self.direction.scale(BOT_ACCELERATION),
                jump,
            },
            wants_to_sprint: self.sprinting,
            wants_to_walk: self.walking,
            toggle_modifier,
        }
    }

    fn pick_direction(&mut self) {
        self.hold_remaining = self.rng.gen_range(0.5..2.0);
        // Standing still now and then keeps braking paths exercised
        if self.rng.gen_bool(0.2) {
            self.direction = Vec3::ZERO;
            return;
        }
        let angle = self.rng.gen_range(0.0..std::f32::consts::TAU);
        self.direction = Vec3::new(angle.cos(), angle.sin(), 0.0);
    }
}
