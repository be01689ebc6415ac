use crate::math::Vec3;
use crate::movement::{EffectiveScalars, MoveInput, MovementMode, MovementPhysics, MovementState};
use serde::{Deserialize, Serialize};

/// Reference physics step: flat ground at `floor_z`, walking, falling and flying.
/// Every value here is a base that the modifier scalars multiply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroundPhysics {
    pub max_walk_speed: f32,
    pub max_acceleration: f32,
    pub braking_deceleration: f32,
    pub ground_friction: f32,
    pub braking_friction: f32,
    /// Negative is down.
    pub gravity_z: f32,
    pub air_control: f32,
    pub jump_z_velocity: f32,
    pub floor_z: f32,
}

impl Default for GroundPhysics {
    fn default() -> Self {
        GroundPhysics {
            max_walk_speed: 500.0,
            max_acceleration: 1600.0,
            braking_deceleration: 1680.0,
            ground_friction: 12.0,
            braking_friction: 4.0,
            gravity_z: -980.0,
            air_control: 0.35,
            jump_z_velocity: 420.0,
            floor_z: 0.0,
        }
    }
}

impl GroundPhysics {
    fn clamp_horizontal(velocity: Vec3, max_speed: f32) -> Vec3 {
        let horizontal = velocity.horizontal();
        let speed = horizontal.magnitude();
        if speed > max_speed && speed > 0.0 {
            let clamped = horizontal.scale(max_speed / speed);
            Vec3::new(clamped.x, clamped.y, velocity.z)
        } else {
            velocity
        }
    }

    fn clamp_acceleration(acceleration: Vec3, max_accel: f32) -> Vec3 {
        let mag = acceleration.magnitude();
        if mag > max_accel {
            acceleration.normalize().scale(max_accel)
        } else {
            acceleration
        }
    }

    fn walk(&self, state: &mut MovementState, input: &MoveInput, scalars: &EffectiveScalars, dt: f32) {
        let max_speed = self.max_walk_speed * scalars.speed;
        let accel = Self::clamp_acceleration(
            input.acceleration.horizontal(),
            self.max_acceleration * scalars.accel,
        );
        let mut velocity = state.velocity.horizontal();

        if accel.is_nearly_zero() {
            // Braking: velocity-proportional friction plus constant deceleration.
            let speed = velocity.magnitude();
            if speed > 0.0 {
                let friction = self.braking_friction * scalars.braking_friction;
                let decel = self.braking_deceleration * scalars.braking;
                let new_speed = (speed - (friction * speed + decel) * dt).max(0.0);
                velocity = velocity.scale(new_speed / speed);
            }
        } else {
            // Friction steers existing velocity toward the input direction.
            let friction = self.ground_friction * scalars.ground_friction;
            let speed = velocity.magnitude();
            let desired = accel.normalize().scale(speed);
            velocity = velocity - (velocity - desired).scale((dt * friction).min(1.0));
            velocity += accel.scale(dt);
        }

        state.velocity = Self::clamp_horizontal(velocity, max_speed);
        state.location += state.velocity.scale(dt);
    }

    fn fall(&self, state: &mut MovementState, input: &MoveInput, scalars: &EffectiveScalars, dt: f32) {
        let max_speed = self.max_walk_speed * scalars.speed;
        let air_control = scalars.apply_air_control(self.air_control);
        let lateral = Self::clamp_acceleration(
            input.acceleration.horizontal(),
            self.max_acceleration * scalars.accel,
        )
        .scale(air_control);

        let mut velocity = state.velocity + lateral.scale(dt);
        velocity = Self::clamp_horizontal(velocity, max_speed);
        velocity.z += self.gravity_z * scalars.gravity_z * dt;

        state.velocity = velocity;
        state.location += velocity.scale(dt);

        // Landing
        if state.location.z <= self.floor_z && state.velocity.z <= 0.0 {
            state.location.z = self.floor_z;
            state.velocity.z = 0.0;
            state.mode = MovementMode::Walking;
        }
    }

    fn fly(&self, state: &mut MovementState, input: &MoveInput, scalars: &EffectiveScalars, dt: f32) {
        let accel = Self::clamp_acceleration(input.acceleration, self.max_acceleration * scalars.accel);
        let mut velocity = state.velocity + accel.scale(dt);
        let max_speed = self.max_walk_speed * scalars.speed;
        let speed = velocity.magnitude();
        if speed > max_speed && speed > 0.0 {
            velocity = velocity.scale(max_speed / speed);
        }
        state.velocity = velocity;
        state.location += velocity.scale(dt);
    }
}

impl MovementPhysics for GroundPhysics {
    fn simulate_tick(
        &self,
        state: &mut MovementState,
        input: &MoveInput,
        scalars: &EffectiveScalars,
        dt: f32,
    ) {
        if dt <= 0.0 || !dt.is_finite() {
            return;
        }
        if state.mode == MovementMode::Walking && input.jump {
            state.velocity.z = self.jump_z_velocity;
            state.mode = MovementMode::Falling;
        }
        match state.mode {
            MovementMode::Walking => self.walk(state, input, scalars, dt),
            MovementMode::Falling => self.fall(state, input, scalars, dt),
            MovementMode::Flying => self.fly(state, input, scalars, dt),
        }
    }
}
