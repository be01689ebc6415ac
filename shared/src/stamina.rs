use crate::math::{is_nearly_equal, is_nearly_zero};
use log::debug;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StaminaConfig {
    pub max_stamina: f32,
    /// Units per second lost while the draining activity is in effect.
    pub drain_rate: f32,
    pub regen_rate: f32,
    /// Regeneration used while drained, typically slower than `regen_rate`.
    pub drained_regen_rate: f32,
    /// Recover from drained by percentage of max instead of an absolute amount.
    pub recovery_from_pct: bool,
    pub recovery_pct: f32,
    pub recovery_amount: f32,
    /// Minimum fraction of max needed to start sprinting.
    pub start_sprint_pct: f32,
    pub drained_speed_scalar: f32,
    pub drained_accel_scalar: f32,
    pub drained_braking_scalar: f32,
}

impl Default for StaminaConfig {
    fn default() -> Self {
        Self {
            max_stamina: 100.0,
            drain_rate: 34.0,
            regen_rate: 20.0,
            drained_regen_rate: 10.0,
            recovery_from_pct: true,
            recovery_pct: 0.2,
            recovery_amount: 20.0,
            start_sprint_pct: 0.05,
            drained_speed_scalar: 0.25,
            drained_accel_scalar: 0.5,
            drained_braking_scalar: 0.5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StaminaEvent {
    Changed { previous: f32, current: f32 },
    MaxChanged { previous: f32, current: f32 },
    Drained,
    Recovered,
}

impl StaminaEvent {
    /// Drained and Recovered happen once per transition; the rest are continuous.
    pub fn is_discrete(&self) -> bool {
        matches!(self, StaminaEvent::Drained | StaminaEvent::Recovered)
    }
}

/// Clamped resource with a hysteresis drained state.
#[derive(Debug, Clone)]
pub struct Stamina {
    value: f32,
    max: f32,
    drained: bool,
    config: StaminaConfig,
    events: Vec<StaminaEvent>,
}

impl Stamina {
    pub fn new(config: StaminaConfig) -> Self {
        let max = config.max_stamina.max(0.0);
        Self {
            value: max,
            max,
            drained: false,
            config,
            events: Vec::new(),
        }
    }

    pub fn value(&self) -> f32 {
        self.value
    }

    pub fn max(&self) -> f32 {
        self.max
    }

    pub fn is_drained(&self) -> bool {
        self.drained
    }

    pub fn config(&self) -> &StaminaConfig {
        &self.config
    }

    pub fn pct(&self) -> f32 {
        if self.max > 0.0 {
            self.value / self.max
        } else {
            0.0
        }
    }

    pub fn set(&mut self, new_value: f32) {
        if !new_value.is_finite() {
            debug!("Ignoring non-finite stamina value {}", new_value);
            return;
        }
        let previous = self.value;
        self.value = new_value.clamp(0.0, self.max);
        if !is_nearly_equal(previous, self.value) {
            self.on_changed(previous);
        }
    }

    pub fn set_max(&mut self, new_max: f32) {
        if !new_max.is_finite() {
            return;
        }
        let previous = self.max;
        self.max = new_max.max(0.0);
        if !is_nearly_equal(previous, self.max) {
            self.events.push(StaminaEvent::MaxChanged {
                previous,
                current: self.max,
            });
            self.set(self.value);
        }
    }

    /// Writes value and drained state directly, without notifications.
    pub fn restore(&mut self, value: f32, drained: bool) {
        self.value = if value.is_finite() {
            value.clamp(0.0, self.max)
        } else {
            self.value
        };
        self.drained = drained;
    }

    /// Drains while `draining`, otherwise regenerates at the normal or drained rate.
    pub fn tick(&mut self, dt: f32, draining: bool) {
        if draining {
            self.set(self.value - self.config.drain_rate * dt);
        } else {
            let rate = if self.drained {
                self.config.drained_regen_rate
            } else {
                self.config.regen_rate
            };
            self.set(self.value + rate * dt);
        }
    }

    pub fn take_events(&mut self) -> Vec<StaminaEvent> {
        std::mem::take(&mut self.events)
    }

    fn is_recovered(&self) -> bool {
        if self.config.recovery_from_pct {
            self.pct() >= self.config.recovery_pct
        } else {
            self.value >= self.config.recovery_amount
        }
    }

    fn on_changed(&mut self, previous: f32) {
        if is_nearly_zero(self.value) {
            self.value = 0.0;
            if !self.drained {
                self.set_drained(true);
            }
        } else if self.drained && self.is_recovered() {
            self.set_drained(false);
        } else if is_nearly_equal(self.value, self.max) {
            self.value = self.max;
            if self.drained {
                self.set_drained(false);
            }
        }
        self.events.push(StaminaEvent::Changed {
            previous,
            current: self.value,
        });
    }

    fn set_drained(&mut self, drained: bool) {
        if self.drained == drained {
            return;
        }
        self.drained = drained;
        debug!("Stamina drained: {}", drained);
        self.events.push(if drained {
            StaminaEvent::Drained
        } else {
            StaminaEvent::Recovered
        });
    }
}
