use crate::authority::{ClientAuthParams, ClientAuthSources};
use crate::error::{ConfigError, TableError};
use crate::modifier::{
    FallZPolicy, FallingModifierParams, ModifierCategory, ModifierTable, MovementModifierParams,
    DEFAULT_HASTE, DEFAULT_SLOW, DEFAULT_SLOW_FALL,
};
use crate::modifier_stack::{SelectionPolicy, MAX_MODIFIERS_PER_SET};
use crate::physics::GroundPhysics;
use crate::stamina::StaminaConfig;
use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Correction, combine and send tuning shared by client and server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkSettings {
    /// Squared distance beyond which the server corrects the client position.
    pub max_position_error_squared: f32,
    pub stamina_correction_threshold: f32,
    /// Longest delta time the server simulates for one move; also the combine budget.
    pub max_move_delta_time: f32,
    pub client_send_interval: f32,
    pub saved_move_capacity: usize,
    /// Distance under which reported and server positions count as equal for client authority.
    pub authority_tolerance: f32,
    /// Slack allowed between a move's delta time and the client timestamps it spans.
    pub timestamp_tolerance: f32,
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            max_position_error_squared: 3.0,
            stamina_correction_threshold: 2.0,
            max_move_delta_time: 0.125,
            client_send_interval: 1.0 / 30.0,
            saved_move_capacity: 96,
            authority_tolerance: 0.001,
            timestamp_tolerance: 0.002,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedLevel<P> {
    pub name: String,
    #[serde(flatten)]
    pub params: P,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModifierConfig {
    pub policy: SelectionPolicy,
    pub max_hastes: usize,
    pub max_slows: usize,
    pub max_slow_falls: usize,
    /// Levels in increasing strength order; position is the level index.
    pub haste: Vec<NamedLevel<MovementModifierParams>>,
    pub slow: Vec<NamedLevel<MovementModifierParams>>,
    pub slow_fall: Vec<NamedLevel<FallingModifierParams>>,
}

impl Default for ModifierConfig {
    fn default() -> Self {
        Self {
            policy: SelectionPolicy::Strongest,
            max_hastes: MAX_MODIFIERS_PER_SET,
            max_slows: MAX_MODIFIERS_PER_SET,
            max_slow_falls: MAX_MODIFIERS_PER_SET,
            haste: vec![NamedLevel {
                name: DEFAULT_HASTE.to_string(),
                params: MovementModifierParams::with_speed(1.5),
            }],
            slow: vec![NamedLevel {
                name: DEFAULT_SLOW.to_string(),
                params: MovementModifierParams::with_speed(0.5),
            }],
            slow_fall: vec![NamedLevel {
                name: DEFAULT_SLOW_FALL.to_string(),
                params: FallingModifierParams::with_gravity(0.1, FallZPolicy::Enabled),
            }],
        }
    }
}

impl ModifierConfig {
    pub fn cap(&self, category: ModifierCategory) -> usize {
        match category {
            ModifierCategory::Haste => self.max_hastes,
            ModifierCategory::Slow => self.max_slows,
            ModifierCategory::SlowFall => self.max_slow_falls,
        }
    }

    pub fn build_table(&self) -> Result<ModifierTable, TableError> {
        let mut table = ModifierTable::empty();
        for level in &self.haste {
            table.haste.register(&level.name, level.params.clone())?;
        }
        for level in &self.slow {
            table.slow.register(&level.name, level.params.clone())?;
        }
        for level in &self.slow_fall {
            table.slow_fall.register(&level.name, level.params.clone())?;
        }
        Ok(table)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MovementConfig {
    pub stamina: StaminaConfig,
    pub modifiers: ModifierConfig,
    pub network: NetworkSettings,
    pub physics: GroundPhysics,
    pub client_auth: ClientAuthSources,
}

impl Default for MovementConfig {
    fn default() -> Self {
        let mut client_auth = HashMap::new();
        client_auth.insert("Knockback".to_string(), ClientAuthParams::default());
        Self {
            stamina: StaminaConfig::default(),
            modifiers: ModifierConfig::default(),
            network: NetworkSettings::default(),
            physics: GroundPhysics::default(),
            client_auth,
        }
    }
}

impl MovementConfig {
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let mut config: MovementConfig = toml::from_str(source)?;
        config.validate();
        config.modifiers.build_table()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&source)
    }

    /// Clamps out-of-range values, warning about each one.
    pub fn validate(&mut self) {
        for (name, cap) in [
            ("max_hastes", &mut self.modifiers.max_hastes),
            ("max_slows", &mut self.modifiers.max_slows),
            ("max_slow_falls", &mut self.modifiers.max_slow_falls),
        ] {
            let clamped = (*cap).clamp(1, MAX_MODIFIERS_PER_SET);
            if clamped != *cap {
                warn!("modifiers.{} = {} clamped to {}", name, cap, clamped);
                *cap = clamped;
            }
        }

        let stamina = &mut self.stamina;
        for (name, value) in [
            ("max_stamina", &mut stamina.max_stamina),
            ("drain_rate", &mut stamina.drain_rate),
            ("regen_rate", &mut stamina.regen_rate),
            ("drained_regen_rate", &mut stamina.drained_regen_rate),
            ("recovery_amount", &mut stamina.recovery_amount),
        ] {
            if !value.is_finite() || *value < 0.0 {
                warn!("stamina.{} = {} clamped to 0", name, value);
                *value = 0.0;
            }
        }
        for (name, value) in [
            ("recovery_pct", &mut stamina.recovery_pct),
            ("start_sprint_pct", &mut stamina.start_sprint_pct),
        ] {
            if !(0.0..=1.0).contains(&*value) {
                let clamped = if value.is_finite() { value.clamp(0.0, 1.0) } else { 0.0 };
                warn!("stamina.{} = {} clamped to {}", name, value, clamped);
                *value = clamped;
            }
        }

        let network = &mut self.network;
        let defaults = NetworkSettings::default();
        if network.max_move_delta_time <= 0.0 || !network.max_move_delta_time.is_finite() {
            warn!("network.max_move_delta_time must be positive, using default");
            network.max_move_delta_time = defaults.max_move_delta_time;
        }
        if network.saved_move_capacity == 0 {
            warn!("network.saved_move_capacity must be positive, using default");
            network.saved_move_capacity = defaults.saved_move_capacity;
        }
        if network.client_send_interval < 0.0 || !network.client_send_interval.is_finite() {
            warn!("network.client_send_interval must not be negative, using default");
            network.client_send_interval = defaults.client_send_interval;
        }

        for (source, params) in self.client_auth.iter_mut() {
            if params.reject_client_auth_distance < params.max_client_auth_distance {
                warn!(
                    "client_auth.{}: reject distance {} below max distance {}, raising it",
                    source, params.reject_client_auth_distance, params.max_client_auth_distance
                );
                params.reject_client_auth_distance = params.max_client_auth_distance;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use crate::modifier::ModifierLevel;

    #[test]
    fn test_defaults() {
        let config = MovementConfig::default();
        assert_approx_eq!(config.network.stamina_correction_threshold, 2.0);
        assert_eq!(config.modifiers.cap(ModifierCategory::Haste), 8);
        assert!(config.client_auth.contains_key("Knockback"));

        let table = config.modifiers.build_table().unwrap();
        assert_eq!(
            table.level_of(ModifierCategory::Slow, DEFAULT_SLOW),
            ModifierLevel::new(0)
        );
    }

    #[test]
    fn test_parse_toml() {
        let config = MovementConfig::from_toml_str(
            r#"
            [stamina]
            max_stamina = 150.0
            recovery_pct = 0.3

            [modifiers]
            policy = "newest"
            max_hastes = 4

            [[modifiers.haste]]
            name = "Haste.Minor"
            max_walk_speed = 1.2

            [[modifiers.haste]]
            name = "Haste.Major"
            max_walk_speed = 1.8
            max_acceleration = 1.5

            [[modifiers.slow_fall]]
            name = "Feather"
            gravity_scalar = 0.25
            remove_velocity_z_on_start = "falling"

            [network]
            client_send_interval = 0.05

            [client_auth.Launch]
            max_client_auth_distance = 400.0
            reject_client_auth_distance = 1200.0
            priority = 3
            "#,
        )
        .unwrap();

        assert_approx_eq!(config.stamina.max_stamina, 150.0);
        assert_approx_eq!(config.stamina.drain_rate, 34.0);
        assert_eq!(config.modifiers.policy, SelectionPolicy::Newest);
        assert_eq!(config.modifiers.max_hastes, 4);
        assert_eq!(config.modifiers.max_slows, 8);
        assert_eq!(config.client_auth["Launch"].priority, 3);
        assert!(config.client_auth["Launch"].enabled);

        let table = config.modifiers.build_table().unwrap();
        let major = table.level_of(ModifierCategory::Haste, "Haste.Major");
        assert_eq!(major, ModifierLevel::new(1));
        let params = table.movement_params(ModifierCategory::Haste, major).unwrap();
        assert_approx_eq!(params.max_acceleration, 1.5);
        assert_approx_eq!(params.braking_friction, 1.0);

        let feather = table.level_of(ModifierCategory::SlowFall, "Feather");
        let falling = table.falling_params(feather).unwrap();
        assert_eq!(falling.remove_velocity_z_on_start, FallZPolicy::Falling);
    }

    #[test]
    fn test_validate_clamps() {
        let config = MovementConfig::from_toml_str(
            r#"
            [modifiers]
            max_slows = 0
            max_hastes = 40

            [stamina]
            drain_rate = -3.0
            recovery_pct = 1.5

            [client_auth.Bad]
            max_client_auth_distance = 300.0
            reject_client_auth_distance = 100.0
            "#,
        )
        .unwrap();
        assert_eq!(config.modifiers.max_slows, 1);
        assert_eq!(config.modifiers.max_hastes, 8);
        assert_eq!(config.stamina.drain_rate, 0.0);
        assert_approx_eq!(config.stamina.recovery_pct, 1.0);
        assert_approx_eq!(config.client_auth["Bad"].reject_client_auth_distance, 300.0);
    }

    #[test]
    fn test_parse_error() {
        let result = MovementConfig::from_toml_str("[stamina]\nmax_stamina = \"lots\"");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_missing_file() {
        let result = MovementConfig::load("/definitely/not/here.toml");
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }
}
