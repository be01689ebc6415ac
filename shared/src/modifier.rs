use crate::error::TableError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Movement modifier families. Each category owns its own level table and stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModifierCategory {
    Haste,
    Slow,
    SlowFall,
}

impl ModifierCategory {
    pub const ALL: [ModifierCategory; 3] = [
        ModifierCategory::Haste,
        ModifierCategory::Slow,
        ModifierCategory::SlowFall,
    ];

    /// Position of the category in per-category arrays.
    pub const fn index(self) -> usize {
        match self {
            ModifierCategory::Haste => 0,
            ModifierCategory::Slow => 1,
            ModifierCategory::SlowFall => 2,
        }
    }
}

/// Index into a category's level table, or [`NO_LEVEL`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModifierLevel(u8);

pub const NO_LEVEL: ModifierLevel = ModifierLevel(u8::MAX);

/// Highest number of levels a single category can hold; the last index is reserved for [`NO_LEVEL`].
pub const MAX_LEVELS_PER_CATEGORY: usize = u8::MAX as usize;

impl ModifierLevel {
    pub const fn new(index: u8) -> Self {
        Self(index)
    }

    pub const fn raw(self) -> u8 {
        self.0
    }

    pub fn is_none(self) -> bool {
        self == NO_LEVEL
    }

    pub fn is_some(self) -> bool {
        self != NO_LEVEL
    }

    pub fn index(self) -> Option<usize> {
        if self.is_none() {
            None
        } else {
            Some(self.0 as usize)
        }
    }
}

impl Default for ModifierLevel {
    fn default() -> Self {
        NO_LEVEL
    }
}

impl fmt::Debug for ModifierLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            write!(f, "NO_LEVEL")
        } else {
            write!(f, "L{}", self.0)
        }
    }
}

impl From<u8> for ModifierLevel {
    fn from(value: u8) -> Self {
        Self(value)
    }
}

/// Scalars applied by a Haste or Slow level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MovementModifierParams {
    pub max_walk_speed: f32,
    pub max_acceleration: f32,
    pub braking_deceleration: f32,
    pub ground_friction: f32,
    pub braking_friction: f32,
    /// When set, `max_walk_speed` also scales root motion translation.
    pub affects_root_motion: bool,
}

impl Default for MovementModifierParams {
    fn default() -> Self {
        Self {
            max_walk_speed: 1.0,
            max_acceleration: 1.0,
            braking_deceleration: 1.0,
            ground_friction: 1.0,
            braking_friction: 1.0,
            affects_root_motion: false,
        }
    }
}

impl MovementModifierParams {
    pub fn with_speed(max_walk_speed: f32) -> Self {
        Self {
            max_walk_speed,
            ..Self::default()
        }
    }
}

/// When a slow-fall level starts, whether the vertical velocity is discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FallZPolicy {
    #[default]
    Disabled,
    Enabled,
    /// Only while moving downward.
    Falling,
    /// Only while moving upward.
    Rising,
}

impl FallZPolicy {
    pub fn removes(self, velocity_z: f32) -> bool {
        match self {
            FallZPolicy::Disabled => false,
            FallZPolicy::Enabled => true,
            FallZPolicy::Falling => velocity_z < 0.0,
            FallZPolicy::Rising => velocity_z > 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CurveKey {
    pub velocity_z: f32,
    pub scalar: f32,
}

/// Piecewise-linear gravity scalar keyed by vertical velocity, clamped at both ends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(from = "Vec<CurveKey>", into = "Vec<CurveKey>")]
pub struct GravityCurve {
    keys: Vec<CurveKey>,
}

impl GravityCurve {
    pub fn new(mut keys: Vec<CurveKey>) -> Self {
        keys.retain(|k| k.velocity_z.is_finite() && k.scalar.is_finite());
        keys.sort_by(|a, b| a.velocity_z.total_cmp(&b.velocity_z));
        Self { keys }
    }

    pub fn keys(&self) -> &[CurveKey] {
        &self.keys
    }

    pub fn evaluate(&self, velocity_z: f32) -> Option<f32> {
        let first = self.keys.first()?;
        let last = self.keys.last()?;
        if velocity_z <= first.velocity_z {
            return Some(first.scalar);
        }
        if velocity_z >= last.velocity_z {
            return Some(last.scalar);
        }
        self.keys.windows(2).find_map(|pair| {
            let (a, b) = (pair[0], pair[1]);
            if velocity_z >= a.velocity_z && velocity_z <= b.velocity_z {
                let span = b.velocity_z - a.velocity_z;
                if span <= f32::EPSILON {
                    return Some(b.scalar);
                }
                let t = (velocity_z - a.velocity_z) / span;
                Some(a.scalar + (b.scalar - a.scalar) * t)
            } else {
                None
            }
        })
    }
}

impl From<Vec<CurveKey>> for GravityCurve {
    fn from(keys: Vec<CurveKey>) -> Self {
        Self::new(keys)
    }
}

impl From<GravityCurve> for Vec<CurveKey> {
    fn from(curve: GravityCurve) -> Self {
        curve.keys
    }
}

/// Scalars applied by a SlowFall level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FallingModifierParams {
    pub gravity_scalar: f32,
    /// Replaces `gravity_scalar` when present.
    pub gravity_curve: Option<GravityCurve>,
    pub remove_velocity_z_on_start: FallZPolicy,
    pub override_air_control: bool,
    pub air_control_scalar: f32,
    pub air_control_override: f32,
}

impl Default for FallingModifierParams {
    fn default() -> Self {
        Self {
            gravity_scalar: 1.0,
            gravity_curve: None,
            remove_velocity_z_on_start: FallZPolicy::Disabled,
            override_air_control: false,
            air_control_scalar: 1.0,
            air_control_override: 1.0,
        }
    }
}

impl FallingModifierParams {
    pub fn with_gravity(gravity_scalar: f32, remove_velocity_z_on_start: FallZPolicy) -> Self {
        Self {
            gravity_scalar,
            remove_velocity_z_on_start,
            ..Self::default()
        }
    }

    pub fn gravity_scalar_at(&self, velocity_z: f32) -> f32 {
        match &self.gravity_curve {
            Some(curve) => curve.evaluate(velocity_z).unwrap_or(1.0),
            None => self.gravity_scalar,
        }
    }

    pub fn air_control(&self, current: f32) -> f32 {
        if self.override_air_control {
            self.air_control_override
        } else {
            self.air_control_scalar * current
        }
    }
}

/// Parameter record returned by [`ModifierTable::lookup`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScalingRecord<'a> {
    Movement(&'a MovementModifierParams),
    Falling(&'a FallingModifierParams),
}

/// Append-only mapping between level names and indices for one category.
#[derive(Debug, Clone)]
pub struct LevelTable<P> {
    category: ModifierCategory,
    names: Vec<String>,
    params: Vec<P>,
    index: HashMap<String, ModifierLevel>,
}

impl<P> LevelTable<P> {
    pub fn new(category: ModifierCategory) -> Self {
        Self {
            category,
            names: Vec::new(),
            params: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Registers `name` at the next free index. Registering an existing name keeps
    /// its original index and parameters.
    pub fn register(&mut self, name: &str, params: P) -> Result<ModifierLevel, TableError> {
        if name.is_empty() {
            return Err(TableError::EmptyName {
                category: self.category,
            });
        }
        if let Some(level) = self.index.get(name) {
            return Ok(*level);
        }
        if self.names.len() >= MAX_LEVELS_PER_CATEGORY {
            return Err(TableError::Full {
                category: self.category,
                max: MAX_LEVELS_PER_CATEGORY,
            });
        }
        let level = ModifierLevel::new(self.names.len() as u8);
        self.names.push(name.to_string());
        self.params.push(params);
        self.index.insert(name.to_string(), level);
        Ok(level)
    }

    pub fn level_of(&self, name: &str) -> ModifierLevel {
        self.index.get(name).copied().unwrap_or(NO_LEVEL)
    }

    pub fn name_of(&self, level: ModifierLevel) -> Option<&str> {
        level
            .index()
            .and_then(|i| self.names.get(i))
            .map(String::as_str)
    }

    pub fn params(&self, level: ModifierLevel) -> Option<&P> {
        level.index().and_then(|i| self.params.get(i))
    }

    pub fn contains(&self, level: ModifierLevel) -> bool {
        self.params(level).is_some()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Level tables for every category. Built once at startup and then shared read-only,
/// so indices stay stable for the whole session.
#[derive(Debug, Clone)]
pub struct ModifierTable {
    pub haste: LevelTable<MovementModifierParams>,
    pub slow: LevelTable<MovementModifierParams>,
    pub slow_fall: LevelTable<FallingModifierParams>,
}

pub const DEFAULT_HASTE: &str = "Modifier.Haste";
pub const DEFAULT_SLOW: &str = "Modifier.Slow";
pub const DEFAULT_SLOW_FALL: &str = "Modifier.SlowFall";

impl ModifierTable {
    pub fn empty() -> Self {
        Self {
            haste: LevelTable::new(ModifierCategory::Haste),
            slow: LevelTable::new(ModifierCategory::Slow),
            slow_fall: LevelTable::new(ModifierCategory::SlowFall),
        }
    }

    pub fn level_of(&self, category: ModifierCategory, name: &str) -> ModifierLevel {
        match category {
            ModifierCategory::Haste => self.haste.level_of(name),
            ModifierCategory::Slow => self.slow.level_of(name),
            ModifierCategory::SlowFall => self.slow_fall.level_of(name),
        }
    }

    pub fn name_of(&self, category: ModifierCategory, level: ModifierLevel) -> Option<&str> {
        match category {
            ModifierCategory::Haste => self.haste.name_of(level),
            ModifierCategory::Slow => self.slow.name_of(level),
            ModifierCategory::SlowFall => self.slow_fall.name_of(level),
        }
    }

    pub fn contains(&self, category: ModifierCategory, level: ModifierLevel) -> bool {
        self.lookup(category, level).is_some()
    }

    pub fn lookup(&self, category: ModifierCategory, level: ModifierLevel) -> Option<ScalingRecord<'_>> {
        match category {
            ModifierCategory::Haste => self.haste.params(level).map(ScalingRecord::Movement),
            ModifierCategory::Slow => self.slow.params(level).map(ScalingRecord::Movement),
            ModifierCategory::SlowFall => self.slow_fall.params(level).map(ScalingRecord::Falling),
        }
    }

    pub fn movement_params(
        &self,
        category: ModifierCategory,
        level: ModifierLevel,
    ) -> Option<&MovementModifierParams> {
        match self.lookup(category, level) {
            Some(ScalingRecord::Movement(params)) => Some(params),
            _ => None,
        }
    }

    pub fn falling_params(&self, level: ModifierLevel) -> Option<&FallingModifierParams> {
        self.slow_fall.params(level)
    }
}

impl Default for ModifierTable {
    /// One level per category.
    fn default() -> Self {
        let mut table = Self::empty();
        // Registering into empty tables cannot fail.
        let _ = table
            .haste
            .register(DEFAULT_HASTE, MovementModifierParams::with_speed(1.5));
        let _ = table
            .slow
            .register(DEFAULT_SLOW, MovementModifierParams::with_speed(0.5));
        let _ = table.slow_fall.register(
            DEFAULT_SLOW_FALL,
            FallingModifierParams::with_gravity(0.1, FallZPolicy::Enabled),
        );
        table
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_level_registration_is_append_only() {
        let mut table = LevelTable::new(ModifierCategory::Haste);
        let a = table.register("Haste.Minor", MovementModifierParams::with_speed(1.2)).unwrap();
        let b = table.register("Haste.Major", MovementModifierParams::with_speed(1.8)).unwrap();
        let again = table.register("Haste.Minor", MovementModifierParams::with_speed(9.0)).unwrap();

        assert_eq!(a, ModifierLevel::new(0));
        assert_eq!(b, ModifierLevel::new(1));
        assert_eq!(again, a);
        assert_approx_eq!(table.params(a).unwrap().max_walk_speed, 1.2);
        assert_eq!(table.name_of(b), Some("Haste.Major"));
        assert_eq!(table.level_of("Haste.Unknown"), NO_LEVEL);
    }

    #[test]
    fn test_empty_name_rejected() {
        let mut table: LevelTable<MovementModifierParams> = LevelTable::new(ModifierCategory::Slow);
        assert_eq!(
            table.register("", MovementModifierParams::default()),
            Err(TableError::EmptyName {
                category: ModifierCategory::Slow
            })
        );
    }

    #[test]
    fn test_table_full() {
        let mut table: LevelTable<MovementModifierParams> = LevelTable::new(ModifierCategory::Haste);
        for i in 0..MAX_LEVELS_PER_CATEGORY {
            table
                .register(&format!("Haste.{i}"), MovementModifierParams::default())
                .unwrap();
        }
        assert!(matches!(
            table.register("Haste.Overflow", MovementModifierParams::default()),
            Err(TableError::Full { .. })
        ));
        assert!(!table.contains(NO_LEVEL));
    }

    #[test]
    fn test_default_table_lookup() {
        let table = ModifierTable::default();
        let haste = table.level_of(ModifierCategory::Haste, DEFAULT_HASTE);
        let slow_fall = table.level_of(ModifierCategory::SlowFall, DEFAULT_SLOW_FALL);

        match table.lookup(ModifierCategory::Haste, haste) {
            Some(ScalingRecord::Movement(p)) => assert_approx_eq!(p.max_walk_speed, 1.5),
            other => panic!("unexpected record {:?}", other),
        }
        match table.lookup(ModifierCategory::SlowFall, slow_fall) {
            Some(ScalingRecord::Falling(p)) => {
                assert_approx_eq!(p.gravity_scalar, 0.1);
                assert_eq!(p.remove_velocity_z_on_start, FallZPolicy::Enabled);
            }
            other => panic!("unexpected record {:?}", other),
        }
        assert!(table.lookup(ModifierCategory::Slow, NO_LEVEL).is_none());
    }

    #[test]
    fn test_gravity_curve() {
        let curve = GravityCurve::new(vec![
            CurveKey {
                velocity_z: 0.0,
                scalar: 1.0,
            },
            CurveKey {
                velocity_z: -1000.0,
                scalar: 0.2,
            },
        ]);
        assert_approx_eq!(curve.evaluate(-500.0).unwrap(), 0.6);
        assert_approx_eq!(curve.evaluate(-5000.0).unwrap(), 0.2);
        assert_approx_eq!(curve.evaluate(300.0).unwrap(), 1.0);
        assert!(GravityCurve::default().evaluate(0.0).is_none());

        let params = FallingModifierParams {
            gravity_curve: Some(curve),
            ..FallingModifierParams::default()
        };
        assert_approx_eq!(params.gravity_scalar_at(-500.0), 0.6);
    }

    #[test]
    fn test_fall_z_policy() {
        assert!(!FallZPolicy::Disabled.removes(-10.0));
        assert!(FallZPolicy::Enabled.removes(10.0));
        assert!(FallZPolicy::Falling.removes(-10.0));
        assert!(!FallZPolicy::Falling.removes(10.0));
        assert!(FallZPolicy::Rising.removes(10.0));
    }

    #[test]
    fn test_air_control() {
        let mut params = FallingModifierParams::default();
        params.air_control_scalar = 0.5;
        assert_approx_eq!(params.air_control(0.4), 0.2);
        params.override_air_control = true;
        params.air_control_override = 0.9;
        assert_approx_eq!(params.air_control(0.4), 0.9);
    }
}
