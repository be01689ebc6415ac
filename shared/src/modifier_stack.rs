//! Per-category modifier requests at three trust tiers and the level they resolve to.

use crate::modifier::{ModifierCategory, ModifierLevel, NO_LEVEL};
use log::{debug, trace};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Upper bound on the entries of one want-set, both in memory and on the wire.
pub const MAX_MODIFIERS_PER_SET: usize = 8;

/// Trust level of a modifier request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModifierTier {
    /// Client-only prediction. Never part of the authoritative outcome.
    Local,
    /// Predicted by the client, overridden by the server on disagreement.
    Correction,
    /// Initiated by the server; the client only ever receives it.
    Server,
}

impl ModifierTier {
    pub const ALL: [ModifierTier; 3] = [
        ModifierTier::Local,
        ModifierTier::Correction,
        ModifierTier::Server,
    ];
}

/// How the effective level is picked from the confirmed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SelectionPolicy {
    /// Numerically highest level. Tables list levels in increasing strength.
    #[default]
    Strongest,
    /// The entry that has been in the confirmed set the longest.
    Oldest,
    /// The most recently confirmed entry.
    Newest,
}

/// Which tiers feed the confirmed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatherScope {
    /// Predicting client: Local, Correction and Server.
    Predicting,
    /// Authoritative side: Correction and Server only.
    Authority,
}

/// Ordered, bounded set of requested levels. Inserting past the cap evicts the oldest entry.
#[derive(Clone)]
pub struct ModifierWantSet {
    levels: Vec<ModifierLevel>,
    cap: usize,
}

impl Default for ModifierWantSet {
    fn default() -> Self {
        Self::new()
    }
}

impl ModifierWantSet {
    pub fn new() -> Self {
        Self::with_cap(MAX_MODIFIERS_PER_SET)
    }

    /// Creates an empty set; `cap` is clamped to `1..=MAX_MODIFIERS_PER_SET`.
    pub fn with_cap(cap: usize) -> Self {
        let cap = cap.clamp(1, MAX_MODIFIERS_PER_SET);
        Self {
            levels: Vec::with_capacity(cap),
            cap,
        }
    }

    /// Builds a set from untrusted input: drops `NO_LEVEL` and repeats, then keeps
    /// only the newest `MAX_MODIFIERS_PER_SET` entries.
    pub fn from_wire(levels: Vec<ModifierLevel>) -> Self {
        let received = levels.len();
        let mut set = Self::new();
        for level in levels {
            set.promote(level);
        }
        if set.len() < received {
            debug!(
                "Want-set normalised from {} to {} entries",
                received,
                set.len()
            );
        }
        set
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    /// Changes the cap, evicting the oldest entries if the set no longer fits.
    pub fn set_cap(&mut self, cap: usize) {
        self.cap = cap.clamp(1, MAX_MODIFIERS_PER_SET);
        self.evict_overflow();
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    pub fn levels(&self) -> &[ModifierLevel] {
        &self.levels
    }

    pub fn iter(&self) -> impl Iterator<Item = ModifierLevel> + '_ {
        self.levels.iter().copied()
    }

    pub fn contains(&self, level: ModifierLevel) -> bool {
        self.levels.contains(&level)
    }

    /// Appends `level` unless already present. Returns whether the set changed.
    pub fn insert(&mut self, level: ModifierLevel) -> bool {
        if level.is_none() || self.contains(level) {
            return false;
        }
        self.levels.push(level);
        self.evict_overflow();
        true
    }

    /// Moves `level` to the newest position, inserting it if missing.
    pub fn promote(&mut self, level: ModifierLevel) {
        if level.is_none() {
            return;
        }
        self.levels.retain(|l| *l != level);
        self.levels.push(level);
        self.evict_overflow();
    }

    pub fn remove(&mut self, level: ModifierLevel) -> bool {
        let before = self.levels.len();
        self.levels.retain(|l| *l != level);
        self.levels.len() != before
    }

    pub fn clear(&mut self) {
        self.levels.clear();
    }

    /// Replaces the contents with `other`'s entries, keeping this set's cap.
    pub fn assign(&mut self, other: &ModifierWantSet) {
        self.levels.clear();
        self.levels.extend_from_slice(&other.levels);
        self.evict_overflow();
    }

    /// Membership comparison that ignores order.
    pub fn same_members(&self, other: &ModifierWantSet) -> bool {
        self.len() == other.len() && self.levels.iter().all(|l| other.contains(*l))
    }

    fn evict_overflow(&mut self) {
        if self.levels.len() > self.cap {
            let excess = self.levels.len() - self.cap;
            let evicted: Vec<ModifierLevel> = self.levels.drain(..excess).collect();
            trace!("Evicted oldest modifier levels {:?}", evicted);
        }
    }
}

/// Ordered equality, used by combine and important-move checks.
impl PartialEq for ModifierWantSet {
    fn eq(&self, other: &Self) -> bool {
        self.levels == other.levels
    }
}

impl Eq for ModifierWantSet {}

impl std::fmt::Debug for ModifierWantSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.levels.iter()).finish()
    }
}

impl FromIterator<ModifierLevel> for ModifierWantSet {
    fn from_iter<I: IntoIterator<Item = ModifierLevel>>(iter: I) -> Self {
        Self::from_wire(iter.into_iter().collect())
    }
}

impl Serialize for ModifierWantSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.levels.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ModifierWantSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let levels = Vec::<ModifierLevel>::deserialize(deserializer)?;
        Ok(Self::from_wire(levels))
    }
}

/// Level before and after one processing pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelTransition {
    pub previous: ModifierLevel,
    pub current: ModifierLevel,
}

impl LevelTransition {
    pub fn changed(&self) -> bool {
        self.previous != self.current
    }

    pub fn started(&self) -> bool {
        self.previous.is_none() && self.current.is_some()
    }

    pub fn ended(&self) -> bool {
        self.previous.is_some() && self.current.is_none()
    }
}

/// Three tiers of requested levels for one category, the confirmed union and the
/// committed level.
#[derive(Debug, Clone)]
pub struct ModifierStack {
    category: ModifierCategory,
    policy: SelectionPolicy,
    local: ModifierWantSet,
    correction: ModifierWantSet,
    server: ModifierWantSet,
    confirmed: ModifierWantSet,
    level: ModifierLevel,
}

impl ModifierStack {
    pub fn new(category: ModifierCategory, cap: usize, policy: SelectionPolicy) -> Self {
        Self {
            category,
            policy,
            local: ModifierWantSet::with_cap(cap),
            correction: ModifierWantSet::with_cap(cap),
            server: ModifierWantSet::with_cap(cap),
            confirmed: ModifierWantSet::with_cap(cap),
            level: NO_LEVEL,
        }
    }

    pub fn category(&self) -> ModifierCategory {
        self.category
    }

    pub fn policy(&self) -> SelectionPolicy {
        self.policy
    }

    pub fn cap(&self) -> usize {
        self.confirmed.cap()
    }

    /// Committed level, the one parameter lookups use.
    pub fn level(&self) -> ModifierLevel {
        self.level
    }

    pub fn confirmed(&self) -> &ModifierWantSet {
        &self.confirmed
    }

    pub fn wants(&self, tier: ModifierTier) -> &ModifierWantSet {
        match tier {
            ModifierTier::Local => &self.local,
            ModifierTier::Correction => &self.correction,
            ModifierTier::Server => &self.server,
        }
    }

    fn wants_mut(&mut self, tier: ModifierTier) -> &mut ModifierWantSet {
        match tier {
            ModifierTier::Local => &mut self.local,
            ModifierTier::Correction => &mut self.correction,
            ModifierTier::Server => &mut self.server,
        }
    }

    pub fn start(&mut self, tier: ModifierTier, level: ModifierLevel) -> bool {
        self.wants_mut(tier).insert(level)
    }

    pub fn end(&mut self, tier: ModifierTier, level: ModifierLevel) -> bool {
        self.wants_mut(tier).remove(level)
    }

    pub fn clear(&mut self, tier: ModifierTier) {
        self.wants_mut(tier).clear();
    }

    /// Overwrites one tier wholesale, truncating to the stack's cap.
    pub fn replace(&mut self, tier: ModifierTier, wants: &ModifierWantSet) {
        self.wants_mut(tier).assign(wants);
    }

    pub fn is_wanted(&self, level: ModifierLevel) -> bool {
        ModifierTier::ALL
            .iter()
            .any(|tier| self.wants(*tier).contains(level))
    }

    /// Rebuilds the confirmed set. Later tiers are pushed last, so Server wins a tie
    /// against the same level in a lower tier and lower tiers are evicted first.
    pub fn gather(&mut self, scope: GatherScope) {
        self.confirmed.clear();
        let tiers: &[ModifierTier] = match scope {
            GatherScope::Predicting => &ModifierTier::ALL,
            GatherScope::Authority => &[ModifierTier::Correction, ModifierTier::Server],
        };
        for tier in tiers {
            let wants = match tier {
                ModifierTier::Local => &self.local,
                ModifierTier::Correction => &self.correction,
                ModifierTier::Server => &self.server,
            };
            for level in wants.levels() {
                self.confirmed.promote(*level);
            }
        }
    }

    pub fn resolve(&self) -> ModifierLevel {
        let picked = match self.policy {
            SelectionPolicy::Strongest => self.confirmed.iter().max(),
            SelectionPolicy::Oldest => self.confirmed.iter().next(),
            SelectionPolicy::Newest => self.confirmed.iter().last(),
        };
        picked.unwrap_or(NO_LEVEL)
    }

    /// Gather, Resolve, Gate and Commit. A closed gate yields `NO_LEVEL` but leaves
    /// every want-set intact, so the request re-applies once the gate opens.
    pub fn process(&mut self, scope: GatherScope, gate_open: bool) -> LevelTransition {
        self.gather(scope);
        let resolved = if gate_open { self.resolve() } else { NO_LEVEL };
        self.commit(resolved)
    }

    /// Commits a level received through replication without running the state machine.
    pub fn set_replicated_level(&mut self, level: ModifierLevel) -> LevelTransition {
        self.commit(level)
    }

    /// Restores a previously committed level without reporting a transition.
    pub fn restore_level(&mut self, level: ModifierLevel) {
        self.level = level;
    }

    fn commit(&mut self, level: ModifierLevel) -> LevelTransition {
        let transition = LevelTransition {
            previous: self.level,
            current: level,
        };
        if transition.changed() {
            debug!(
                "{:?} level {:?} -> {:?}",
                self.category, transition.previous, transition.current
            );
        }
        self.level = level;
        transition
    }

    /// True when the reported Correction or Server tier differs from this stack's.
    pub fn diverges_from(&self, correction: &ModifierWantSet, server: &ModifierWantSet) -> bool {
        self.correction != *correction || self.server != *server
    }
}
