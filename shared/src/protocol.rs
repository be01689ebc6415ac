use crate::error::WireError;
use crate::math::Vec3;
use crate::modifier::{ModifierCategory, ModifierLevel};
use crate::modifier_stack::ModifierWantSet;
use crate::mover::{CategorySnapshot, MoverSnapshot};
use crate::movement::{MoveInput, MovementMode, MovementState};
use crate::saved_move::SavedMove;
use bincode::Options;
use serde::{Deserialize, Serialize};

pub const PROTOCOL_VERSION: u32 = 2;
pub const MAX_PACKET_SIZE: usize = 2048;

pub const FLAG_JUMP: u8 = 0x01;
pub const FLAG_WALK: u8 = 0x10;
pub const FLAG_SPRINT: u8 = 0x20;
pub const FLAGEX_WALK: u8 = 0x01;
pub const FLAGEX_SPRINT: u8 = 0x02;

/// Client requested tiers for one category, as sent with a move.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CategoryWants {
    pub local: ModifierWantSet,
    pub correction: ModifierWantSet,
    /// Echo of the client's copy of the server tier.
    pub server: ModifierWantSet,
}

impl From<&CategorySnapshot> for CategoryWants {
    fn from(snapshot: &CategorySnapshot) -> Self {
        Self {
            local: snapshot.local.clone(),
            correction: snapshot.correction.clone(),
            server: snapshot.server.clone(),
        }
    }
}

/// Authoritative tiers for one category, as sent with a correction.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CorrectionWants {
    pub correction: ModifierWantSet,
    pub server: ModifierWantSet,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoveData {
    pub timestamp: f32,
    pub delta_time: f32,
    pub acceleration: Vec3,
    pub compressed_flags: u8,
    pub compressed_flags_extra: Option<u8>,
    pub location: Vec3,
    pub movement_mode: MovementMode,
    pub stamina_end: Option<f32>,
    pub modifiers: [CategoryWants; 3],
}

impl MoveData {
    pub fn from_saved_move(saved: &SavedMove) -> Self {
        let start = &saved.start;
        let end = saved.end.as_ref().unwrap_or(start);

        let mut flags = 0;
        let mut extra = 0;
        if saved.input.jump {
            flags |= FLAG_JUMP;
        }
        if start.wants_to_walk {
            flags |= FLAG_WALK;
            extra |= FLAGEX_WALK;
        }
        if start.wants_to_sprint {
            flags |= FLAG_SPRINT;
            extra |= FLAGEX_SPRINT;
        }

        Self {
            timestamp: saved.timestamp,
            delta_time: saved.delta_time,
            acceleration: saved.input.acceleration,
            compressed_flags: flags,
            compressed_flags_extra: (extra != 0).then_some(extra),
            location: end.movement.location,
            movement_mode: end.movement.mode,
            stamina_end: (end.stamina != 0.0).then_some(end.stamina),
            modifiers: ModifierCategory::ALL.map(|category| start.category(category).into()),
        }
    }

    pub fn input(&self) -> MoveInput {
        MoveInput {
            acceleration: self.acceleration,
            jump: self.compressed_flags & FLAG_JUMP != 0,
        }
    }

    pub fn wants_to_walk(&self) -> bool {
        self.compressed_flags & FLAG_WALK != 0
            || self.compressed_flags_extra.unwrap_or(0) & FLAGEX_WALK != 0
    }

    pub fn wants_to_sprint(&self) -> bool {
        self.compressed_flags & FLAG_SPRINT != 0
            || self.compressed_flags_extra.unwrap_or(0) & FLAGEX_SPRINT != 0
    }

    pub fn stamina(&self) -> f32 {
        self.stamina_end.unwrap_or(0.0)
    }

    pub fn wants(&self, category: ModifierCategory) -> &CategoryWants {
        &self.modifiers[category.index()]
    }
}

/// Server correction for every move up to `timestamp`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoveResponse {
    pub timestamp: f32,
    pub movement: MovementState,
    pub stamina: f32,
    pub stamina_drained: bool,
    pub modifiers: [CorrectionWants; 3],
    /// Present when the server accepted part of the client position.
    pub client_auth_alpha: Option<f32>,
}

impl MoveResponse {
    pub fn wants(&self, category: ModifierCategory) -> &CorrectionWants {
        &self.modifiers[category.index()]
    }
}

/// What other clients see of an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicatedEntity {
    pub id: u32,
    pub movement: MovementState,
    pub levels: [ModifierLevel; 3],
    pub stamina: f32,
    pub is_sprinting: bool,
    pub is_walking: bool,
}

impl ReplicatedEntity {
    pub fn from_snapshot(id: u32, snapshot: &MoverSnapshot) -> Self {
        Self {
            id,
            movement: snapshot.movement,
            levels: ModifierCategory::ALL.map(|category| snapshot.category(category).level),
            stamina: snapshot.stamina,
            is_sprinting: snapshot.is_sprinting,
            is_walking: snapshot.is_walking,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Packet {
    Connect {
        client_version: u32,
    },
    /// Oldest unacknowledged important move, resent, followed by new moves in order.
    Move {
        old: Option<MoveData>,
        moves: Vec<MoveData>,
    },
    Disconnect,

    Connected {
        client_id: u32,
        spawn: Vec3,
    },
    AckGoodMove {
        timestamp: f32,
    },
    MoveResponse(MoveResponse),
    WorldState {
        tick: u32,
        entities: Vec<ReplicatedEntity>,
    },
    Disconnected {
        reason: String,
    },
}

fn wire_options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .allow_trailing_bytes()
        .with_limit(MAX_PACKET_SIZE as u64)
}

pub fn encode(packet: &Packet) -> Result<Vec<u8>, WireError> {
    let bytes = wire_options().serialize(packet).map_err(|e| match *e {
        bincode::ErrorKind::SizeLimit => WireError::TooLarge {
            size: wire_size_hint(packet),
            limit: MAX_PACKET_SIZE,
        },
        _ => WireError::Encode(e),
    })?;
    Ok(bytes)
}

pub fn decode(bytes: &[u8]) -> Result<Packet, WireError> {
    if bytes.len() > MAX_PACKET_SIZE {
        return Err(WireError::TooLarge {
            size: bytes.len(),
            limit: MAX_PACKET_SIZE,
        });
    }
    wire_options().deserialize(bytes).map_err(WireError::Decode)
}

fn wire_size_hint(packet: &Packet) -> usize {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .serialized_size(packet)
        .map_or(usize::MAX, |size| size as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modifier::NO_LEVEL;
    use crate::saved_move::SavedMoveBuffer;

    fn set(levels: &[u8]) -> ModifierWantSet {
        levels.iter().map(|l| ModifierLevel::new(*l)).collect()
    }

    fn saved_move(start: MoverSnapshot, jump: bool) -> SavedMove {
        let mut buffer = SavedMoveBuffer::new(4);
        let input = MoveInput {
            acceleration: Vec3::new(10.0, 0.0, 0.0),
            jump,
        };
        let handle = buffer.record(1.5, 0.016, input, start.clone());
        let mut end = start;
        end.movement.location = Vec3::new(3.0, 4.0, 0.0);
        end.stamina = 80.0;
        buffer.finalize(handle, end);
        buffer.get(handle).cloned().unwrap()
    }

    #[test]
    fn test_packet_serialization_connect() {
        let packet = Packet::Connect {
            client_version: PROTOCOL_VERSION,
        };
        let bytes = encode(&packet).unwrap();
        assert_eq!(decode(&bytes).unwrap(), packet);
    }

    #[test]
    fn test_move_data_flags() {
        let mut start = MoverSnapshot::default();
        start.wants_to_sprint = true;
        let data = MoveData::from_saved_move(&saved_move(start, true));

        assert_eq!(data.compressed_flags, FLAG_JUMP | FLAG_SPRINT);
        assert_eq!(data.compressed_flags_extra, Some(FLAGEX_SPRINT));
        assert!(data.wants_to_sprint());
        assert!(!data.wants_to_walk());
        assert!(data.input().jump);
        assert_eq!(data.location, Vec3::new(3.0, 4.0, 0.0));
        assert_eq!(data.stamina_end, Some(80.0));
    }

    #[test]
    fn test_move_data_defaults_omitted() {
        let data = MoveData::from_saved_move(&saved_move(MoverSnapshot::default(), false));
        assert_eq!(data.compressed_flags, 0);
        assert_eq!(data.compressed_flags_extra, None);
    }

    #[test]
    fn test_extra_flags_read_as_union() {
        let mut data = MoveData::from_saved_move(&saved_move(MoverSnapshot::default(), false));
        data.compressed_flags_extra = Some(FLAGEX_WALK);
        assert!(data.wants_to_walk());
    }

    #[test]
    fn test_move_packet_carries_tiers() {
        let mut start = MoverSnapshot::default();
        start.modifiers[ModifierCategory::Slow.index()].local = set(&[0]);
        start.modifiers[ModifierCategory::Slow.index()].correction = set(&[1, 0]);
        let data = MoveData::from_saved_move(&saved_move(start, false));

        let packet = Packet::Move {
            old: None,
            moves: vec![data.clone()],
        };
        let decoded = decode(&encode(&packet).unwrap()).unwrap();
        let Packet::Move { moves, .. } = decoded else {
            panic!("Wrong packet type after deserialization");
        };
        let slow = moves[0].wants(ModifierCategory::Slow);
        assert_eq!(slow.local, set(&[0]));
        assert_eq!(slow.correction.levels(), &[ModifierLevel::new(1), ModifierLevel::new(0)]);
        assert!(moves[0].wants(ModifierCategory::Haste).correction.is_empty());
    }

    #[test]
    fn test_oversized_want_set_truncated_on_decode() {
        let raw: Vec<ModifierLevel> = (0..12).map(ModifierLevel::new).chain([NO_LEVEL]).collect();
        let bytes = bincode::DefaultOptions::new()
            .with_fixint_encoding()
            .serialize(&raw)
            .unwrap();
        let set: ModifierWantSet = bincode::DefaultOptions::new()
            .with_fixint_encoding()
            .deserialize(&bytes)
            .unwrap();
        assert_eq!(set.len(), 8);
        assert_eq!(set.levels()[0], ModifierLevel::new(4));
        assert!(!set.contains(NO_LEVEL));
    }

    #[test]
    fn test_response_roundtrip_with_alpha() {
        let response = MoveResponse {
            timestamp: 2.0,
            movement: MovementState::at(Vec3::new(1.0, 2.0, 3.0)),
            stamina: 42.0,
            stamina_drained: false,
            modifiers: Default::default(),
            client_auth_alpha: Some(0.4),
        };
        let bytes = encode(&Packet::MoveResponse(response.clone())).unwrap();
        assert_eq!(decode(&bytes).unwrap(), Packet::MoveResponse(response));
    }

    #[test]
    fn test_too_large_rejected() {
        let bytes = vec![0u8; MAX_PACKET_SIZE + 1];
        assert!(matches!(decode(&bytes), Err(WireError::TooLarge { .. })));
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(matches!(decode(&[0xff, 0xff, 0xff, 0xff]), Err(WireError::Decode(_))));
    }
}
