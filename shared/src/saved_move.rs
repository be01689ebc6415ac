//! Saved moves: per-tick snapshots kept until the server acknowledges them.
//!
//! Adjacent unsent moves are merged when nothing observable changed between
//! them. A move that changes a Correction or Server want-set is important and
//! rides along with later packets until acknowledged.

use crate::modifier::ModifierCategory;
use crate::mover::MoverSnapshot;
use crate::movement::MoveInput;
use log::{debug, trace, warn};
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SavedMoveHandle(u32);

/// One client tick kept for resend and replay until the server acknowledges it.
#[derive(Debug, Clone)]
pub struct SavedMove {
    pub id: u32,
    /// Client time at the end of the move.
    pub timestamp: f32,
    pub delta_time: f32,
    pub input: MoveInput,
    pub start: MoverSnapshot,
    pub end: Option<MoverSnapshot>,
    /// Must be resent until acknowledged.
    pub important: bool,
    pub sent: bool,
}

impl SavedMove {
    pub fn handle(&self) -> SavedMoveHandle {
        SavedMoveHandle(self.id)
    }

    pub fn is_finalized(&self) -> bool {
        self.end.is_some()
    }

    /// Whether `self`, a finalized move that has not been sent, can absorb the next
    /// tick's `candidate` without hiding a transition.
    pub fn can_combine_with(&self, candidate: &SavedMove, max_delta_time: f32) -> bool {
        let Some(end) = self.end.as_ref() else {
            return false;
        };
        if self.sent || candidate.is_finalized() {
            return false;
        }
        if self.input.jump || candidate.input.jump {
            return false;
        }
        if self.input != candidate.input {
            return false;
        }
        if self.delta_time + candidate.delta_time > max_delta_time {
            return false;
        }

        let start = &self.start;
        let next = &candidate.start;
        let same = |a: &MoverSnapshot, b: &MoverSnapshot| {
            a.stamina_drained == b.stamina_drained
                && a.wants_to_walk == b.wants_to_walk
                && a.wants_to_sprint == b.wants_to_sprint
                && a.is_walking == b.is_walking
                && a.is_sprinting == b.is_sprinting
                && a.movement.mode == b.movement.mode
                && ModifierCategory::ALL
                    .iter()
                    .all(|category| a.category(*category) == b.category(*category))
        };
        same(start, end) && same(end, next)
    }

    /// A move is important when its requested state differs from the last move the
    /// server acknowledged.
    pub fn is_important(&self, last_acked: Option<&SavedMove>) -> bool {
        let baseline = last_acked.map(|m| &m.start);
        let default = MoverSnapshot::default();
        let baseline = baseline.unwrap_or(&default);
        let start = &self.start;

        if start.wants_to_walk != baseline.wants_to_walk
            || start.wants_to_sprint != baseline.wants_to_sprint
            || start.stamina_drained != baseline.stamina_drained
        {
            return true;
        }
        ModifierCategory::ALL.iter().any(|category| {
            let a = start.category(*category);
            let b = baseline.category(*category);
            a.local != b.local || a.correction != b.correction || a.server != b.server
        })
    }
}

/// Ordered client move history. Append-only until an acknowledgement truncates the
/// front; full buffers drop their oldest move.
#[derive(Debug)]
pub struct SavedMoveBuffer {
    moves: VecDeque<SavedMove>,
    capacity: usize,
    next_id: u32,
    last_acked: Option<SavedMove>,
    ack_timestamp: f32,
}

impl SavedMoveBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            moves: VecDeque::with_capacity(capacity),
            capacity,
            next_id: 0,
            last_acked: None,
            ack_timestamp: f32::NEG_INFINITY,
        }
    }

    pub fn len(&self) -> usize {
        self.moves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.moves.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn ack_timestamp(&self) -> f32 {
        self.ack_timestamp
    }

    pub fn last_acked(&self) -> Option<&SavedMove> {
        self.last_acked.as_ref()
    }

    /// Starts a new move from the state before simulation.
    pub fn record(
        &mut self,
        timestamp: f32,
        delta_time: f32,
        input: MoveInput,
        start: MoverSnapshot,
    ) -> SavedMoveHandle {
        if self.moves.len() >= self.capacity {
            if let Some(dropped) = self.moves.pop_front() {
                warn!(
                    "Saved move buffer full ({}), dropping move at {:.3}",
                    self.capacity, dropped.timestamp
                );
            }
        }
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);
        self.moves.push_back(SavedMove {
            id,
            timestamp,
            delta_time,
            input,
            start,
            end: None,
            important: false,
            sent: false,
        });
        SavedMoveHandle(id)
    }

    /// Freezes a move with its end state. Returns whether it is important.
    pub fn finalize(&mut self, handle: SavedMoveHandle, end: MoverSnapshot) -> bool {
        let last_acked = self.last_acked.take();
        let important = match self.get_mut(handle) {
            Some(saved) => {
                saved.end = Some(end);
                saved.important = saved.is_important(last_acked.as_ref());
                saved.important
            }
            None => false,
        };
        self.last_acked = last_acked;
        important
    }

    /// Merges the unsent move directly before `candidate` into it. On success the
    /// candidate starts from the pending move's start state and covers both delta
    /// times; the caller must resimulate it from that start.
    pub fn try_combine(&mut self, candidate: SavedMoveHandle, max_delta_time: f32) -> bool {
        let Some(index) = self.index_of(candidate) else {
            return false;
        };
        if index == 0 {
            return false;
        }
        if !self.moves[index - 1].can_combine_with(&self.moves[index], max_delta_time) {
            return false;
        }
        let Some(pending) = self.moves.remove(index - 1) else {
            return false;
        };
        trace!(
            "Combining move {} ({:.4}s) into move {}",
            pending.id,
            pending.delta_time,
            candidate.0
        );
        if let Some(merged) = self.get_mut(candidate) {
            merged.start = pending.start;
            merged.delta_time += pending.delta_time;
        }
        true
    }

    /// Drops every move the server acknowledged. Stale acknowledgements are ignored.
    pub fn evict_up_to(&mut self, timestamp: f32) -> usize {
        if timestamp <= self.ack_timestamp {
            debug!("Ignoring stale ack {:.3} (have {:.3})", timestamp, self.ack_timestamp);
            return 0;
        }
        self.ack_timestamp = timestamp;
        let mut evicted = 0;
        while self
            .moves
            .front()
            .map_or(false, |m| m.timestamp <= timestamp)
        {
            if let Some(acked) = self.moves.pop_front() {
                if acked.is_finalized() {
                    self.last_acked = Some(acked);
                }
                evicted += 1;
            }
        }
        evicted
    }

    pub fn get(&self, handle: SavedMoveHandle) -> Option<&SavedMove> {
        self.moves.iter().find(|m| m.id == handle.0)
    }

    pub fn get_mut(&mut self, handle: SavedMoveHandle) -> Option<&mut SavedMove> {
        self.moves.iter_mut().find(|m| m.id == handle.0)
    }

    fn index_of(&self, handle: SavedMoveHandle) -> Option<usize> {
        self.moves.iter().position(|m| m.id == handle.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SavedMove> {
        self.moves.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut SavedMove> {
        self.moves.iter_mut()
    }

    /// Latest move if it is finalized but not yet sent.
    pub fn pending(&self) -> Option<&SavedMove> {
        self.moves
            .back()
            .filter(|m| m.is_finalized() && !m.sent)
    }

    pub fn unsent(&self) -> impl Iterator<Item = &SavedMove> {
        self.moves
            .iter()
            .filter(|m| m.is_finalized() && !m.sent)
    }

    pub fn mark_sent(&mut self, handle: SavedMoveHandle) {
        if let Some(saved) = self.get_mut(handle) {
            saved.sent = true;
        }
    }

    /// Oldest important move already sent once and still unacknowledged.
    pub fn oldest_unacked_important(&self) -> Option<&SavedMove> {
        self.moves.iter().find(|m| m.sent && m.important)
    }
}
