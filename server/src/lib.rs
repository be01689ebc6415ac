//! # Movement Server Library
//!
//! Authoritative half of the predicted movement model. Clients simulate their
//! own movement ahead of the server and stream the resulting moves; the server
//! replays every move against its own copy of the mover and either acknowledges
//! the batch or sends back a correction.
//!
//! ## Module Organization
//!
//! ### Client Manager Module (`client_manager`)
//! Connection lifecycle and per-client move queues. Duplicate and overtaken
//! moves (a resent important move that already arrived) are dropped here.
//!
//! ### Game Module (`game`)
//! One [`game::ServerEntity`] per client holding the authoritative mover and its
//! client authority grants. Move validation, divergence detection and response
//! construction live here, along with the gameplay hooks that start modifiers,
//! grant client authority and adjust stamina.
//!
//! ### Network Module (`network`)
//! UDP socket tasks and the fixed-rate server loop. Each tick drains the move
//! queues, answers every client with one acknowledgement or correction, then
//! broadcasts the replicated world state.

pub mod client_manager;
pub mod game;
pub mod network;
