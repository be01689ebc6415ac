//! # Movement Client Library
//!
//! Predicting half of the movement model. The client simulates its own mover
//! immediately, keeps every tick as a saved move until the server acknowledges
//! it, and replays the unacknowledged moves whenever a correction arrives.
//!
//! ## Module Organization
//!
//! ### Prediction Module (`prediction`)
//! Saved move recording and combining, important-move detection, move packet
//! construction, acknowledgement and correction handling, and remote entities
//! observed through world snapshots.
//!
//! ### Input Module (`input`)
//! Seeded scripted input: wandering movement plus sprint, walk and modifier
//! toggles, so headless clients exercise every replicated path.
//!
//! ### Network Module (`network`)
//! UDP connection to the server with simulated latency and packet loss.

pub mod input;
pub mod network;
pub mod prediction;
