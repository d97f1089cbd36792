//! Mock servers for adapter integration testing
//!
//! Simulates a Panasonic Blu-ray player's control endpoint so the session
//! can be exercised over real HTTP without hardware.

pub mod bluray;

pub use bluray::{MockBlurayPlayer, PlayerGeneration};
