//! Panasonic Blu-ray Control
//!
//! Control bridge for networked Panasonic Blu-ray players.
//!
//! This library provides:
//! - The `dvdr_ctrl.cgi` protocol codec and BD/UB variant detection
//! - A device session with status polling and reconnect-and-retry commands
//! - Media-player and remote command dispatch
//! - A device registry and JSON device store
//! - An HTTP API with Server-Sent Events for state updates

pub mod adapters;
pub mod api;
pub mod bus;
pub mod commands;
pub mod config;
pub mod registry;
