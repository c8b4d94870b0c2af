//! Lobby engine for a bunker party game, plus the change relay it can run against.
//!
//! The [`state`] module holds the per-client engine: presence heartbeats, readiness,
//! round start and the [`state::session::LobbySession`] that ties them together.
//! [`services::sync`] keeps a session's view fresh through push or polling, and
//! [`routes`] exposes the relay that fronts a record store for browser clients.

pub mod config;
pub mod dao;
pub mod dto;
pub mod error;
pub mod routes;
pub mod services;
pub mod state;
