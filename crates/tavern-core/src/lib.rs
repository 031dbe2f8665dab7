//! Core types and error definitions for tavern.
//!
//! This crate provides the foundational types shared across all tavern crates:
//! the error taxonomy, the records that make up a session, the shape of an
//! inbound action, and the payloads pushed to connected clients.
//!
//! # Main types
//!
//! - [`TavernError`] - Unified error enum for every tavern subsystem.
//! - [`TavernResult`] - Convenience alias for `Result<T, TavernError>`.
//! - [`Participant`] - A named player with a role, unique by name within a session.
//! - [`DialogueEntry`] - One speaker/text pair of a session transcript.
//! - [`ChatTurn`] - One turn of the generator-facing history.
//! - [`Action`] - An inbound request against a session.
//! - [`Payload`] - A message broadcast to a session's connections.

/// In-character apology strings used when the generator fails.
pub mod apology;
/// Error taxonomy.
pub mod error;
/// Session records and inbound actions.
pub mod message;
/// Broadcast payloads and their byte encoding.
pub mod payload;

pub use apology::{random_apology, APOLOGIES, WAIT_MESSAGE};
pub use error::{TavernError, TavernResult};
pub use message::{Action, ChatTurn, DialogueEntry, Participant};
pub use payload::Payload;
