//! Use-case services over the engine and the stores.
//!
//! # Responsibility
//! - Keep the in-memory tree and its store in step for every edit.
//! - Expose read-side selection (transmitters by area) to callers.

pub mod hierarchy_service;
pub mod transmitter_service;
