//! Core logic for the club bot: navigation, user registry, backups and the
//! long-poll supervisor.
//!
//! This crate is framework-agnostic. Telegram lives behind ports (traits)
//! implemented in the adapter crate.

pub mod admin;
pub mod audit;
pub mod backup;
pub mod blocks;
pub mod broadcast;
pub mod config;
pub mod dispatcher;
pub mod domain;
pub mod errors;
pub mod export;
pub mod logging;
pub mod messaging;
pub mod navigation;
pub mod scheduler;
pub mod store;
pub mod supervisor;

pub use errors::{Error, Result};
