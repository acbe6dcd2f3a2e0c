//! Marketsync Core - Shared identity and resource types.
//!
//! This crate provides the types used across all Marketsync components:
//! - `session` - Session and identity synchronization engine
//! - `cli` - Command-line driver for the engine
//!
//! # Architecture
//!
//! The core crate contains only types and pure functions - no I/O, no storage,
//! no HTTP clients. This keeps it lightweight and allows it to be used anywhere.
//!
//! # Modules
//!
//! - [`types`] - Newtype wrappers for ids, emails, wallets, roles, profiles and
//!   resource collections

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
