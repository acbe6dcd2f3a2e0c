//! Core types for Marketsync.
//!
//! This module provides type-safe wrappers for identity and resource concepts.

pub mod email;
pub mod id;
pub mod profile;
pub mod resource;
pub mod role;
pub mod wallet;

pub use email::{Email, EmailError};
pub use id::*;
pub use profile::Profile;
pub use resource::{LineItem, ResourceSet, Wishlist};
pub use role::{Role, RoleParseError, Scope};
pub use wallet::{WalletAddress, WalletAddressError};
