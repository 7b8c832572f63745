//! # icat Common Library
//!
//! Shared code for the icat services:
//! - Error type used for bootstrap and configuration
//! - TOML configuration loading and config-file resolution
//! - Batch event types and the broadcast EventBus

pub mod config;
pub mod error;
pub mod events;

pub use error::{Error, Result};
