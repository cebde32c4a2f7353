// =============================================================================
// Mediaron Federated Media Repository - Library Crate
// =============================================================================
//
// Project: Mediaron - Ultra High Performance Federated Media Repository
// Author: arkSong (arksong2018@gmail.com) - Founder of Matrixon Innovation Project
// Date: 2025-04-02
// Version: 0.1.0-alpha
// License: Apache 2.0 / MIT
//
// Description:
//   Core library for the Mediaron media repository: the download and
//   remote-fetch coordination core shared by the client and federation
//   media endpoints of the surrounding server.
//
// =============================================================================

pub mod config;
pub mod database;
pub mod service;
pub mod utils;

pub use config::Config;
pub use service::Services;
pub use utils::error::{Error, Result};

/// Crate version, surfaced by the admin endpoints of the surrounding server.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
