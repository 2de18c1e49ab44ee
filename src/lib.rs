//! Caruso - Live Camera Media Lifecycle Library
//!
//! Hexagonal Architecture:
//! - domain/: Pure state records and lifecycle events
//! - ports/: Trait definitions
//! - adapters/: Concrete implementations (ffmpeg processes, event hub)
//! - application/: Services (stream sharing, supervision, recordings, utilities)
//! - config: Environment configuration

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod error;
pub mod ports;

// Re-exports for convenience
pub use application::manager::MediaManager;
pub use config::Config;
pub use error::{MediaError, MediaResult};
