//! # Core Runtime Module
//!
//! Provides foundational runtime infrastructure for the embedded auth core:
//! - Logging and tracing infrastructure
//! - Configuration management
//! - Event bus system
//!
//! ## Overview
//!
//! This crate contains the runtime utilities that `core-auth` depends on. It
//! establishes the logging conventions, the configuration surface hosts fill
//! in, and the broadcast channel used for the auth audit stream.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use config::{AuthConfig, AuthConfigBuilder, EndpointPaths, RegionConfig};
pub use error::{Error, Result};
pub use events::{AuthEvent, CoreEvent, EventBus, LoginEvent};
