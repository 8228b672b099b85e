//! Workspace façade crate.
//!
//! Host applications depend on `embedded-auth-workspace` and get the session
//! core, the runtime helpers and the bridge contracts from a single crate. The
//! `desktop-shims` feature (default) also re-exports the desktop bridge
//! adapters so a desktop host can bootstrap without writing its own bridges.

pub use bridge_traits as bridge;
pub use core_auth as auth;
pub use core_runtime as runtime;

#[cfg(feature = "desktop-shims")]
pub use bridge_desktop as desktop;
