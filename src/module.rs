//! Pluggable API modules.
//!
//! Each feature area (bans, sites, settings, security events) is a module
//! contributing a router. Modules declare their mount point with an
//! explicit tag rather than being dispatched on by name, and the registry
//! is assembled once at startup and never mutated afterwards. Dependencies
//! (database, cache) reach handlers through `AppState` constructor
//! injection; there is no ambient global state.

use crate::http::AppState;
use axum::Router;

/// Where a module's routes are mounted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountPoint {
    /// Mounted at the root, no authentication.
    Public,
    /// Mounted under `/api/v2`, behind the tenant auth middleware.
    Protected,
}

/// A self-contained API feature area.
pub trait Module: Send + Sync {
    /// Unique module identifier, used in the `/api/info` listing.
    fn name(&self) -> &'static str;

    /// Semantic version of the module.
    fn version(&self) -> &'static str;

    /// Mount point for the module's routes.
    fn mount_point(&self) -> MountPoint {
        MountPoint::Protected
    }

    /// The module's routes. Called once during router assembly.
    fn router(&self) -> Router<AppState>;
}

/// The full, ordered module list. This is the single place a module is
/// registered.
pub fn registry() -> Vec<Box<dyn Module>> {
    vec![
        Box::new(crate::bans::BansModule),
        Box::new(crate::sites::SitesModule),
        Box::new(crate::settings::SettingsModule),
        Box::new(crate::events::EventsModule),
    ]
}
