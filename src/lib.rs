// =============================================================================
// Lint Configuration
// =============================================================================

#![deny(unsafe_code)]
#![deny(unused_must_use)]
#![warn(clippy::all)]
#![warn(rust_2018_idioms)]
#![allow(clippy::module_name_repetitions)] // e.g., bans::BanStore is clearer
#![allow(clippy::missing_errors_doc)] // Error returns self-documenting via type

//! wafden - multi-tenant control plane for a WAF data plane.
//!
//! This crate exposes a REST API for managing WAF configuration: IP bans,
//! sites, per-tenant settings, and security-event observability. The WAF
//! enforcement engine itself runs elsewhere and reads from this control
//! plane; nothing here inspects traffic.
//!
//! Two stores back the API:
//!
//! - SQLite ([`db::Db`]) is the source of truth for all tenant data.
//! - A redb-backed set cache ([`bans::SetCache`]) holds a denormalized
//!   per-tenant set of banned addresses for the hot-path membership check.
//!   It is best-effort only: every cache failure degrades to the
//!   authoritative SQLite path.
//!
//! The consistency protocol between the two lives in
//! [`bans::BanCoordinator`].

pub mod bans;
pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod http;
pub mod logging;
pub mod metrics;
pub mod module;
pub mod settings;
pub mod sites;
pub mod tenant;

pub use error::{Error, Result};
