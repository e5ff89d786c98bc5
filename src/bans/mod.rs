//! IP ban management.
//!
//! The one subsystem here with a real consistency contract: the relational
//! store is the source of truth, and a per-tenant set cache mirrors the
//! currently banned addresses for the hot-path membership check. The
//! [`BanCoordinator`] enforces the contract between the two; see its module
//! docs for the protocol details.

pub mod cache;
pub mod coordinator;
pub mod handlers;
pub mod store;

pub use cache::{BanCache, SetCache};
pub use coordinator::{BanCoordinator, BulkOutcome};
pub use store::{BanStats, BanStore, NewBan};

use crate::error::{Error, Result};
use crate::module::{Module, MountPoint};
use crate::tenant::TenantId;
use chrono::{DateTime, Utc};
use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use uuid::Uuid;

/// Provenance of a ban.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    /// Created by an operator through the API.
    #[default]
    Manual,
    /// Created by a bulk-ban batch.
    Bulk,
    /// Created by the automated scanner-block action.
    Scanner,
}

impl Source {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Bulk => "bulk",
            Self::Scanner => "scanner",
        }
    }

    /// Parses the database representation. Unknown tags collapse to
    /// `Scanner` so rows written by newer automated detectors still load.
    pub fn from_db(s: &str) -> Self {
        match s {
            "manual" => Self::Manual,
            "bulk" => Self::Bulk,
            _ => Self::Scanner,
        }
    }
}

/// A banned IP address or CIDR block.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BannedEntry {
    pub id: Uuid,
    pub tenant_id: TenantId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub site_id: Option<Uuid>,
    pub ip_address: String,
    pub reason: String,
    pub source: Source,
    /// Absent means permanent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl BannedEntry {
    /// An entry is active iff it has no expiry or the expiry is in the
    /// future. Expiration is query-time; rows are never swept here.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

/// Validates that `address` is an IPv4/IPv6 literal or CIDR block.
///
/// Runs before any I/O; an invalid address never reaches the store.
pub fn validate_address(address: &str) -> Result<()> {
    if address.parse::<IpAddr>().is_ok() || address.parse::<IpNet>().is_ok() {
        Ok(())
    } else {
        Err(Error::InvalidAddress(address.to_string()))
    }
}

/// The bans module, mounted under the protected API.
pub struct BansModule;

impl Module for BansModule {
    fn name(&self) -> &'static str {
        "bans"
    }

    fn version(&self) -> &'static str {
        "2.0.0"
    }

    fn mount_point(&self) -> MountPoint {
        MountPoint::Protected
    }

    fn router(&self) -> axum::Router<crate::http::AppState> {
        handlers::router()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn validates_ipv4_ipv6_and_cidr() {
        validate_address("10.0.0.1").unwrap();
        validate_address("2001:db8::1").unwrap();
        validate_address("10.0.0.0/24").unwrap();
        validate_address("2001:db8::/32").unwrap();
    }

    #[test]
    fn rejects_garbage_addresses() {
        for bad in ["", "not-an-ip", "10.0.0.256", "10.0.0.0/33", "example.com"] {
            assert!(
                matches!(validate_address(bad), Err(Error::InvalidAddress(_))),
                "expected rejection for {bad:?}"
            );
        }
    }

    #[test]
    fn activeness_is_query_time() {
        let now = Utc::now();
        let mut entry = BannedEntry {
            id: Uuid::new_v4(),
            tenant_id: TenantId::new(),
            site_id: None,
            ip_address: "10.0.0.1".to_string(),
            reason: String::new(),
            source: Source::Manual,
            expires_at: None,
            created_at: now,
        };
        assert!(entry.is_active(now), "permanent bans are always active");

        entry.expires_at = Some(now + Duration::minutes(5));
        assert!(entry.is_active(now));

        entry.expires_at = Some(now - Duration::minutes(5));
        assert!(!entry.is_active(now));
    }

    #[test]
    fn source_round_trips_and_tolerates_unknown_tags() {
        assert_eq!(Source::from_db("manual"), Source::Manual);
        assert_eq!(Source::from_db("bulk"), Source::Bulk);
        assert_eq!(Source::from_db("scanner"), Source::Scanner);
        assert_eq!(Source::from_db("bot-detector"), Source::Scanner);
    }
}
