//! Proximity search over the catalog.

use agri_proto::{Amount, CategoryId, DateRange, EquipmentId, GeoPoint, UserId};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::booking::BookingLedger;
use crate::catalog::Catalog;
use crate::config::MarketConfig;
use crate::error::{MarketError, MarketResult};
use crate::users::UserDirectory;

/// A discovery query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchQuery {
    /// Farm position.
    pub location: GeoPoint,
    /// Search radius around the farm.
    pub radius_km: f64,
    /// Days the farmer needs the equipment.
    #[serde(default)]
    pub window: Option<DateRange>,
    /// Only this category.
    #[serde(default)]
    pub category: Option<CategoryId>,
    /// Only units at or below this daily rate.
    #[serde(default)]
    pub max_daily_rate: Option<Amount>,
    /// Only units currently in this county.
    #[serde(default)]
    pub county: Option<String>,
    /// Only inspected listings.
    #[serde(default)]
    pub verified_only: bool,
    /// Result cap; the configured default when absent.
    #[serde(default)]
    pub limit: Option<usize>,
}

impl SearchQuery {
    /// A query with no filters beyond position and radius.
    #[must_use]
    pub const fn near(location: GeoPoint, radius_km: f64) -> Self {
        Self {
            location,
            radius_km,
            window: None,
            category: None,
            max_daily_rate: None,
            county: None,
            verified_only: false,
            limit: None,
        }
    }
}

/// One discovery result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    /// Listing.
    pub equipment_id: EquipmentId,
    /// Owning operator.
    pub owner: UserId,
    /// Display name.
    pub name: String,
    /// Category.
    pub category: CategoryId,
    /// Price per day.
    pub daily_rate: Amount,
    /// Great-circle distance from the farm.
    pub distance_km: f64,
    /// Current county.
    pub county: String,
    /// Whether staff inspected the listing.
    pub verified: bool,
}

/// Runs a discovery query.
///
/// Results are ordered by distance, then daily rate, then ID.
pub fn search(
    catalog: &Catalog,
    bookings: &BookingLedger,
    users: &UserDirectory,
    config: &MarketConfig,
    query: &SearchQuery,
) -> MarketResult<Vec<SearchHit>> {
    query.location.validate()?;
    if !query.radius_km.is_finite()
        || query.radius_km <= 0.0
        || query.radius_km > config.max_search_radius_km
    {
        return Err(MarketError::Validation(format!(
            "radius must be in (0, {}] km",
            config.max_search_radius_km
        )));
    }
    if let Some(window) = &query.window {
        window.validate()?;
    }
    let limit = query
        .limit
        .unwrap_or(config.default_search_limit)
        .min(config.max_search_limit);

    let mut hits: Vec<SearchHit> = catalog
        .iter()
        .filter(|e| e.is_discoverable())
        .filter(|e| query.category.is_none_or(|c| e.category == c))
        .filter(|e| query.max_daily_rate.is_none_or(|max| e.daily_rate <= max))
        .filter(|e| {
            query
                .county
                .as_deref()
                .is_none_or(|c| e.county.eq_ignore_ascii_case(c))
        })
        .filter(|e| !query.verified_only || e.verified)
        .filter(|e| users.operator_available(e.owner))
        .filter_map(|e| {
            let distance_km = e.location.as_ref()?.distance_km(&query.location);
            let service_radius = f64::from(users.service_radius_km(e.owner));
            (distance_km <= query.radius_km && distance_km <= service_radius)
                .then_some((e, distance_km))
        })
        .filter(|(e, _)| {
            query.window.as_ref().is_none_or(|window| {
                e.blackout_conflict(window).is_none()
                    && bookings.conflicting_active(e.id, window, None).is_none()
            })
        })
        .map(|(e, distance_km)| SearchHit {
            equipment_id: e.id,
            owner: e.owner,
            name: e.name.clone(),
            category: e.category,
            daily_rate: e.daily_rate,
            distance_km,
            county: e.county.clone(),
            verified: e.verified,
        })
        .collect();

    hits.sort_by(|a, b| {
        a.distance_km
            .total_cmp(&b.distance_km)
            .then(a.daily_rate.cmp(&b.daily_rate))
            .then(a.equipment_id.cmp(&b.equipment_id))
    });
    hits.truncate(limit);

    debug!(
        lat = query.location.lat,
        lon = query.location.lon,
        radius_km = query.radius_km,
        hits = hits.len(),
        "discovery search"
    );
    Ok(hits)
}
