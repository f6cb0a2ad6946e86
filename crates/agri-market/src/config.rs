//! Marketplace policy configuration.

use agri_proto::BasisPoints;

/// Default platform fee: 10%.
pub const DEFAULT_PLATFORM_FEE_BPS: u32 = 1_000;

/// Default booking deposit: 30% of the total.
pub const DEFAULT_DEPOSIT_BPS: u32 = 3_000;

/// Default upper bound on a discovery radius.
pub const DEFAULT_MAX_SEARCH_RADIUS_KM: f64 = 500.0;

/// Service radius assumed for operators without a profile.
pub const DEFAULT_SERVICE_RADIUS_KM: u32 = 50;

/// Policy knobs for the marketplace.
#[derive(Debug, Clone)]
pub struct MarketConfig {
    /// Platform's cut of each completed booking.
    pub platform_fee: BasisPoints,
    /// Share of the total collected as a deposit on confirmation.
    pub deposit: BasisPoints,
    /// Largest radius a discovery query may request.
    pub max_search_radius_km: f64,
    /// Result count when a query gives no limit.
    pub default_search_limit: usize,
    /// Hard cap on results per query.
    pub max_search_limit: usize,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            platform_fee: BasisPoints::saturating(DEFAULT_PLATFORM_FEE_BPS),
            deposit: BasisPoints::saturating(DEFAULT_DEPOSIT_BPS),
            max_search_radius_km: DEFAULT_MAX_SEARCH_RADIUS_KM,
            default_search_limit: 20,
            max_search_limit: 100,
        }
    }
}

impl MarketConfig {
    /// Set the platform fee.
    #[must_use]
    pub const fn with_platform_fee(mut self, fee: BasisPoints) -> Self {
        self.platform_fee = fee;
        self
    }

    /// Set the deposit share.
    #[must_use]
    pub const fn with_deposit(mut self, deposit: BasisPoints) -> Self {
        self.deposit = deposit;
        self
    }

    /// Set the maximum search radius.
    #[must_use]
    pub const fn with_max_search_radius_km(mut self, km: f64) -> Self {
        self.max_search_radius_km = km;
        self
    }

    /// Set the default and maximum result counts.
    #[must_use]
    pub const fn with_search_limits(mut self, default_limit: usize, max_limit: usize) -> Self {
        self.default_search_limit = default_limit;
        self.max_search_limit = max_limit;
        self
    }
}
