//! Command-line argument parsing with clap.

use std::net::SocketAddr;
use std::path::PathBuf;

use agri_market::config::{
    DEFAULT_DEPOSIT_BPS, DEFAULT_MAX_SEARCH_RADIUS_KM, DEFAULT_PLATFORM_FEE_BPS,
};
use agri_market::MarketConfig;
use agri_proto::BasisPoints;
use clap::Parser;

use crate::config::{ServerConfig, DEFAULT_EVENT_BUFFER};
use crate::error::{ApiError, ApiResult};

/// AgriRent marketplace API server.
#[derive(Parser, Debug, Clone)]
#[command(name = "agrirent-server")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Address to listen on.
    #[arg(short, long, env = "AGRIRENT_BIND", default_value = "0.0.0.0:8080")]
    pub bind: SocketAddr,

    /// Directory for the marketplace snapshot. State is kept in memory only
    /// when unset.
    #[arg(short, long, env = "AGRIRENT_STATE_DIR")]
    pub state_dir: Option<PathBuf>,

    /// Platform fee in basis points.
    #[arg(long, env = "AGRIRENT_PLATFORM_FEE_BPS", default_value_t = DEFAULT_PLATFORM_FEE_BPS)]
    pub platform_fee_bps: u32,

    /// Booking deposit in basis points of the total.
    #[arg(long, env = "AGRIRENT_DEPOSIT_BPS", default_value_t = DEFAULT_DEPOSIT_BPS)]
    pub deposit_bps: u32,

    /// Allowed CORS origins, comma separated. All origins when empty.
    #[arg(long, env = "AGRIRENT_CORS_ORIGINS", value_delimiter = ',')]
    pub cors_origins: Vec<String>,

    /// Largest radius a search may request, in kilometres.
    #[arg(long, env = "AGRIRENT_MAX_SEARCH_RADIUS_KM", default_value_t = DEFAULT_MAX_SEARCH_RADIUS_KM)]
    pub max_search_radius_km: f64,

    /// Capacity of the live event channel.
    #[arg(long, env = "AGRIRENT_EVENT_BUFFER", default_value_t = DEFAULT_EVENT_BUFFER)]
    pub event_buffer: usize,

    /// Emit logs as JSON lines.
    #[arg(long, env = "AGRIRENT_JSON_LOGS")]
    pub json_logs: bool,
}

impl Cli {
    /// Marketplace policy from the flags.
    ///
    /// # Errors
    ///
    /// Returns an error if a rate exceeds 10 000 bps or the radius is not
    /// positive.
    pub fn market_config(&self) -> ApiResult<MarketConfig> {
        if !self.max_search_radius_km.is_finite() || self.max_search_radius_km <= 0.0 {
            return Err(ApiError::InvalidRequest(format!(
                "max search radius must be positive, got {}",
                self.max_search_radius_km
            )));
        }
        Ok(MarketConfig::default()
            .with_platform_fee(BasisPoints::new(self.platform_fee_bps)?)
            .with_deposit(BasisPoints::new(self.deposit_bps)?)
            .with_max_search_radius_km(self.max_search_radius_km))
    }

    /// Server settings from the flags.
    #[must_use]
    pub fn server_config(&self) -> ServerConfig {
        let mut config = ServerConfig::new(self.bind).with_event_buffer(self.event_buffer);
        for origin in self.cors_origins.iter().filter(|o| !o.trim().is_empty()) {
            config = config.with_cors_origin(origin.trim());
        }
        if let Some(dir) = &self.state_dir {
            config = config.with_state_dir(dir.clone());
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_defaults() {
        let cli = Cli::parse_from(["agrirent-server"]);

        assert_eq!(cli.bind.port(), 8080);
        assert!(cli.state_dir.is_none());
        assert!(!cli.json_logs);

        let market = cli.market_config().unwrap();
        assert_eq!(market.platform_fee.get(), 1_000);
        assert_eq!(market.deposit.get(), 3_000);

        let server = cli.server_config();
        assert!(server.cors_origins.is_empty());
        assert_eq!(server.event_buffer, 1024);
    }

    #[test]
    fn test_all_flags() {
        let cli = Cli::parse_from([
            "agrirent-server",
            "--bind",
            "127.0.0.1:9000",
            "--state-dir",
            "/tmp/agrirent",
            "--platform-fee-bps",
            "750",
            "--deposit-bps",
            "5000",
            "--cors-origins",
            "http://localhost:3000,https://agrirent.example.com",
            "--max-search-radius-km",
            "120",
            "--json-logs",
        ]);

        assert!(cli.json_logs);
        let market = cli.market_config().unwrap();
        assert_eq!(market.platform_fee.get(), 750);
        assert_eq!(market.deposit.get(), 5_000);
        assert!((market.max_search_radius_km - 120.0).abs() < f64::EPSILON);

        let server = cli.server_config();
        assert_eq!(server.bind_addr.port(), 9000);
        assert_eq!(server.cors_origins.len(), 2);
        assert_eq!(server.state_dir, Some(PathBuf::from("/tmp/agrirent")));
    }

    #[test]
    fn test_fee_over_full_rate_rejected() {
        let cli = Cli::parse_from(["agrirent-server", "--platform-fee-bps", "10001"]);
        assert!(matches!(
            cli.market_config(),
            Err(ApiError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_negative_radius_rejected() {
        let cli = Cli::parse_from(["agrirent-server", "--max-search-radius-km=-5"]);
        assert!(cli.market_config().is_err());
    }
}
