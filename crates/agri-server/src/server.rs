//! HTTP server for the AgriRent API.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use agri_market::{MarketConfig, Marketplace};
use tokio::net::TcpListener;
use tracing::info;

use crate::config::ServerConfig;
use crate::error::{ApiError, ApiResult};
use crate::routes::create_router;
use crate::state::AppState;

/// AgriRent HTTP server.
///
/// Serves the REST API plus SSE and WebSocket event feeds over one shared
/// marketplace.
#[derive(Debug, Clone)]
pub struct AppServer {
    state: Arc<AppState>,
}

impl AppServer {
    /// Create a server around an opened marketplace.
    #[must_use]
    pub fn new(config: ServerConfig, market: Marketplace) -> Self {
        Self {
            state: Arc::new(AppState::new(config, market)),
        }
    }

    /// Open the marketplace described by `config` and wrap it in a server.
    ///
    /// State is loaded from `config.state_dir` when set, otherwise the
    /// marketplace lives in memory only.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing snapshot cannot be read.
    pub fn open(config: ServerConfig, market_config: MarketConfig) -> ApiResult<Self> {
        let market = match &config.state_dir {
            Some(dir) => Marketplace::open(dir, market_config)?,
            None => {
                info!("no state directory configured, marketplace is in-memory only");
                Marketplace::in_memory(market_config)
            }
        };
        Ok(Self::new(config, market))
    }

    /// Get the shared state.
    #[must_use]
    pub fn state(&self) -> Arc<AppState> {
        self.state.clone()
    }

    /// Start the server with graceful shutdown support.
    ///
    /// The server will shut down when the provided future completes.
    ///
    /// # Errors
    ///
    /// Returns an error if binding to the address fails.
    pub async fn serve_with_shutdown<F>(&self, addr: SocketAddr, shutdown: F) -> ApiResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ApiError::BindFailed(addr, e))?;

        info!(addr = %addr, "AgriRent API listening");

        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| ApiError::Internal(e.to_string()))?;

        info!("AgriRent API shut down");
        Ok(())
    }

    /// Create the router without starting the server.
    pub fn router(&self) -> axum::Router {
        create_router(self.state.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agri_market::{MarketEvent, NewUser, Role};

    fn make_test_server() -> AppServer {
        AppServer::new(
            ServerConfig::default(),
            Marketplace::in_memory(MarketConfig::default()),
        )
    }

    #[tokio::test]
    async fn test_mutations_reach_subscribers() {
        let server = make_test_server();
        let mut rx = server.state().subscribe();

        let user = server
            .state()
            .mutate(|m| {
                m.register_user(NewUser {
                    role: Role::Farmer,
                    full_name: "Wanjiku Kamau".to_string(),
                    phone_number: "+254712000333".to_string(),
                    national_id: None,
                })
            })
            .await
            .unwrap();

        let received = rx.recv().await.unwrap();
        assert_eq!(received, MarketEvent::UserRegistered { user_id: user.id });
        assert_eq!(server.state().ws_connection_count(), 0);
    }

    #[tokio::test]
    async fn test_open_reloads_state_dir() {
        let dir = tempfile::tempdir().unwrap();
        let config = ServerConfig::default().with_state_dir(dir.path());

        let server = AppServer::open(config.clone(), MarketConfig::default()).unwrap();
        server
            .state()
            .mutate(|m| {
                m.register_user(NewUser {
                    role: Role::Operator,
                    full_name: "Otieno Machinery".to_string(),
                    phone_number: "+254722000111".to_string(),
                    national_id: None,
                })
            })
            .await
            .unwrap();

        let reopened = AppServer::open(config, MarketConfig::default()).unwrap();
        let stats = reopened.state().read(Marketplace::stats).await;
        assert_eq!(stats.users, 1);
    }

    #[test]
    fn test_open_rejects_corrupt_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("marketplace.json"), "{not json").unwrap();
        let config = ServerConfig::default().with_state_dir(dir.path());

        let result = AppServer::open(config, MarketConfig::default());
        assert!(matches!(
            result,
            Err(ApiError::Market(agri_market::MarketError::Persistence(_)))
        ));
    }

    #[tokio::test]
    async fn test_serve_with_shutdown() {
        let server = make_test_server();
        let addr = SocketAddr::from(([127, 0, 0, 1], 0));

        let result = server.serve_with_shutdown(addr, async {}).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_bind_failure() {
        let server = make_test_server();
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = taken.local_addr().unwrap();

        let result = server.serve_with_shutdown(addr, async {}).await;
        assert!(matches!(result, Err(ApiError::BindFailed(a, _)) if a == addr));
    }
}
