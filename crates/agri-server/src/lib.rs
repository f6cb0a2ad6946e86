//! # agri-server
//!
//! HTTP API for the AgriRent equipment rental marketplace, built on axum.
//!
//! One [`agri_market::Marketplace`] sits behind a single lock in
//! [`AppState`]; every request runs under that lock, so overlap checks and
//! the writes that follow them are serializable. Marketplace events fan out
//! to SSE and WebSocket subscribers through a broadcast channel.
//!
//! ## Example
//!
//! ```rust,no_run
//! use agri_market::MarketConfig;
//! use agri_server::{AppServer, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = ServerConfig::default().with_state_dir("/var/lib/agrirent");
//!     let server = AppServer::open(config, MarketConfig::default()).unwrap();
//!     let addr = "0.0.0.0:8080".parse().unwrap();
//!     server
//!         .serve_with_shutdown(addr, async {
//!             let _ = tokio::signal::ctrl_c().await;
//!         })
//!         .await
//!         .unwrap();
//! }
//! ```
//!
//! ## API Endpoints
//!
//! | Endpoint | Method | Description |
//! |----------|--------|-------------|
//! | `/api/health` | GET | Liveness, uptime and record counts |
//! | `/api/users` | POST | Register a farmer, operator or admin |
//! | `/api/users/{id}` | GET | User with profiles |
//! | `/api/users/{id}/farmer-profile` | PUT | Set farm details |
//! | `/api/users/{id}/operator-profile` | PUT | Set operator details |
//! | `/api/users/{id}/service-areas` | POST | Add a served county |
//! | `/api/users/{id}/verify` | POST | Mark national ID checked (admin) |
//! | `/api/users/{id}/reviews` | GET | Reviews received |
//! | `/api/users/{id}/notifications` | GET | Notifications (`?unread_only=true`) |
//! | `/api/users/{id}/bookings` | GET | Bookings as farmer or operator (`?status=`) |
//! | `/api/users/{id}/payouts` | GET | Payouts owed to an operator |
//! | `/api/users/{id}/tickets` | GET | Support tickets a user raised |
//! | `/api/notifications/{id}/read` | POST | Mark a notification read |
//! | `/api/categories` | GET/POST | List or add categories |
//! | `/api/categories/{id}` | GET | Get a category |
//! | `/api/equipment` | GET/POST | List or create listings |
//! | `/api/equipment/{id}` | GET/PATCH/DELETE | Get, update or soft-delete |
//! | `/api/equipment/{id}/status` | PUT | Set listing status |
//! | `/api/equipment/{id}/verify` | POST | Mark inspected (admin) |
//! | `/api/equipment/{id}/blackouts` | POST/DELETE | Edit the calendar |
//! | `/api/equipment/{id}/maintenance` | POST | Record a service |
//! | `/api/search` | GET | Proximity discovery |
//! | `/api/quotes` | POST | Price a rental |
//! | `/api/bookings` | POST | Request a booking |
//! | `/api/bookings/{id}` | GET | Get a booking |
//! | `/api/bookings/{id}/{confirm,start,complete,cancel,dispute,resolve}` | POST | Lifecycle |
//! | `/api/bookings/{id}/payments` | GET/POST | List or initiate payments |
//! | `/api/bookings/{id}/refund` | POST | Retry a failed refund (admin) |
//! | `/api/bookings/{id}/reviews` | GET/POST | List or submit reviews |
//! | `/api/payments/callback` | POST | Payment gateway webhook |
//! | `/api/payouts/{id}` | GET | Get a payout |
//! | `/api/payouts/{id}/{release,paid,failed}` | POST | Payout lifecycle (admin) |
//! | `/api/tickets` | GET/POST | Staff queue (`?actor_id=&status=`) or raise a ticket |
//! | `/api/tickets/{id}` | GET | Get a ticket |
//! | `/api/tickets/{id}/{assign,status}` | POST | Work a ticket |
//! | `/api/events` | GET | Server-Sent Events stream |
//! | `/api/ws` | GET | WebSocket event stream |

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cli;
pub mod config;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod server;
pub mod state;
pub mod types;
pub mod websocket;

pub use cli::Cli;
pub use config::ServerConfig;
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use server::AppServer;
pub use state::AppState;
