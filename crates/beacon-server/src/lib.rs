//! # beacon-server
//!
//! HTTP and WebSocket surface of the Beacon presence server.
//!
//! - `GET /ws?userId=...` - live connection: roster updates and message pushes
//! - `GET /api/presence` - current roster
//! - `GET /api/presence/:user_id` - whether one user is online
//! - `POST /api/messages/:recipient` - live push requested by the messaging service
//! - `GET /health` - liveness

pub mod api;
pub mod config;
pub mod handlers;
pub mod metrics;

pub use config::Config;
pub use handlers::{app, run_server, serve, AppState};
