pub mod calls;
pub mod captions;
pub mod config;
pub mod connection;
pub mod error;
pub mod handlers;
pub mod heartbeat;
pub mod login_guard;
pub mod rate_limit;
pub mod registry;
pub mod router;
pub mod state;
pub mod tls;
pub mod tokens;

pub use config::ServerConfig;
pub use error::ServerError;
pub use state::AppState;
