pub mod admin_api;
pub mod health_checker;
pub mod http_client;
pub mod proxy;

/// Re-export commonly used types from adapters
pub use admin_api::admin_router;
pub use health_checker::HealthChecker;
pub use http_client::HttpClientAdapter;
pub use proxy::{ProxyState, proxy_handler};
