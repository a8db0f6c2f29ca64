pub mod analyzer;
pub mod error;
pub mod events;
pub mod pool;
pub mod server;
pub mod service;
pub mod stats;
pub mod strategy;

pub use error::{BalancerError, BalancerResult};
pub use service::BalancerService;
pub use strategy::Algorithm;
