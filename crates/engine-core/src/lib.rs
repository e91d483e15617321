pub mod connectors;
pub mod error;
pub mod filter;
pub mod metrics;
pub mod observer;
pub mod retry;
pub mod staging;
pub mod state;
