pub mod admin;
pub mod backend;
pub mod chunker;
pub mod config;
pub mod error;
pub mod metrics;
pub mod relay;
pub mod runtime;
pub mod transport;
pub mod worker;
