pub mod config;
pub mod domain;
pub mod event_sourcing;
pub mod metrics;
pub mod projection;
pub mod service;
pub mod utils;
