pub mod auth;
pub mod catalog_sync;
pub mod config;
pub mod erp;
pub mod exchange_rate;
pub mod progress;
