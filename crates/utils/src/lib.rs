pub mod auth;
pub mod jwt;
pub mod logging;
pub mod progress;
pub mod response;
