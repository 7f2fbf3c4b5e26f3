pub mod api;
pub mod channel;
pub mod controller;
pub mod session;
