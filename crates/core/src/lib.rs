pub mod channel;
pub mod config;
pub mod context;
pub mod cost;
pub mod dialect;
pub mod error;
pub mod glob;
pub mod sanitize;
pub mod trace;
pub mod usage;
