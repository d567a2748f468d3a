pub mod config;
pub mod job;
pub mod platform;
pub mod protocol;
