//! Blast Dispatch: rate-limited bulk messaging core.

pub mod api;
pub mod blast;
pub mod channels;
pub mod clock;
pub mod config;
pub mod contacts;
pub mod error;
pub mod members;
