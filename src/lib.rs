//! Tracks how long documents stay open and how much of that time is spent actively working on
//! them. Time is folded into durable per-document totals at save checkpoints, together with a
//! bounded history of those checkpoints.
//!

pub mod cli;
pub mod fs;
pub mod host_api;
pub mod tracker;
pub mod utils;
