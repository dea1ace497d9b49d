//! Threemx - a streaming engine for 3MX/3MXB photogrammetry tilesets

pub mod core;
pub mod math;
pub mod format;
pub mod fetch;
pub mod tasks;
pub mod streaming;
