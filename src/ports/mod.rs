//! Port traits at the I/O seams.

pub mod bar_port;
pub mod config_port;
pub mod progress_port;
pub mod result_port;
pub mod split_port;
