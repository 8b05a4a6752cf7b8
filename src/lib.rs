//! chiplink: a WebSocket bridge to the Matter `chip-tool` CLI.

pub mod api;
pub mod config;
pub mod dispatch;
pub mod parser;
pub mod protocol;
pub mod session;
pub mod tool;
