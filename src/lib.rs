//! castforge - self-hosted live broadcast server
//!
//! This library crate exposes the broadcast core for integration testing.

pub mod config;
pub mod gate;
pub mod ingest;
pub mod runtime;
pub mod segments;
pub mod server;
pub mod state;
pub mod storage;
pub mod transcoder;
pub mod viewers;
