//! patchmesh core - graph mirror, mixer and monitor nodes for a JACK server

pub mod audio;
pub mod config;
pub mod control;
pub mod engine;
pub mod event;
pub mod graph;
pub mod session;
#[cfg(target_os = "linux")]
pub mod shm;
pub mod types;

pub use types::*;
