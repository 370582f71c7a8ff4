pub mod detector;
pub mod discovery;
pub mod mover;
pub mod service;

pub use service::{CycleResult, SpaceEngine, SyncMode};
