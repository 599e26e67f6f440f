pub mod adapter;
pub mod backoff;
pub mod controller;
pub mod engine;
pub mod http;
pub mod mpv;
pub mod notify;
pub mod preferences;
pub mod quality;
pub mod rotator;
pub mod status;
pub mod timers;

#[cfg(test)]
mod testing;

pub use controller::{ControllerEvent, ControllerHandle, ControllerOptions, StreamController};
