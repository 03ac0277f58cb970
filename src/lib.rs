//! dectalk-rs library crate
//!
//! Adapts the DECtalk / FonixTalk speech engine's callback-driven C API
//! into blocking request/response calls, a phoneme event stream and
//! streaming PCM capture. The `dectalk` binary is in main.rs.

#[macro_use]
extern crate log;

pub mod capture;
pub mod config;
pub mod constants;
pub mod engine;
pub mod error;
pub mod event;
pub mod native;
pub mod phoneme;
pub mod router;
pub mod voice;
pub mod wav;

pub use engine::{Capture, Engine, EngineState, Lifecycle};
pub use error::{CaptureError, Result, TtsError};

#[cfg(test)]
mod engine_tests;
#[cfg(test)]
mod test_support;
