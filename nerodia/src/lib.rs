//! nerodia library crate.
//!
//! A single status producer is polled on an interval and every detected
//! change is fanned out to the enabled notification consumers. The binary
//! wires this up from a YAML file; the pieces are exposed for embedding and
//! integration testing.

pub mod app;
pub mod config;
pub mod consumer;
pub mod dispatcher;
pub mod error;
pub mod logging;
pub mod modules;
pub mod panic_hook;
pub mod producer;
pub mod registry;

pub use app::App;
pub use error::{Error, Result};
