//! `SuperDuperAI` Core Library
//!
//! Shared functionality for the event-stream components:
//! - Push envelope model and parser for project event streams
//! - Incremental Server-Sent Events decoder
//! - Configuration resolution and hierarchy
//! - Common error types

pub mod config;
pub mod error;
pub mod event;
pub mod sse;
pub mod tracing_init;

pub use config::Config;
pub use error::{Error, Result};
pub use event::{EventKind, Inbound, ProjectEvent};
pub use sse::{SseDecoder, SseFrame};
