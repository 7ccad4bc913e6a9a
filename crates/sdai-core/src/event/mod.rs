//! Push envelope model for project event streams.
//!
//! The backend pushes `{ "type": <kind>, "object": <payload>, ... }`
//! envelopes. This module parses them into a closed set of kinds,
//! implementing a tolerant reader: unknown fields are kept verbatim,
//! unknown kinds are surfaced as [`Inbound::Unrecognized`].

mod parser;
mod types;

pub use parser::{parse_data, parse_value};
pub use types::*;
