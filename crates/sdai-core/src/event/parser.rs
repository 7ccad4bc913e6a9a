//! Envelope parser for project event streams.
//!
//! Implements tolerant reader pattern: auxiliary fields kept, unknown kinds
//! reported rather than rejected.

use serde_json::Value;

use super::types::{EventKind, Inbound, ProjectEvent};
use crate::error::{Error, Result};

/// Parse the `data` of one pushed message.
pub fn parse_data(data: &str) -> Result<Inbound> {
    let raw: Value = serde_json::from_str(data)?;
    parse_value(raw)
}

/// Parse a JSON value into an inbound message.
pub fn parse_value(raw: Value) -> Result<Inbound> {
    let Value::Object(mut map) = raw else {
        return Err(Error::EventParse("Envelope is not a JSON object".into()));
    };

    let tag = match map.remove("type") {
        Some(Value::String(tag)) => tag,
        Some(_) => return Err(Error::EventParse("'type' is not a string".into())),
        None => return Err(Error::EventParse("Missing 'type' field".into())),
    };

    let Some(kind) = EventKind::from_tag(&tag) else {
        map.insert("type".into(), Value::String(tag.clone()));
        return Ok(Inbound::Unrecognized {
            tag,
            payload: Value::Object(map),
        });
    };

    let object = map.remove("object").unwrap_or(Value::Null);

    Ok(Inbound::Event(ProjectEvent {
        kind,
        tag,
        object,
        extra: map,
    }))
}
