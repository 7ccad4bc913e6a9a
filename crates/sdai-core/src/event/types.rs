//! Message types for the project event protocol.

use std::fmt;

use serde_json::{Map, Value};

/// Discriminant of a push envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    /// Generic data update (generated images, videos, audio).
    Data,
    /// Generation task status change.
    Task,
    /// File record created or updated.
    File,
    /// Scene of a project changed.
    Scene,
    /// Project entity (character, location, ...) changed.
    Entity,
    /// Render progress tick.
    RenderProgress,
    /// Final render output.
    RenderResult,
}

impl EventKind {
    /// Every kind, in declaration order.
    pub const ALL: [Self; 7] = [
        Self::Data,
        Self::Task,
        Self::File,
        Self::Scene,
        Self::Entity,
        Self::RenderProgress,
        Self::RenderResult,
    ];

    /// Canonical wire tag.
    pub const fn as_tag(self) -> &'static str {
        match self {
            Self::Data => "data",
            Self::Task => "task",
            Self::File => "file",
            Self::Scene => "scene",
            Self::Entity => "entity",
            Self::RenderProgress => "render_progress",
            Self::RenderResult => "render_result",
        }
    }

    /// Match a wire tag. Case-insensitive, `-` accepted for `_`.
    pub fn from_tag(tag: &str) -> Option<Self> {
        let normalized = tag.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_tag() == normalized)
    }

    /// Bit index used by interest sets.
    pub const fn bit(self) -> u8 {
        match self {
            Self::Data => 0,
            Self::Task => 1,
            Self::File => 2,
            Self::Scene => 3,
            Self::Entity => 4,
            Self::RenderProgress => 5,
            Self::RenderResult => 6,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_tag())
    }
}

impl std::str::FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_tag(s).ok_or_else(|| format!("unknown event kind: {s}"))
    }
}

/// A recognised push envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectEvent {
    pub kind: EventKind,
    /// The `type` tag exactly as received.
    pub tag: String,
    /// The `object` payload; `Null` when absent.
    pub object: Value,
    /// Every other top-level field of the envelope.
    pub extra: Map<String, Value>,
}

impl ProjectEvent {
    /// Build an event with the canonical tag and no auxiliary fields.
    pub fn new(kind: EventKind, object: Value) -> Self {
        Self {
            kind,
            tag: kind.as_tag().to_string(),
            object,
            extra: Map::new(),
        }
    }

    /// Identifier of the entity the payload describes (`object.id`).
    pub fn object_id(&self) -> Option<&str> {
        self.object.get("id").and_then(Value::as_str)
    }

    /// Payload sub-type (`object.type`, e.g. `"image"`).
    pub fn object_type(&self) -> Option<&str> {
        self.object.get("type").and_then(Value::as_str)
    }

    /// Re-encode the envelope in its wire shape.
    pub fn to_value(&self) -> Value {
        let mut map = self.extra.clone();
        map.insert("type".into(), Value::String(self.tag.clone()));
        map.insert("object".into(), self.object.clone());
        Value::Object(map)
    }
}

/// Result of interpreting one pushed message.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Event(ProjectEvent),
    Unrecognized { tag: String, payload: Value },
}
