//! Topic patterns carrying an embedded identifier.
//!
//! SensorThings-style topics name the addressed entity in brackets, e.g.
//! `v1.0/Things(42)/Locations` or `pilot/Datastreams(1001)/Observations`.
//! A [`TopicPattern`] marks the identifier position with `{id}` and extracts
//! it from concrete topics so inbound messages can be routed per entity.

/// A topic template with a single `{id}` placeholder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicPattern {
    prefix: String,
    suffix: String,
}

impl TopicPattern {
    /// Parse a pattern like `v1.0/Things({id})/Locations`.
    ///
    /// Returns `None` when the `{id}` placeholder is missing.
    pub fn new(pattern: impl AsRef<str>) -> Option<Self> {
        let pattern = pattern.as_ref();
        let (prefix, suffix) = pattern.split_once("{id}")?;
        Some(Self {
            prefix: prefix.to_string(),
            suffix: suffix.to_string(),
        })
    }

    /// Whether a concrete topic matches this pattern.
    pub fn matches(&self, topic: &str) -> bool {
        self.extract(topic).is_some()
    }

    /// Extract the identifier from a matching topic.
    pub fn extract<'t>(&self, topic: &'t str) -> Option<&'t str> {
        let rest = topic.strip_prefix(self.prefix.as_str())?;
        let id = rest.strip_suffix(self.suffix.as_str())?;
        if id.is_empty() || id.contains('/') {
            return None;
        }
        Some(id)
    }

    /// Render the concrete topic for an identifier.
    pub fn topic_for(&self, id: impl std::fmt::Display) -> String {
        format!("{}{}{}", self.prefix, id, self.suffix)
    }
}
