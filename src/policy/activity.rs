//! The slice of an activity document the policy rules look at.
//!
//! Bodies are arbitrary JSON; only a handful of fields matter. Each field
//! resolves to an explicit default when it is absent or has the wrong JSON
//! type, so the rules never deal with partially typed data.

use serde_json::{Map, Value};

/// Inspected fields of a top-level activity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Activity {
    /// Length of the top-level `cc` array; 0 if absent or not an array.
    pub cc_count: usize,
    /// Top-level `content` when it is a string.
    pub content: Option<String>,
    /// The embedded `object` when it is a JSON object.
    pub object: Option<ActivityObject>,
}

/// Inspected fields of `object`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivityObject {
    /// Entries of `tag` whose `type` is "mention", ignoring case.
    pub mention_count: usize,
    /// `object.content` when it is a string.
    pub content: Option<String>,
}

impl Activity {
    /// Parse a body. `None` unless it is a JSON object.
    pub fn parse(body: &[u8]) -> Option<Self> {
        let map: Map<String, Value> = serde_json::from_slice(body).ok()?;
        Some(Self::from_map(&map))
    }

    pub fn from_map(map: &Map<String, Value>) -> Self {
        Self {
            cc_count: map.get("cc").and_then(Value::as_array).map_or(0, Vec::len),
            content: string_field(map, "content"),
            object: map
                .get("object")
                .and_then(Value::as_object)
                .map(ActivityObject::from_map),
        }
    }

    pub fn mention_count(&self) -> usize {
        self.object.as_ref().map_or(0, |o| o.mention_count)
    }

    /// Top-level `content` if it is a string, otherwise `object.content`.
    pub fn resolved_content(&self) -> Option<&str> {
        self.content
            .as_deref()
            .or_else(|| self.object.as_ref().and_then(|o| o.content.as_deref()))
    }
}

impl ActivityObject {
    pub fn from_map(map: &Map<String, Value>) -> Self {
        let mention_count = map
            .get("tag")
            .and_then(Value::as_array)
            .map_or(0, |tags| tags.iter().filter(|tag| is_mention(tag)).count());

        Self {
            mention_count,
            content: string_field(map, "content"),
        }
    }
}

fn is_mention(tag: &Value) -> bool {
    tag.get("type")
        .and_then(Value::as_str)
        .is_some_and(|kind| kind.eq_ignore_ascii_case("mention"))
}

fn string_field(map: &Map<String, Value>, key: &str) -> Option<String> {
    map.get(key).and_then(Value::as_str).map(str::to_owned)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_objects_do_not_parse() {
        assert_eq!(Activity::parse(b"[1,2,3]"), None);
        assert_eq!(Activity::parse(b"\"text\""), None);
        assert_eq!(Activity::parse(b"{not json"), None);
    }

    #[test]
    fn wrong_types_fall_back_to_defaults() {
        let activity =
            Activity::parse(br#"{"cc": "everyone", "content": 42, "object": "https://x/1"}"#)
                .unwrap();
        assert_eq!(activity, Activity::default());
    }

    #[test]
    fn counts_mentions_case_insensitively() {
        let body = br##"{
            "object": {
                "tag": [
                    {"type": "Mention", "href": "https://a"},
                    {"type": "mention"},
                    {"type": "Hashtag", "name": "#rust"},
                    {"type": 7},
                    "Mention"
                ]
            }
        }"##;
        assert_eq!(Activity::parse(body).unwrap().mention_count(), 2);
    }

    #[test]
    fn content_prefers_top_level_string() {
        let both = Activity::parse(br#"{"content": "top", "object": {"content": "inner"}}"#).unwrap();
        assert_eq!(both.resolved_content(), Some("top"));

        let inner = Activity::parse(br#"{"content": null, "object": {"content": "inner"}}"#).unwrap();
        assert_eq!(inner.resolved_content(), Some("inner"));

        let empty = Activity::parse(br#"{"content": "", "object": {"content": "inner"}}"#).unwrap();
        assert_eq!(empty.resolved_content(), Some(""));
    }
}
