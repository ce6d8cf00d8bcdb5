//! Queue message carrying one job to a worker.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Tags of a job, flattened from the message's list of single-entry maps.
pub type Tags = BTreeMap<String, Value>;

/// `{id, name, tags: [{k: v}, ...], data}` as delivered by the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobMessage {
    pub id: String,

    /// Job type name, resolved against the registry.
    pub name: String,

    #[serde(default)]
    pub tags: Vec<Map<String, Value>>,

    /// Inline data used when the control plane has none recorded.
    #[serde(default)]
    pub data: Value,
}

impl JobMessage {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            tags: Vec::new(),
            data: Value::Null,
        }
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let mut entry = Map::new();
        entry.insert(key.into(), value.into());
        self.tags.push(entry);
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    /// Merge the tag list into one map; later entries win.
    pub fn tag_map(&self) -> Tags {
        self.tags
            .iter()
            .flat_map(|entry| entry.iter())
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_wire_message() {
        let msg: JobMessage = serde_json::from_value(json!({
            "id": "job-1",
            "name": "Sample",
            "tags": [{"tenant": "acme"}, {"priority": 3}],
            "data": {"input": "x"}
        }))
        .unwrap();

        assert_eq!(msg.id, "job-1");
        let tags = msg.tag_map();
        assert_eq!(tags.get("tenant"), Some(&json!("acme")));
        assert_eq!(tags.get("priority"), Some(&json!(3)));
    }

    #[test]
    fn tags_and_data_are_optional() {
        let msg: JobMessage =
            serde_json::from_value(json!({"id": "job-1", "name": "Sample"})).unwrap();
        assert!(msg.tag_map().is_empty());
        assert_eq!(msg.data, Value::Null);
    }

    #[test]
    fn later_tags_override_earlier_ones() {
        let msg = JobMessage::new("job-1", "Sample")
            .with_tag("env", "staging")
            .with_tag("env", "prod");
        assert_eq!(msg.tag_map().get("env"), Some(&json!("prod")));
    }
}
