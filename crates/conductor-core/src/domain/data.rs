//! Shared, write-once output store threaded through the tasks of one job.

use std::collections::BTreeMap;

use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use super::errors::TaskError;

/// Outputs of a job keyed by name, plus which action produced each key.
///
/// A key may be written exactly once for the lifetime of the store. Writes are
/// attributed to the current owner, which the job instance keeps in sync with
/// its current action.
#[derive(Debug, Clone, Default)]
pub struct JobDataStore {
    outputs: Map<String, Value>,
    owners: BTreeMap<String, Vec<String>>,
    owner: Option<String>,
}

/// Wire shape `{outputs, owners}`.
#[derive(Deserialize)]
struct StoreRepr {
    #[serde(default)]
    outputs: Map<String, Value>,
    #[serde(default)]
    owners: BTreeMap<String, Vec<String>>,
}

impl JobDataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a store from a queue message or the control plane.
    ///
    /// An object holding only `outputs` (a map) and optionally `owners` is
    /// decoded as-is. Any other object becomes plain outputs with no recorded
    /// owner; non-objects yield an empty store.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(map) if is_wire_shape(&map) => {
                match serde_json::from_value::<StoreRepr>(Value::Object(map.clone())) {
                    Ok(repr) => Self::from_repr(repr),
                    Err(_) => Self::plain(map),
                }
            }
            Value::Object(map) => Self::plain(map),
            _ => Self::default(),
        }
    }

    fn plain(outputs: Map<String, Value>) -> Self {
        Self {
            outputs,
            ..Self::default()
        }
    }

    fn from_repr(repr: StoreRepr) -> Self {
        Self {
            outputs: repr.outputs,
            owners: repr.owners,
            owner: None,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.outputs.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Result<(), TaskError> {
        let key = key.into();
        if self.outputs.contains_key(&key) {
            return Err(TaskError::DuplicateKey(key));
        }
        if let Some(owner) = &self.owner {
            self.owners
                .entry(owner.clone())
                .or_default()
                .push(key.clone());
        }
        self.outputs.insert(key, value.into());
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    pub fn outputs(&self) -> &Map<String, Value> {
        &self.outputs
    }

    /// Keys written by `owner`, in write order.
    pub fn keys_of(&self, owner: &str) -> &[String] {
        self.owners.get(owner).map(Vec::as_slice).unwrap_or(&[])
    }

    pub(crate) fn set_owner(&mut self, owner: Option<String>) {
        self.owner = owner;
    }

    /// Snapshot in wire form.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| Value::Object(Map::new()))
    }
}

fn is_wire_shape(map: &Map<String, Value>) -> bool {
    map.get("outputs").is_some_and(Value::is_object)
        && map.keys().all(|key| key == "outputs" || key == "owners")
}

impl PartialEq for JobDataStore {
    fn eq(&self, other: &Self) -> bool {
        self.outputs == other.outputs
    }
}

impl Serialize for JobDataStore {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if self.outputs.is_empty() {
            return serializer.serialize_map(Some(0))?.end();
        }
        let mut map = serializer.serialize_map(Some(2))?;
        map.serialize_entry("outputs", &self.outputs)?;
        map.serialize_entry("owners", &self.owners)?;
        map.end()
    }
}

impl<'de> Deserialize<'de> for JobDataStore {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        StoreRepr::deserialize(deserializer).map(Self::from_repr)
    }
}
