use serde::{Deserialize, Serialize};

use crate::normalize::RawItem;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub value: String,
}

/// Display-only key/value pairs shown next to a version by the orchestrator.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Metadata(Vec<Field>);

impl Metadata {
    pub fn add(&mut self, name: &str, value: impl Into<String>) {
        self.0.push(Field {
            name: name.to_string(),
            value: value.into(),
        });
    }

    pub fn add_json<T: Serialize>(&mut self, name: &str, value: &T) {
        match serde_json::to_string(value) {
            Ok(json) => self.add(name, json),
            Err(err) => tracing::warn!(name, "Unable to encode metadata field: {err}"),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|field| field.name == name)
            .map(|field| field.value.as_str())
    }
}

/// Metadata export for a stored manifest item.
pub fn item_metadata(path: &str, item: &RawItem) -> Metadata {
    let mut metadata = Metadata::default();

    metadata.add("artifactory-path", path);
    metadata.add("created", item.created.as_str());
    metadata.add("modified", item.modified.as_str());
    metadata.add("name", item.name.as_str());
    metadata.add("repo", item.repo.as_str());
    metadata.add("size", item.size.to_string());
    metadata.add("type", item.item_type.as_str());
    metadata.add_json("properties", &item.properties);

    metadata
}
