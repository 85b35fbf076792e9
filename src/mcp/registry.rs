//! Descriptors discovered from a server and the catalogs that hold them.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

/// A catalog entry addressable by a unique key.
pub trait CatalogEntry: Clone + DeserializeOwned {
    fn key(&self) -> &str;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "inputSchema", default = "empty_object")]
    pub input_schema: Value,
    /// Any additional fields the server attached (annotations, titles, ...).
    #[serde(flatten)]
    pub metadata: Map<String, Value>,
}

impl ToolDescriptor {
    pub fn description(&self) -> &str {
        self.description.as_deref().unwrap_or("")
    }
}

impl CatalogEntry for ToolDescriptor {
    fn key(&self) -> &str {
        &self.name
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    pub uri: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "mimeType", default)]
    pub mime_type: Option<String>,
    #[serde(flatten)]
    pub metadata: Map<String, Value>,
}

impl CatalogEntry for ResourceDescriptor {
    fn key(&self) -> &str {
        &self.uri
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptArgument {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub required: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub arguments: Vec<PromptArgument>,
    #[serde(flatten)]
    pub metadata: Map<String, Value>,
}

impl CatalogEntry for PromptDescriptor {
    fn key(&self) -> &str {
        &self.name
    }
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

/// Ordered, key-unique collection of descriptors.
///
/// Replaced wholesale on every discovery pass; readers receive clones.
#[derive(Debug, Clone)]
pub struct Catalog<T> {
    entries: Vec<T>,
}

impl<T> Default for Catalog<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<T: CatalogEntry> Catalog<T> {
    /// Replaces the contents; later duplicates of a key are dropped.
    pub fn replace(&mut self, entries: Vec<T>) {
        let mut unique: Vec<T> = Vec::with_capacity(entries.len());
        for entry in entries {
            if unique.iter().any(|existing| existing.key() == entry.key()) {
                warn!(key = %entry.key(), "Ignoring duplicate catalog entry");
                continue;
            }
            unique.push(entry);
        }
        self.entries = unique;
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn get(&self, key: &str) -> Option<&T> {
        self.entries.iter().find(|entry| entry.key() == key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn keys(&self) -> Vec<String> {
        self.entries
            .iter()
            .map(|entry| entry.key().to_string())
            .collect()
    }

    pub fn snapshot(&self) -> Vec<T> {
        self.entries.clone()
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Extracts one page of a `*/list` result.
///
/// Entries that do not match the descriptor shape are skipped with a warning
/// so one malformed tool cannot hide the rest.
pub fn parse_list_page<T: CatalogEntry>(result: &Value, field: &str) -> (Vec<T>, Option<String>) {
    let entries = result
        .get(field)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| match serde_json::from_value::<T>(item.clone()) {
                    Ok(entry) => Some(entry),
                    Err(err) => {
                        warn!(field, error = %err, "Skipping malformed catalog entry");
                        None
                    }
                })
                .collect()
        })
        .unwrap_or_default();

    let next_cursor = result
        .get("nextCursor")
        .and_then(Value::as_str)
        .filter(|cursor| !cursor.is_empty())
        .map(str::to_string);

    (entries, next_cursor)
}
