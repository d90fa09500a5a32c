//! Typed object model shared by providers and the browser.
//!
//! Objects travel as flat JSON maps: the required quintuple
//! (`class`, `id`, `title`, `icon`, `objects`) plus per-class extras.
//! Unknown classes and unknown extras round-trip untouched so that
//! grouping and filtering over arbitrary keys keeps working.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Keys of the required quintuple; everything else is an extra.
const CORE_KEYS: [&str; 5] = ["class", "id", "title", "icon", "objects"];

/// Class tag of a provider object.
///
/// Known classes get a variant; anything else is carried verbatim in
/// `Unknown` and treated as a generic object by the browser.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ObjectClass {
    SlurmPartition,
    SlurmJob,
    Group,
    LmodDependency,
    LmodSoftware,
    LmodSearchHandle,
    LmodSearchProgress,
    Directory,
    File,
    NocoTable,
    NocoRecord,
    Account,
    Object,
    Unknown(String),
}

impl ObjectClass {
    /// Wire name of this class.
    pub fn as_str(&self) -> &str {
        match self {
            ObjectClass::SlurmPartition => "WPSlurmPartition",
            ObjectClass::SlurmJob => "WPSlurmJob",
            ObjectClass::Group => "WPGroup",
            ObjectClass::LmodDependency => "WPLmodDependency",
            ObjectClass::LmodSoftware => "WPLmodSoftware",
            ObjectClass::LmodSearchHandle => "WPLmodSearchHandle",
            ObjectClass::LmodSearchProgress => "WPLmodSearchProgress",
            ObjectClass::Directory => "WPDirectory",
            ObjectClass::File => "WPFile",
            ObjectClass::NocoTable => "WPNocoTable",
            ObjectClass::NocoRecord => "WPNocoRecord",
            ObjectClass::Account => "WPAccount",
            ObjectClass::Object => "WPObject",
            ObjectClass::Unknown(tag) => tag,
        }
    }

    /// Resolve a wire tag against the known-class registry.
    /// Comparison is case-sensitive; unrecognized tags are preserved.
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "WPSlurmPartition" => ObjectClass::SlurmPartition,
            "WPSlurmJob" => ObjectClass::SlurmJob,
            "WPGroup" => ObjectClass::Group,
            "WPLmodDependency" => ObjectClass::LmodDependency,
            "WPLmodSoftware" => ObjectClass::LmodSoftware,
            "WPLmodSearchHandle" => ObjectClass::LmodSearchHandle,
            "WPLmodSearchProgress" => ObjectClass::LmodSearchProgress,
            "WPDirectory" => ObjectClass::Directory,
            "WPFile" => ObjectClass::File,
            "WPNocoTable" => ObjectClass::NocoTable,
            "WPNocoRecord" => ObjectClass::NocoRecord,
            "WPAccount" => ObjectClass::Account,
            "WPObject" => ObjectClass::Object,
            other => ObjectClass::Unknown(other.to_string()),
        }
    }
}

impl Serialize for ObjectClass {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ObjectClass {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let tag = String::deserialize(deserializer)?;
        Ok(ObjectClass::from_tag(&tag))
    }
}

impl std::fmt::Display for ObjectClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One node in a provider's object tree.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderObject {
    pub class: ObjectClass,
    /// Provider-local path, begins with `/`.
    pub id: String,
    pub title: String,
    /// Filename reference of the form `./resources/Name.png`.
    /// `None` serializes as `null` (preserved on the wire).
    pub icon: Option<String>,
    /// Children count hint; `> 0` renders an enterable affordance.
    pub objects: u64,
    /// Per-class extra fields, preserved verbatim for unknown keys.
    #[serde(flatten)]
    pub extras: Map<String, Value>,
}

impl ProviderObject {
    pub fn new(class: ObjectClass, id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            class,
            id: id.into(),
            title: title.into(),
            icon: None,
            objects: 0,
            extras: Map::new(),
        }
    }

    /// Synthetic group node emitted by `GroupBy` pipelines and by providers
    /// for shortcuts like "My Jobs".
    pub fn group(
        id: impl Into<String>,
        title: impl Into<String>,
        icon: impl Into<String>,
        objects: u64,
    ) -> Self {
        Self::new(ObjectClass::Group, id, title)
            .icon(icon)
            .count(objects)
    }

    pub fn icon(mut self, icon: impl Into<String>) -> Self {
        self.icon = Some(icon.into());
        self
    }

    pub fn count(mut self, objects: u64) -> Self {
        self.objects = objects;
        self
    }

    pub fn extra(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.extras.insert(key.to_string(), value.into());
        self
    }

    /// Insert an extra only when the value is present.
    pub fn extra_opt(self, key: &str, value: Option<impl Into<Value>>) -> Self {
        match value {
            Some(v) => self.extra(key, v),
            None => self,
        }
    }

    /// Tolerant reconstruction from a wire map.
    ///
    /// Missing fields default (`id` to `/`), `objects` accepts any numeric
    /// rendering, non-string icons collapse to `null`. Returns `None` only
    /// when `value` is not a JSON object.
    pub fn from_value(value: &Value) -> Option<Self> {
        let map = value.as_object()?;
        let class = ObjectClass::from_tag(
            map.get("class").and_then(Value::as_str).unwrap_or("WPObject"),
        );
        let id = map
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or("/")
            .to_string();
        let title = map
            .get("title")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let icon = map
            .get("icon")
            .and_then(Value::as_str)
            .map(str::to_string);
        let objects = match map.get("objects") {
            Some(Value::Number(n)) => n
                .as_u64()
                .or_else(|| n.as_f64().map(|f| f.max(0.0) as u64))
                .unwrap_or(0),
            Some(Value::String(s)) => s.parse().unwrap_or(0),
            _ => 0,
        };
        let mut extras = Map::new();
        for (key, val) in map {
            if !CORE_KEYS.contains(&key.as_str()) {
                extras.insert(key.clone(), val.clone());
            }
        }
        Some(Self {
            class,
            id,
            title,
            icon,
            objects,
            extras,
        })
    }

    /// The full wire map for this object.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Stringified view of a property, looking at core fields first and
    /// extras second. `null` and missing values are `None` so that grouping
    /// and filtering skip them.
    pub fn property(&self, name: &str) -> Option<String> {
        match name {
            "class" => Some(self.class.as_str().to_string()),
            "id" => Some(self.id.clone()),
            "title" => Some(self.title.clone()),
            "icon" => self.icon.clone(),
            "objects" => Some(self.objects.to_string()),
            _ => self.extras.get(name).and_then(stringify),
        }
    }

    /// Substring search over one property, or over every field when
    /// `prop == "all"`. The needle is matched case-insensitively.
    pub fn matches(&self, prop: &str, needle: &str) -> bool {
        let needle = needle.to_lowercase();
        if prop == "all" {
            let Value::Object(map) = self.to_value() else {
                return false;
            };
            return map
                .values()
                .filter_map(stringify)
                .any(|s| s.to_lowercase().contains(&needle));
        }
        self.property(prop)
            .is_some_and(|s| s.to_lowercase().contains(&needle))
    }

    /// Declared open actions, tolerant of malformed entries.
    pub fn open_actions(&self) -> Vec<OpenAction> {
        actions_from(self.extras.get("openaction"))
    }

    /// Declared context-menu entries.
    pub fn context_menu(&self) -> Vec<ContextMenuEntry> {
        self.extras
            .get("contextmenu")
            .and_then(Value::as_array)
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|e| serde_json::from_value(e.clone()).ok())
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl<'de> Deserialize<'de> for ProviderObject {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        ProviderObject::from_value(&value)
            .ok_or_else(|| D::Error::custom("provider object must be a JSON object"))
    }
}

/// Stringification rule shared by grouping, filtering, and search:
/// `null` is skipped, strings pass through, scalars render as JSON scalars,
/// composites as compact JSON.
pub fn stringify(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        other => serde_json::to_string(other).ok(),
    }
}

fn actions_from(value: Option<&Value>) -> Vec<OpenAction> {
    match value {
        Some(Value::Array(entries)) => entries
            .iter()
            .filter_map(|e| serde_json::from_value(e.clone()).ok())
            .collect(),
        // A single action object is accepted as a one-element list.
        Some(obj @ Value::Object(_)) => serde_json::from_value(obj.clone())
            .map(|a| vec![a])
            .unwrap_or_default(),
        _ => Vec::new(),
    }
}

/// One declared open action on an object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenAction {
    pub action: String,
    /// Endpoint override for `objectbrowser` actions; `hostname` and `host`
    /// are both accepted on the wire.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

impl OpenAction {
    pub fn endpoint_host(&self) -> Option<&str> {
        self.hostname.as_deref().or(self.host.as_deref())
    }
}

/// One declared context-menu entry; dispatches like an open action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextMenuEntry {
    pub title: String,
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}
