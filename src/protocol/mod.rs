//! Wire protocol: one UTF-8 JSON object per line, both directions.
//!
//! Requests carry their method under any of several discriminator keys
//! (clients in the wild disagree on the spelling); responses are built here
//! so every handler produces the same shapes.

use serde_json::{Map, Value, json};

use crate::model::ProviderObject;

/// Keys probed, in order, for the request method.
pub const METHOD_KEYS: [&str; 5] = ["method", "message", "type", "command", "action"];

/// Keys probed, in order, for the object id of a `GetObjects` request.
pub const ID_KEYS: [&str; 5] = ["id", "path", "object", "objectId", "ObjectId"];

/// Recognized request methods (case-sensitive).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    GetInfo,
    GetRootObjects,
    GetObjects,
    Search,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::GetInfo => "GetInfo",
            Method::GetRootObjects => "GetRootObjects",
            Method::GetObjects => "GetObjects",
            Method::Search => "Search",
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        match name {
            "GetInfo" => Some(Method::GetInfo),
            "GetRootObjects" => Some(Method::GetRootObjects),
            "GetObjects" => Some(Method::GetObjects),
            "Search" => Some(Method::Search),
            _ => None,
        }
    }
}

/// Extract the method of a request.
///
/// Accepts a bare JSON string naming a parameterless method, an object with
/// the method under a discriminator key, or an object using the method name
/// itself as a key with a truthy (or null) value.
pub fn method_of(request: &Value) -> Option<Method> {
    match request {
        Value::String(s) => Method::from_name(s.trim()),
        Value::Object(map) => {
            for key in METHOD_KEYS {
                if let Some(name) = map.get(key).and_then(Value::as_str) {
                    if let Some(method) = Method::from_name(name) {
                        return Some(method);
                    }
                }
            }
            for method in [
                Method::GetInfo,
                Method::GetRootObjects,
                Method::GetObjects,
                Method::Search,
            ] {
                if let Some(value) = map.get(method.as_str()) {
                    let truthy = match value {
                        Value::Null => true,
                        Value::Bool(b) => *b,
                        _ => true,
                    };
                    if truthy {
                        return Some(method);
                    }
                }
            }
            None
        }
        _ => None,
    }
}

/// Extract the object id from a request, probing the accepted id keys.
pub fn object_id_of(request: &Value) -> Option<String> {
    let map = request.as_object()?;
    ID_KEYS
        .iter()
        .find_map(|key| map.get(*key).and_then(Value::as_str))
        .map(str::to_string)
}

/// Parameters of a `Search` request.
#[derive(Debug, Clone)]
pub struct SearchParams {
    pub id: String,
    pub search: String,
    pub recursive: bool,
    /// The handle object from a previous reply, carried forward verbatim
    /// by polling calls.
    pub search_handle: Option<Value>,
}

impl SearchParams {
    pub fn from_request(request: &Value) -> Option<Self> {
        let map = request.as_object()?;
        Some(Self {
            id: object_id_of(request).unwrap_or_else(|| "/".to_string()),
            search: map.get("search")?.as_str()?.to_string(),
            recursive: map
                .get("recursive")
                .and_then(Value::as_bool)
                .unwrap_or(true),
            search_handle: map.get("search_handle").cloned(),
        })
    }
}

/// `{ "objects": [...] }`
pub fn objects_payload(objects: &[ProviderObject]) -> Value {
    json!({ "objects": objects.iter().map(ProviderObject::to_value).collect::<Vec<_>>() })
}

/// `{ "error": <msg> }` — always on the same response line.
pub fn error_payload(message: impl AsRef<str>) -> Value {
    json!({ "error": message.as_ref() })
}

/// One entry of the `GetInfo` icon catalog.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct IconEntry {
    /// Catalog key, e.g. `Partition.png`.
    pub filename: String,
    /// base64-encoded PNG bytes.
    pub data: String,
}

/// `{ "RootName": ..., "icons": [...] }`
pub fn info_payload(root_name: &str, icons: &[IconEntry]) -> Value {
    json!({
        "RootName": root_name,
        "icons": icons,
    })
}

/// Provider identity as seen by the browser.
#[derive(Debug, Clone, Default)]
pub struct ProviderInfo {
    pub root_name: String,
    pub icons: Vec<IconEntry>,
}

impl ProviderInfo {
    pub fn from_response(response: &Value) -> Self {
        let root_name = response
            .get("RootName")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let icons = response
            .get("icons")
            .and_then(Value::as_array)
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|e| serde_json::from_value(e.clone()).ok())
                    .collect()
            })
            .unwrap_or_default();
        Self { root_name, icons }
    }
}

/// Pull typed objects out of an `{"objects": [...]}` response, skipping
/// malformed entries instead of failing the listing.
pub fn objects_of(response: &Value) -> Vec<ProviderObject> {
    response
        .get("objects")
        .and_then(Value::as_array)
        .map(|entries| {
            entries
                .iter()
                .filter_map(ProviderObject::from_value)
                .collect()
        })
        .unwrap_or_default()
}

/// Build a `GetObjects` request line body.
pub fn get_objects_request(id: &str) -> Value {
    json!({ "method": "GetObjects", "id": id })
}

/// Build a `Search` request line body.
pub fn search_request(
    id: &str,
    search: &str,
    recursive: bool,
    search_handle: Option<&Value>,
) -> Value {
    let mut map = Map::new();
    map.insert("method".into(), json!("Search"));
    map.insert("id".into(), json!(id));
    map.insert("search".into(), json!(search));
    map.insert("recursive".into(), json!(recursive));
    if let Some(handle) = search_handle {
        map.insert("search_handle".into(), handle.clone());
    }
    Value::Object(map)
}
