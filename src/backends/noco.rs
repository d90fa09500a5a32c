//! NocoDB REST back-end: bases and tables at the root, records as leaves.
//!
//! The API surface moved between NocoDB releases, so every lookup walks a
//! list of endpoint spellings and takes the first that answers. Responses
//! are cached per kind for the process lifetime.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde_json::{Map, Value, json};

use crate::model::{ObjectClass, ProviderObject};
use crate::provider::ObjectSource;

const TABLE_ICON: &str = "./resources/Table.png";
const RECORD_ICON: &str = "./resources/Record.png";

const HTTP_TIMEOUT: Duration = Duration::from_secs(10);
const RECORD_LIMIT: u32 = 1000;

/// Connection settings from a `key=value` config file.
#[derive(Debug, Clone)]
pub struct NocoConfig {
    pub base_url: String,
    pub api_token: String,
}

/// Read `baseURL` and `Token1` from a config file; quotes are stripped.
pub fn read_config(path: &Path) -> Result<NocoConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read config {}", path.display()))?;
    let mut values = HashMap::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let value = value.trim().trim_matches('"').trim_matches('\'');
        values.insert(key.trim().to_string(), value.to_string());
    }
    let base_url = values
        .get("baseURL")
        .context("baseURL missing from config")?
        .trim_end_matches('/')
        .to_string();
    let api_token = values
        .get("Token1")
        .context("Token1 missing from config")?
        .clone();
    if api_token.is_empty() {
        bail!("Token1 is empty");
    }
    Ok(NocoConfig { base_url, api_token })
}

pub struct NocoSource {
    client: reqwest::blocking::Client,
    config: NocoConfig,
    bases_cache: Mutex<Option<Vec<Value>>>,
    tables_cache: Mutex<HashMap<String, Vec<Value>>>,
    records_cache: Mutex<HashMap<String, Vec<Value>>>,
}

impl NocoSource {
    pub fn new(config: NocoConfig) -> Result<Self> {
        // Self-hosted NocoDB instances commonly run on self-signed certs.
        let client = reqwest::blocking::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .danger_accept_invalid_certs(true)
            .build()
            .context("building HTTP client")?;
        Ok(Self {
            client,
            config,
            bases_cache: Mutex::new(None),
            tables_cache: Mutex::new(HashMap::new()),
            records_cache: Mutex::new(HashMap::new()),
        })
    }

    fn get_json(&self, endpoint: &str, limit: Option<u32>) -> Option<Value> {
        let url = format!("{}{}", self.config.base_url, endpoint);
        let mut request = self
            .client
            .get(&url)
            .header("xc-token", &self.config.api_token);
        if let Some(limit) = limit {
            request = request.query(&[("limit", limit)]);
        }
        match request.send() {
            Ok(response) if response.status().is_success() => response.json().ok(),
            Ok(response) => {
                tracing::debug!("{url} answered {}", response.status());
                None
            }
            Err(err) => {
                tracing::debug!("{url} failed: {err}");
                None
            }
        }
    }

    /// Try each endpoint spelling until one yields a list.
    fn fetch_list(&self, endpoints: &[String], limit: Option<u32>) -> Vec<Value> {
        for endpoint in endpoints {
            if let Some(data) = self.get_json(endpoint, limit) {
                let list = extract_list(&data);
                if !list.is_empty() {
                    return list;
                }
            }
        }
        Vec::new()
    }

    fn bases(&self) -> Vec<Value> {
        let mut cache = self.bases_cache.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(bases) = cache.as_ref() {
            return bases.clone();
        }
        let bases = self.fetch_list(
            &[
                "/api/v2/meta/bases".to_string(),
                "/api/v1/db/meta/projects".to_string(),
                "/api/v2/bases".to_string(),
            ],
            None,
        );
        *cache = Some(bases.clone());
        bases
    }

    fn tables_for_base(&self, base_id: &str) -> Vec<Value> {
        {
            let cache = self.tables_cache.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(tables) = cache.get(base_id) {
                return tables.clone();
            }
        }
        let tables = self.fetch_list(
            &[
                format!("/api/v2/meta/bases/{base_id}/tables"),
                format!("/api/v1/db/meta/projects/{base_id}/tables"),
                format!("/api/v2/bases/{base_id}/tables"),
            ],
            None,
        );
        self.tables_cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(base_id.to_string(), tables.clone());
        tables
    }

    fn table_columns(&self, table_id: &str) -> u64 {
        for endpoint in [
            format!("/api/v2/meta/tables/{table_id}"),
            format!("/api/v1/db/meta/tables/{table_id}"),
        ] {
            if let Some(schema) = self.get_json(&endpoint, None) {
                if let Some(columns) = schema.get("columns").and_then(Value::as_array) {
                    return columns.len() as u64;
                }
            }
        }
        0
    }

    fn records_for_table(&self, base_id: &str, table_id: &str, table_title: &str) -> Vec<Value> {
        let cache_key = format!("{base_id}:{table_id}");
        {
            let cache = self.records_cache.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(records) = cache.get(&cache_key) {
                return records.clone();
            }
        }
        let records = self.fetch_list(
            &[
                format!("/api/v2/tables/{table_id}/records"),
                format!("/api/v1/db/data/noco/{base_id}/{table_title}"),
                format!("/api/v1/db/data/{base_id}/{table_id}"),
            ],
            Some(RECORD_LIMIT),
        );
        self.records_cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(cache_key, records.clone());
        records
    }

    /// Locate a table by id across every base.
    fn find_table(&self, table_id: &str) -> Option<(String, String)> {
        for base in self.bases() {
            let Some(base_id) = string_field(&base, &["id", "project_id"]) else {
                continue;
            };
            for table in self.tables_for_base(&base_id) {
                if string_field(&table, &["id"]).as_deref() == Some(table_id) {
                    let title = string_field(&table, &["title", "table_name"])
                        .unwrap_or_else(|| "Unnamed".to_string());
                    return Some((base_id, title));
                }
            }
        }
        None
    }
}

impl ObjectSource for NocoSource {
    fn root_objects(&self) -> Result<Vec<ProviderObject>> {
        let mut objects = Vec::new();
        for base in self.bases() {
            let Some(base_id) = string_field(&base, &["id", "project_id"]) else {
                continue;
            };
            for table in self.tables_for_base(&base_id) {
                let table_id = string_field(&table, &["id"]).unwrap_or_else(|| "unknown".into());
                let title = string_field(&table, &["title", "table_name"])
                    .unwrap_or_else(|| "Unnamed Table".into());
                let table_type =
                    string_field(&table, &["type"]).unwrap_or_else(|| "table".into());
                let records = self.records_for_table(&base_id, &table_id, &title);
                objects.push(
                    ProviderObject::new(ObjectClass::NocoTable, format!("/{table_id}"), title)
                        .icon(TABLE_ICON)
                        .count(records.len() as u64)
                        .extra("base_id", base_id.clone())
                        .extra("table_type", table_type)
                        .extra("column_count", self.table_columns(&table_id))
                        .extra("record_count", records.len() as u64),
                );
            }
        }
        Ok(objects)
    }

    fn list_base(&self, base: &str) -> Result<Vec<ProviderObject>> {
        let table_id = base.trim_matches('/').split('/').next().unwrap_or_default();
        let Some((base_id, title)) = self.find_table(table_id) else {
            return Ok(Vec::new());
        };
        let records = self.records_for_table(&base_id, table_id, &title);
        Ok(records
            .iter()
            .enumerate()
            .filter_map(|(index, record)| record_object(table_id, index, record))
            .collect())
    }

    fn group_whitelist(&self) -> Option<HashSet<String>> {
        Some(
            [
                "status",
                "branch",
                "credit",
                "instrument",
                "facility",
                "image_title",
                "date_created",
                "url",
            ]
            .into_iter()
            .map(str::to_string)
            .collect(),
        )
    }
}

/// Unwrap the list-of-things shapes the API uses: a bare array, `{"list"}`,
/// or `{"data"}`.
fn extract_list(data: &Value) -> Vec<Value> {
    match data {
        Value::Array(items) => items.clone(),
        Value::Object(map) => map
            .get("list")
            .or_else(|| map.get("data"))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default(),
        _ => Vec::new(),
    }
}

fn string_field(value: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|key| value.get(*key).and_then(Value::as_str))
        .map(str::to_string)
}

/// First element of a value that may be a JSON array or a JSON-encoded
/// array string (how NocoDB stores multi-valued EXIF fields).
fn first_of_embedded_list(value: Option<&Value>) -> Option<String> {
    let value = value?;
    match value {
        Value::Array(items) => items.first().and_then(Value::as_str).map(str::to_string),
        Value::String(text) => match serde_json::from_str::<Value>(text) {
            Ok(Value::Array(items)) => {
                items.first().and_then(Value::as_str).map(str::to_string)
            }
            _ => (!text.is_empty()).then(|| text.clone()),
        },
        _ => None,
    }
}

/// Curate one REST record into a typed leaf.
fn record_object(table_id: &str, index: usize, record: &Value) -> Option<ProviderObject> {
    let map = record.as_object()?;
    let text = |key: &str| {
        map.get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };
    let first_text = |keys: &[&str]| keys.iter().find_map(|k| text(k));
    let number = |key: &str| map.get(key).and_then(Value::as_i64);

    let url = text("URL");
    let image_title = text("EXIF.XMP:Title");
    let mut description = text("EXIF.EXIF:ImageDescription");
    if let Some(text) = &mut description {
        if text.chars().count() > 200 {
            *text = text.chars().take(200).collect::<String>() + "...";
        }
    }

    let title = image_title
        .clone()
        .or_else(|| {
            url.as_deref()
                .and_then(|u| u.rsplit('/').next())
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        })
        .unwrap_or_else(|| format!("Record {}", index + 1));

    let mut object = ProviderObject::new(
        ObjectClass::NocoRecord,
        format!("/{table_id}/{index}"),
        title,
    )
    .icon(RECORD_ICON)
    .extra_opt("url", url.clone())
    .extra_opt("status", text("status"))
    .extra_opt("branch", text("branch"))
    .extra_opt("image_title", image_title)
    .extra_opt("image_description", description)
    .extra_opt("credit", first_text(&["EXIF.XMP:Credit", "EXIF.IPTC:Credit"]))
    .extra_opt(
        "date_created",
        first_text(&["EXIF.XMP:DateCreated", "EXIF.IPTC:DateCreated"]),
    )
    .extra_opt("instrument", first_of_embedded_list(map.get("EXIF.XMP:Instrument")))
    .extra_opt("facility", first_of_embedded_list(map.get("EXIF.XMP:Facility")))
    .extra_opt("image_width", number("EXIF.File:ImageWidth"))
    .extra_opt("image_height", number("EXIF.File:ImageHeight"))
    .extra_opt("file_size", number("EXIF.File:FileSize"));

    if let Some(url) = url {
        object = object.extra(
            "contextmenu",
            json!([{"title": "Open URL", "action": "browser", "url": url}]),
        );
    }
    Some(object)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_read_config_strips_quotes() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.dat");
        std::fs::write(
            &path,
            "# nocodb\nbaseURL=\"https://noco.example.org/\"\nToken1='sekrit'\njunk line\n",
        )
        .unwrap();
        let config = read_config(&path).unwrap();
        assert_eq!(config.base_url, "https://noco.example.org");
        assert_eq!(config.api_token, "sekrit");
    }

    #[test]
    fn test_read_config_requires_both_keys() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.dat");
        std::fs::write(&path, "baseURL=https://x\n").unwrap();
        assert!(read_config(&path).is_err());
    }

    #[test]
    fn test_extract_list_shapes() {
        assert_eq!(extract_list(&json!([1, 2])).len(), 2);
        assert_eq!(extract_list(&json!({"list": [1]})).len(), 1);
        assert_eq!(extract_list(&json!({"data": [1, 2, 3]})).len(), 3);
        assert!(extract_list(&json!({"other": 1})).is_empty());
        assert!(extract_list(&json!("nope")).is_empty());
    }

    #[test]
    fn test_record_object_curates_fields() {
        let record = json!({
            "URL": "https://img.example.org/galaxy.png",
            "status": "published",
            "EXIF.XMP:Title": "A Galaxy",
            "EXIF.EXIF:ImageDescription": "Very far away",
            "EXIF.XMP:Instrument": "[\"WFC3\",\"ACS\"]",
            "EXIF.XMP:Facility": ["HST"],
            "EXIF.File:ImageWidth": 4096,
        });
        let object = record_object("tbl1", 0, &record).unwrap();
        assert_eq!(object.class, ObjectClass::NocoRecord);
        assert_eq!(object.id, "/tbl1/0");
        assert_eq!(object.title, "A Galaxy");
        assert_eq!(object.property("instrument").as_deref(), Some("WFC3"));
        assert_eq!(object.property("facility").as_deref(), Some("HST"));
        assert_eq!(object.property("image_width").as_deref(), Some("4096"));
        let menu = object.context_menu();
        assert_eq!(menu.len(), 1);
        assert_eq!(menu[0].action, "browser");
    }

    #[test]
    fn test_record_object_title_fallbacks() {
        let by_url = record_object("t", 3, &json!({"URL": "https://x/img.png"})).unwrap();
        assert_eq!(by_url.title, "img.png");
        let by_index = record_object("t", 3, &json!({"status": "new"})).unwrap();
        assert_eq!(by_index.title, "Record 4");
    }

    #[test]
    fn test_long_descriptions_are_truncated() {
        let record = json!({"EXIF.EXIF:ImageDescription": "x".repeat(300)});
        let object = record_object("t", 0, &record).unwrap();
        let description = object.property("image_description").unwrap();
        assert_eq!(description.chars().count(), 203);
        assert!(description.ends_with("..."));
    }
}
