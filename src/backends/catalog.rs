//! JSON catalog back-end: a directory of object files served as a tree.
//!
//! Every `*.json` file contributes objects — a single object, a list, or a
//! `{"objects": [...]}` wrapper. A companion directory named after the file
//! stem provides the next tree level, and its JSON-file count becomes the
//! children hint.

use std::path::{Path, PathBuf};

use anyhow::Result;
use serde_json::Value;

use crate::model::{ObjectClass, ProviderObject};
use crate::provider::ObjectSource;

pub struct CatalogSource {
    objects_dir: PathBuf,
}

impl CatalogSource {
    pub fn new(objects_dir: PathBuf) -> Self {
        Self { objects_dir }
    }

    fn resolve_dir(&self, rel: &str) -> Option<PathBuf> {
        let target = self.objects_dir.join(rel.trim_start_matches('/'));
        let canonical = target.canonicalize().ok()?;
        let root = self.objects_dir.canonicalize().ok()?;
        canonical.starts_with(&root).then_some(canonical)
    }
}

impl ObjectSource for CatalogSource {
    fn root_objects(&self) -> Result<Vec<ProviderObject>> {
        Ok(gather_objects(&self.objects_dir))
    }

    fn list_base(&self, base: &str) -> Result<Vec<ProviderObject>> {
        Ok(match self.resolve_dir(base) {
            Some(dir) => gather_objects(&dir),
            None => Vec::new(),
        })
    }
}

/// Read every JSON object file of a directory, in filename order.
fn gather_objects(directory: &Path) -> Vec<ProviderObject> {
    let mut files: Vec<PathBuf> = match std::fs::read_dir(directory) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                p.is_file()
                    && p.extension()
                        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
            })
            .collect(),
        Err(_) => return Vec::new(),
    };
    files.sort();

    let mut results = Vec::new();
    for file in files {
        let data: Value = match std::fs::read_to_string(&file)
            .ok()
            .and_then(|text| serde_json::from_str(&text).ok())
        {
            Some(data) => data,
            None => {
                tracing::warn!("skipping unparsable object file {}", file.display());
                continue;
            }
        };

        // Children live in a companion directory named after the file stem.
        let companion = file.with_extension("");
        let children = count_json_files(&companion);

        let mut push = |value: &Value| {
            if let Some(object) = catalog_object(value, children) {
                results.push(object);
            }
        };
        match &data {
            Value::Array(items) => items.iter().for_each(&mut push),
            Value::Object(map) => match map.get("objects").and_then(Value::as_array) {
                Some(items) => items.iter().for_each(&mut push),
                None => push(&data),
            },
            _ => {}
        }
    }
    results
}

fn count_json_files(dir: &Path) -> u64 {
    match std::fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .filter(|e| {
                let path = e.path();
                path.is_file()
                    && path
                        .extension()
                        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
            })
            .count() as u64,
        Err(_) => 0,
    }
}

/// Normalize one authored object: generic class, icon rewritten to its
/// resource filename, every non-core key passed through as an extra.
fn catalog_object(value: &Value, children: u64) -> Option<ProviderObject> {
    let map = value.as_object()?;
    let icon = map
        .get("icon")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .and_then(|authored| {
            Path::new(authored)
                .file_name()
                .map(|name| format!("./resources/{}", name.to_string_lossy()))
        });

    let mut object = ProviderObject::new(
        ObjectClass::Object,
        map.get("id").and_then(Value::as_str).unwrap_or_default(),
        map.get("title").and_then(Value::as_str).unwrap_or_default(),
    )
    .count(children);
    object.icon = icon;
    for (key, val) in map {
        if !matches!(key.as_str(), "class" | "id" | "title" | "icon" | "objects") {
            object.extras.insert(key.clone(), val.clone());
        }
    }
    Some(object)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn write_json(dir: &Path, name: &str, value: Value) {
        std::fs::write(dir.join(name), serde_json::to_string(&value).unwrap()).unwrap();
    }

    fn fixture() -> TempDir {
        let tmp = TempDir::new().unwrap();
        write_json(
            tmp.path(),
            "systems.json",
            json!({"objects": [
                {"id": "/systems/quartz", "title": "Quartz",
                 "icon": "Resources/System.png", "docs": "https://example.org"},
                {"id": "/systems/bigred", "title": "Big Red 200"},
            ]}),
        );
        write_json(
            tmp.path(),
            "about.json",
            json!({"id": "/about", "title": "About", "icon": null}),
        );
        let companion = tmp.path().join("systems");
        std::fs::create_dir(&companion).unwrap();
        write_json(&companion, "quartz.json", json!({"id": "/systems/quartz/x", "title": "X"}));
        tmp
    }

    #[test]
    fn test_root_gathers_all_object_shapes() {
        let src = fixture();
        let catalog = CatalogSource::new(src.path().to_path_buf());
        let root = catalog.root_objects().unwrap();
        let titles: Vec<&str> = root.iter().map(|o| o.title.as_str()).collect();
        // about.json sorts before systems.json
        assert_eq!(titles, vec!["About", "Quartz", "Big Red 200"]);
        assert!(root.iter().all(|o| o.class == ObjectClass::Object));
    }

    #[test]
    fn test_icon_normalized_and_extras_kept() {
        let src = fixture();
        let catalog = CatalogSource::new(src.path().to_path_buf());
        let root = catalog.root_objects().unwrap();
        let quartz = root.iter().find(|o| o.title == "Quartz").unwrap();
        assert_eq!(quartz.icon.as_deref(), Some("./resources/System.png"));
        assert_eq!(quartz.property("docs").as_deref(), Some("https://example.org"));
        // Children hint from the companion directory's json count.
        assert_eq!(quartz.objects, 1);
    }

    #[test]
    fn test_descending_into_companion_directory() {
        let src = fixture();
        let catalog = CatalogSource::new(src.path().to_path_buf());
        let level = catalog.list_base("/systems").unwrap();
        assert_eq!(level.len(), 1);
        assert_eq!(level[0].title, "X");
    }

    #[test]
    fn test_escapes_and_garbage_are_tolerated() {
        let src = fixture();
        std::fs::write(src.path().join("broken.json"), "{not json").unwrap();
        let catalog = CatalogSource::new(src.path().to_path_buf());
        assert!(catalog.list_base("/../..").unwrap().is_empty());
        // Broken files are skipped, not fatal.
        assert_eq!(catalog.root_objects().unwrap().len(), 3);
    }
}
