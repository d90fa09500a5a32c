//! Home-directory back-end: the user's home as a browsable tree.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::model::{ObjectClass, ProviderObject};
use crate::provider::ObjectSource;

const DIR_ICON: &str = "./resources/Directory.png";
const FILE_ICON: &str = "./resources/File.png";

pub struct HomeSource {
    root: PathBuf,
}

impl HomeSource {
    pub fn new() -> Result<Self> {
        let root = dirs::home_dir().context("home directory not resolvable")?;
        Ok(Self { root })
    }

    /// Serve an arbitrary directory as the tree root (tests, kiosks).
    pub fn with_root(root: PathBuf) -> Self {
        Self { root }
    }

    /// Resolve a listing path, refusing to escape the root.
    fn resolve_dir(&self, rel: &str) -> Option<PathBuf> {
        let target = self.root.join(rel.trim_start_matches('/'));
        let canonical = target.canonicalize().ok()?;
        let root = self.root.canonicalize().ok()?;
        (canonical.starts_with(&root) && canonical.is_dir()).then_some(canonical)
    }

    fn list_dir(&self, rel: &str) -> Vec<ProviderObject> {
        let Some(dir) = self.resolve_dir(rel) else {
            return Vec::new();
        };
        let rel = rel.trim_matches('/');

        let mut entries: Vec<PathBuf> = match std::fs::read_dir(&dir) {
            Ok(read) => read.filter_map(|e| e.ok()).map(|e| e.path()).collect(),
            Err(_) => Vec::new(),
        };
        entries.sort_by_key(|p| {
            p.file_name()
                .map(|n| n.to_string_lossy().to_lowercase())
                .unwrap_or_default()
        });

        let mut objects = Vec::new();
        for path in entries {
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let id = if rel.is_empty() {
                format!("/{name}")
            } else {
                format!("/{rel}/{name}")
            };
            let (owner, group) = owner_and_group(&path);
            if path.is_dir() {
                let count = std::fs::read_dir(&path).map(|r| r.count() as u64).unwrap_or(0);
                objects.push(
                    ProviderObject::new(ObjectClass::Directory, id, name)
                        .icon(DIR_ICON)
                        .count(count)
                        .extra_opt("owner", owner)
                        .extra_opt("group", group),
                );
            } else if path.is_file() {
                objects.push(
                    ProviderObject::new(ObjectClass::File, id, name)
                        .icon(FILE_ICON)
                        .extra_opt("owner", owner)
                        .extra_opt("group", group),
                );
            }
        }
        objects
    }
}

impl ObjectSource for HomeSource {
    fn root_objects(&self) -> Result<Vec<ProviderObject>> {
        Ok(self.list_dir(""))
    }

    fn list_base(&self, base: &str) -> Result<Vec<ProviderObject>> {
        Ok(self.list_dir(base))
    }
}

#[cfg(unix)]
fn owner_and_group(path: &Path) -> (Option<String>, Option<String>) {
    use std::os::unix::fs::MetadataExt;
    let Ok(meta) = path.metadata() else {
        return (None, None);
    };
    let owner = nix::unistd::User::from_uid(nix::unistd::Uid::from_raw(meta.uid()))
        .ok()
        .flatten()
        .map(|u| u.name);
    let group = nix::unistd::Group::from_gid(nix::unistd::Gid::from_raw(meta.gid()))
        .ok()
        .flatten()
        .map(|g| g.name);
    (owner, group)
}

#[cfg(not(unix))]
fn owner_and_group(_path: &Path) -> (Option<String>, Option<String>) {
    (None, None)
}
