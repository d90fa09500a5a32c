//! Lmod-style software module tree back-end.
//!
//! The tree root holds family directories; software packages live inside
//! `modulefiles` directories anywhere below. Loaded modules (per
//! `module -t list`) get the badge icon and a loaded flag, and free-text
//! search spiders the tree on a background worker.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Result;
use walkdir::WalkDir;

use super::{CLI_TIMEOUT, run_shell};
use crate::model::{ObjectClass, ProviderObject};
use crate::provider::{ObjectSource, resolve_path};

const BOX_ICON: &str = "./resources/Box.png";
const SOFTWARE_ICON: &str = "./resources/Software.png";
const SOFTWARE_MY_ICON: &str = "./resources/Software_IDCard.png";
const PERSON_ICON: &str = "./resources/IDCard.png";

/// Path of the synthetic "My Software" group.
const LOADED_GROUP_ID: &str = "/<Show:loaded:true>";

/// How deep a non-recursive search descends below the search base.
const SHALLOW_SEARCH_DEPTH: usize = 2;

pub struct ModulesSource {
    root: PathBuf,
    /// Names of currently loaded modules, family part only.
    loaded: Vec<String>,
}

impl ModulesSource {
    /// Build against a module tree root, detecting loaded modules through
    /// the `module` shell function.
    pub fn new(root: PathBuf) -> Self {
        let loaded = detect_loaded_modules();
        tracing::info!("{} loaded modules detected", loaded.len());
        Self { root, loaded }
    }

    /// Injectable constructor for tests and environments without Lmod.
    pub fn with_loaded(root: PathBuf, loaded: Vec<String>) -> Self {
        Self { root, loaded }
    }

    fn is_loaded(&self, name: &str) -> bool {
        self.loaded.iter().any(|m| m == name)
    }

    /// Resolve a listing path inside the tree, rejecting escapes.
    fn resolve_dir(&self, rel: &str) -> Option<PathBuf> {
        let target = self.root.join(rel.trim_start_matches('/'));
        let canonical = target.canonicalize().ok()?;
        let root = self.root.canonicalize().ok()?;
        canonical.starts_with(&root).then_some(canonical)
    }

    fn list_dir(&self, rel: &str) -> Vec<ProviderObject> {
        let Some(dir) = self.resolve_dir(rel) else {
            return Vec::new();
        };
        let rel = rel.trim_matches('/');
        let make_id = |name: &str| {
            if rel.is_empty() {
                format!("/{name}")
            } else {
                format!("/{rel}/{name}")
            }
        };

        let mut objects = Vec::new();
        for name in sorted_subdirs(&dir) {
            if name == "modulefiles" {
                continue;
            }
            let count = count_module_children(&dir.join(&name));
            objects.push(
                ProviderObject::new(ObjectClass::LmodDependency, make_id(&name), &name)
                    .icon(BOX_ICON)
                    .count(count),
            );
        }

        // Software entries under an immediate modulefiles directory.
        let modulefiles = dir.join("modulefiles");
        if modulefiles.is_dir() {
            for name in sorted_subdirs(&modulefiles) {
                let loaded = self.is_loaded(&name);
                let icon = if loaded { SOFTWARE_MY_ICON } else { SOFTWARE_ICON };
                objects.push(
                    ProviderObject::new(ObjectClass::LmodSoftware, make_id(&name), &name)
                        .icon(icon)
                        .extra("loaded", loaded),
                );
            }
        }
        objects
    }

    fn loaded_software(&self) -> Vec<ProviderObject> {
        self.loaded
            .iter()
            .map(|name| {
                ProviderObject::new(ObjectClass::LmodSoftware, format!("/{name}"), name)
                    .icon(SOFTWARE_MY_ICON)
                    .extra("loaded", true)
                    .extra("details", module_details(name))
            })
            .collect()
    }
}

impl ObjectSource for ModulesSource {
    fn root_objects(&self) -> Result<Vec<ProviderObject>> {
        let mut objects: Vec<ProviderObject> = sorted_subdirs(&self.root)
            .into_iter()
            .map(|name| {
                let count = count_module_children(&self.root.join(&name));
                ProviderObject::new(ObjectClass::LmodDependency, format!("/{name}"), &name)
                    .icon(BOX_ICON)
                    .count(count)
            })
            .collect();
        objects.push(ProviderObject::group(
            LOADED_GROUP_ID,
            "My Software",
            PERSON_ICON,
            self.loaded.len() as u64,
        ));
        Ok(objects)
    }

    fn list_base(&self, base: &str) -> Result<Vec<ProviderObject>> {
        Ok(self.list_dir(base))
    }

    fn objects_for_path(&self, path: &str) -> Result<Vec<ProviderObject>> {
        // The "My Software" group lists loaded modules with details instead
        // of filtering a tree listing.
        if path.trim() == LOADED_GROUP_ID {
            return Ok(self.loaded_software());
        }
        resolve_path(self, path)
    }

    fn supports_search(&self) -> bool {
        true
    }

    fn run_search(&self, term: &str, recursive: bool) -> Vec<ProviderObject> {
        search_tree(&self.root, term, recursive, |name| self.is_loaded(name))
    }
}

/// Immediate subdirectory names, sorted.
fn sorted_subdirs(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = match std::fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_dir())
            .filter_map(|e| e.file_name().into_string().ok())
            .collect(),
        Err(_) => Vec::new(),
    };
    names.sort();
    names
}

/// Number of software packages anywhere below `base`: subdirectories of any
/// nested `modulefiles` directory.
fn count_module_children(base: &Path) -> u64 {
    WalkDir::new(base)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_dir() && e.file_name() == "modulefiles")
        .map(|e| sorted_subdirs(e.path()).len() as u64)
        .sum()
}

/// Spider the tree for software whose name contains the term,
/// case-insensitively. Depth is bounded unless the search is recursive.
fn search_tree(
    root: &Path,
    term: &str,
    recursive: bool,
    is_loaded: impl Fn(&str) -> bool,
) -> Vec<ProviderObject> {
    let needle = term.to_lowercase();
    let mut walker = WalkDir::new(root);
    if !recursive {
        walker = walker.max_depth(SHALLOW_SEARCH_DEPTH);
    }

    // BTreeMap keys give a stable name order before the store's cap.
    let mut found: BTreeMap<String, ProviderObject> = BTreeMap::new();
    for entry in walker.into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_dir() || entry.file_name() != "modulefiles" {
            continue;
        }
        for name in sorted_subdirs(entry.path()) {
            if !name.to_lowercase().contains(&needle) {
                continue;
            }
            let rel = entry
                .path()
                .join(&name)
                .strip_prefix(root)
                .map(|p| p.to_string_lossy().replace('\\', "/"))
                .unwrap_or_else(|_| name.clone());
            let loaded = is_loaded(&name);
            let icon = if loaded { SOFTWARE_MY_ICON } else { SOFTWARE_ICON };
            found.entry(name.clone()).or_insert_with(|| {
                ProviderObject::new(ObjectClass::LmodSoftware, format!("/{rel}"), &name)
                    .icon(icon)
                    .extra("loaded", loaded)
            });
        }
    }
    found.into_values().collect()
}

/// Loaded module families through the `module` shell function; one name per
/// line in terse mode, version suffix stripped.
fn detect_loaded_modules() -> Vec<String> {
    match run_shell("module -t list 2>&1", CLI_TIMEOUT) {
        Ok(out) => out
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(|l| l.split('/').next().unwrap_or(l).to_string())
            .collect(),
        Err(err) => {
            tracing::warn!("module list unavailable: {err:#}");
            Vec::new()
        }
    }
}

/// `module whatis` description lines, with the leading module tag removed.
fn module_details(name: &str) -> String {
    match run_shell(&format!("module whatis {name} 2>&1"), CLI_TIMEOUT) {
        Ok(out) => out
            .lines()
            .filter_map(|line| {
                let rest = line.split_once(':')?.1;
                let trimmed = rest.trim_start();
                (!trimmed.is_empty()).then(|| trimmed.to_string())
            })
            .collect::<Vec<_>>()
            .join("\n"),
        Err(_) => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    /// GNU/ and Intel/ families; python + biopython under GNU, fortran
    /// under Intel/sub.
    fn module_tree() -> TempDir {
        let tmp = TempDir::new().unwrap();
        for dir in [
            "GNU/modulefiles/python",
            "GNU/modulefiles/biopython",
            "Intel/sub/modulefiles/fortran",
        ] {
            std::fs::create_dir_all(tmp.path().join(dir)).unwrap();
        }
        tmp
    }

    fn source(tmp: &TempDir, loaded: &[&str]) -> ModulesSource {
        ModulesSource::with_loaded(
            tmp.path().to_path_buf(),
            loaded.iter().map(|s| s.to_string()).collect(),
        )
    }

    #[test]
    fn test_root_lists_families_and_loaded_group() {
        let tmp = module_tree();
        let root = source(&tmp, &["python"]).root_objects().unwrap();
        assert_eq!(root.len(), 3);
        assert_eq!(root[0].title, "GNU");
        assert_eq!(root[0].class, ObjectClass::LmodDependency);
        assert_eq!(root[0].objects, 2);
        assert_eq!(root[1].title, "Intel");
        assert_eq!(root[1].objects, 1);
        assert_eq!(root[2].id, LOADED_GROUP_ID);
        assert_eq!(root[2].objects, 1);
    }

    #[test]
    fn test_listing_exposes_software_under_modulefiles() {
        let tmp = module_tree();
        let src = source(&tmp, &["python"]);
        let gnu = src.list_base("/GNU").unwrap();
        assert_eq!(gnu.len(), 2);
        assert_eq!(gnu[0].title, "biopython");
        assert_eq!(gnu[0].property("loaded").as_deref(), Some("false"));
        assert_eq!(gnu[0].icon.as_deref(), Some(SOFTWARE_ICON));
        assert_eq!(gnu[1].title, "python");
        assert_eq!(gnu[1].property("loaded").as_deref(), Some("true"));
        assert_eq!(gnu[1].icon.as_deref(), Some(SOFTWARE_MY_ICON));
        assert_eq!(gnu[1].id, "/GNU/python");

        // Intermediate directories are dependencies, not software.
        let intel = src.list_base("/Intel").unwrap();
        assert_eq!(intel.len(), 1);
        assert_eq!(intel[0].class, ObjectClass::LmodDependency);
        assert_eq!(intel[0].id, "/Intel/sub");
    }

    #[test]
    fn test_loaded_filter_via_engine() {
        let tmp = module_tree();
        let src = source(&tmp, &["python"]);
        let loaded = src.objects_for_path("/GNU/<Show:loaded:true>").unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].title, "python");
    }

    #[test]
    fn test_escape_paths_are_rejected() {
        let tmp = module_tree();
        let src = source(&tmp, &[]);
        assert!(src.list_base("/../..").unwrap().is_empty());
        assert!(src.list_base("/nonexistent").unwrap().is_empty());
    }

    #[test]
    fn test_search_matches_case_insensitively() {
        let tmp = module_tree();
        let src = source(&tmp, &[]);
        let hits = src.run_search("PYTHON", true);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].title, "biopython");
        assert_eq!(hits[1].title, "python");
        assert_eq!(hits[1].id, "/GNU/modulefiles/python");

        let fortran = src.run_search("fort", true);
        assert_eq!(fortran.len(), 1);

        // Non-recursive search stays near the top of the tree.
        assert!(src.run_search("fortran", false).is_empty());
    }
}
