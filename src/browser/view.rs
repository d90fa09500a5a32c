//! View-state glue: icon/table mode, zoom, reflow math, and the persisted
//! settings store. Rendering itself lives behind the widget toolkit
//! boundary; this module only owns the state the toolkit binds to.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const MIN_ZOOM: f64 = 0.5;
pub const MAX_ZOOM: f64 = 3.0;

/// Resize events are coalesced over this window before a reflow.
pub const REFLOW_WINDOW: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ViewMode {
    #[default]
    Icon,
    Table,
}

/// Mutable presentation state of the object area.
#[derive(Debug, Clone)]
pub struct ViewState {
    pub mode: ViewMode,
    pub zoom: f64,
    pub details_visible: bool,
}

impl Default for ViewState {
    fn default() -> Self {
        Self {
            mode: ViewMode::Icon,
            zoom: 1.0,
            details_visible: true,
        }
    }
}

impl ViewState {
    pub fn set_zoom(&mut self, zoom: f64) {
        self.zoom = zoom.clamp(MIN_ZOOM, MAX_ZOOM);
    }

    pub fn toggle_mode(&mut self) {
        self.mode = match self.mode {
            ViewMode::Icon => ViewMode::Table,
            ViewMode::Table => ViewMode::Icon,
        };
    }
}

/// Columns of the icon grid for a viewport width, never fewer than one.
pub fn column_count(viewport_width: u32, tile_width: u32, spacing: u32, margins: u32) -> u32 {
    let usable = viewport_width.saturating_sub(margins);
    let per_tile = tile_width + spacing;
    if per_tile == 0 {
        return 1;
    }
    (usable / per_tile).max(1)
}

/// Coalesces viewport-resize events: the newest width wins and is released
/// once no further event has arrived within the reflow window.
#[derive(Debug, Default)]
pub struct ResizeCoalescer {
    pending: Option<(u32, Instant)>,
}

impl ResizeCoalescer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, width: u32, now: Instant) {
        self.pending = Some((width, now));
    }

    /// The width to reflow to, once the window has elapsed.
    pub fn poll(&mut self, now: Instant) -> Option<u32> {
        match self.pending {
            Some((width, last)) if now.duration_since(last) >= REFLOW_WINDOW => {
                self.pending = None;
                Some(width)
            }
            _ => None,
        }
    }
}

/// Application-scoped persisted settings.
///
/// Key spellings are part of the on-disk contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    #[serde(rename = "geometry", skip_serializing_if = "Option::is_none")]
    pub geometry: Option<String>,
    #[serde(rename = "windowState", skip_serializing_if = "Option::is_none")]
    pub window_state: Option<String>,
    #[serde(rename = "zoomLevel")]
    pub zoom_level: f64,
    #[serde(rename = "detailsVisible")]
    pub details_visible: bool,
    #[serde(rename = "splitterSizes")]
    pub splitter_sizes: Vec<i32>,
    #[serde(rename = "detailsSavedWidth")]
    pub details_saved_width: i32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            geometry: None,
            window_state: None,
            zoom_level: 1.0,
            details_visible: true,
            splitter_sizes: vec![500, 300],
            details_saved_width: 300,
        }
    }
}

impl Settings {
    /// Default on-disk location.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("hibrowse").join("settings.toml"))
    }

    /// Load settings, falling back to defaults when the file is absent or
    /// unreadable. The zoom level is re-clamped on the way in.
    pub fn load(path: &Path) -> Self {
        let mut settings: Settings = std::fs::read_to_string(path)
            .ok()
            .and_then(|text| toml::from_str(&text).ok())
            .unwrap_or_default();
        settings.zoom_level = settings.zoom_level.clamp(MIN_ZOOM, MAX_ZOOM);
        settings
    }

    /// Persist with an atomic replace: write a sibling temp file, then
    /// rename over the target.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating settings dir {}", parent.display()))?;
        }
        let text = toml::to_string_pretty(self).context("encoding settings")?;
        let tmp = path.with_extension("toml.tmp");
        std::fs::write(&tmp, text)
            .with_context(|| format!("writing settings to {}", tmp.display()))?;
        std::fs::rename(&tmp, path)
            .with_context(|| format!("replacing settings at {}", path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_column_count_floors_with_minimum() {
        // floor((800 - 24) / (96 + 18)) = floor(776 / 114) = 6
        assert_eq!(column_count(800, 96, 18, 24), 6);
        assert_eq!(column_count(100, 96, 18, 24), 1);
        assert_eq!(column_count(0, 96, 18, 24), 1);
    }

    #[test]
    fn test_zoom_is_clamped() {
        let mut view = ViewState::default();
        view.set_zoom(10.0);
        assert_eq!(view.zoom, MAX_ZOOM);
        view.set_zoom(0.01);
        assert_eq!(view.zoom, MIN_ZOOM);
    }

    #[test]
    fn test_resize_coalescing() {
        let mut coalescer = ResizeCoalescer::new();
        let t0 = Instant::now();
        coalescer.push(700, t0);
        // A newer event within the window supersedes and re-arms.
        coalescer.push(800, t0 + Duration::from_millis(20));
        assert_eq!(coalescer.poll(t0 + Duration::from_millis(40)), None);
        assert_eq!(coalescer.poll(t0 + Duration::from_millis(80)), Some(800));
        // Nothing pending afterwards.
        assert_eq!(coalescer.poll(t0 + Duration::from_millis(200)), None);
    }

    #[test]
    fn test_settings_round_trip_with_wire_keys() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("settings.toml");
        let settings = Settings {
            geometry: Some("800x600+10+10".into()),
            zoom_level: 1.5,
            details_visible: false,
            splitter_sizes: vec![640, 200],
            details_saved_width: 200,
            ..Settings::default()
        };
        settings.save(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("zoomLevel"));
        assert!(text.contains("detailsVisible"));
        assert!(text.contains("splitterSizes"));

        assert_eq!(Settings::load(&path), settings);
        // No temp file left behind.
        assert!(!tmp.path().join("settings.toml.tmp").exists());
    }

    #[test]
    fn test_settings_load_clamps_and_defaults() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("settings.toml");
        std::fs::write(&path, "zoomLevel = 9.5\n").unwrap();
        let settings = Settings::load(&path);
        assert_eq!(settings.zoom_level, MAX_ZOOM);
        assert!(settings.details_visible); // untouched keys default

        let missing = Settings::load(&tmp.path().join("absent.toml"));
        assert_eq!(missing, Settings::default());
    }
}
