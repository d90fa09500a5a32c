//! Icon catalog assembly.
//!
//! On `GetInfo` a provider advertises its `resources` directory as a
//! catalog of `filename -> base64(PNG)` entries. Selected base icons also
//! get a synthesized `<stem>_IDCard.png` badge variant for "mine"
//! affordances (own jobs, loaded software).

use std::io::Cursor;
use std::path::Path;

use anyhow::{Context, Result};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use image::{ImageFormat, imageops};

use crate::protocol::IconEntry;

/// Catalog key for a resource file name.
fn catalog_name(file_name: &str) -> String {
    format!("./resources/{file_name}")
}

/// Enumerate `*.png` files of a resources directory in case-insensitive
/// filename order and assemble the catalog. Base icons named in
/// `badge_icons` additionally get a composited `<stem>_IDCard.png` entry
/// unless that file already exists on disk.
///
/// A missing or unreadable directory yields an empty catalog; `GetInfo`
/// must stay well-formed regardless.
pub fn assemble_catalog(resources_dir: &Path, badge_icons: &[String]) -> Vec<IconEntry> {
    let mut names: Vec<String> = match std::fs::read_dir(resources_dir) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_file())
            .filter_map(|e| e.file_name().into_string().ok())
            .filter(|name| {
                Path::new(name)
                    .extension()
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("png"))
            })
            .collect(),
        Err(err) => {
            tracing::warn!(
                "cannot enumerate resources at {}: {err}",
                resources_dir.display()
            );
            return Vec::new();
        }
    };
    names.sort_by_key(|name| name.to_lowercase());

    let mut catalog = Vec::with_capacity(names.len());
    for name in &names {
        match std::fs::read(resources_dir.join(name)) {
            Ok(bytes) => catalog.push(IconEntry {
                filename: catalog_name(name),
                data: BASE64.encode(bytes),
            }),
            Err(err) => tracing::warn!("skipping unreadable icon {name}: {err}"),
        }
    }

    append_badge_variants(resources_dir, badge_icons, &names, &mut catalog);
    catalog
}

fn append_badge_variants(
    resources_dir: &Path,
    badge_icons: &[String],
    existing: &[String],
    catalog: &mut Vec<IconEntry>,
) {
    if badge_icons.is_empty() {
        return;
    }
    let badge_bytes = match std::fs::read(resources_dir.join("IDCard.png")) {
        Ok(bytes) => bytes,
        Err(err) => {
            tracing::warn!("badge overlay unavailable, no IDCard.png: {err}");
            return;
        }
    };

    for base_name in badge_icons {
        let stem = base_name.trim_end_matches(".png");
        let variant = format!("{stem}_IDCard.png");
        if existing.iter().any(|n| n == &variant) {
            continue; // authored on disk, already in the catalog
        }
        let base_bytes = match std::fs::read(resources_dir.join(base_name)) {
            Ok(bytes) => bytes,
            Err(err) => {
                tracing::warn!("badge base {base_name} unreadable: {err}");
                continue;
            }
        };
        match compose_badge(&base_bytes, &badge_bytes) {
            Ok(composed) => catalog.push(IconEntry {
                filename: catalog_name(&variant),
                data: BASE64.encode(composed),
            }),
            Err(err) => tracing::warn!("badge compositing failed for {base_name}: {err}"),
        }
    }
}

/// Alpha-composite the badge over the base icon at the bottom-right corner
/// with no margin, badge side `max(1, min(w, h) / 1.75)`.
pub fn compose_badge(base_png: &[u8], badge_png: &[u8]) -> Result<Vec<u8>> {
    let base = image::load_from_memory_with_format(base_png, ImageFormat::Png)
        .context("decoding base icon")?
        .to_rgba8();
    let badge = image::load_from_memory_with_format(badge_png, ImageFormat::Png)
        .context("decoding badge icon")?
        .to_rgba8();

    let (width, height) = base.dimensions();
    let side = ((f64::from(width.min(height)) / 1.75) as u32).max(1);
    let badge = imageops::resize(&badge, side, side, imageops::FilterType::Lanczos3);

    let mut composed = base;
    imageops::overlay(
        &mut composed,
        &badge,
        i64::from(width - side),
        i64::from(height - side),
    );

    let mut out = Cursor::new(Vec::new());
    image::DynamicImage::ImageRgba8(composed)
        .write_to(&mut out, ImageFormat::Png)
        .context("encoding composited icon")?;
    Ok(out.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};
    use tempfile::TempDir;

    fn solid_png(width: u32, height: u32, color: [u8; 4]) -> Vec<u8> {
        let img = RgbaImage::from_pixel(width, height, Rgba(color));
        let mut out = Cursor::new(Vec::new());
        image::DynamicImage::ImageRgba8(img)
            .write_to(&mut out, ImageFormat::Png)
            .unwrap();
        out.into_inner()
    }

    #[test]
    fn test_catalog_order_is_case_insensitive() {
        let tmp = TempDir::new().unwrap();
        for name in ["b.png", "A.png", "c.PNG", "notes.txt"] {
            std::fs::write(tmp.path().join(name), solid_png(4, 4, [1, 2, 3, 255])).unwrap();
        }
        let catalog = assemble_catalog(tmp.path(), &[]);
        let names: Vec<&str> = catalog.iter().map(|e| e.filename.as_str()).collect();
        assert_eq!(
            names,
            vec!["./resources/A.png", "./resources/b.png", "./resources/c.PNG"]
        );
    }

    #[test]
    fn test_missing_directory_yields_empty_catalog() {
        let catalog = assemble_catalog(Path::new("/nonexistent/resources"), &[]);
        assert!(catalog.is_empty());
    }

    #[test]
    fn test_catalog_data_round_trips() {
        let tmp = TempDir::new().unwrap();
        let bytes = solid_png(4, 4, [9, 9, 9, 255]);
        std::fs::write(tmp.path().join("Partition.png"), &bytes).unwrap();
        let catalog = assemble_catalog(tmp.path(), &[]);
        assert_eq!(catalog.len(), 1);
        assert_eq!(BASE64.decode(&catalog[0].data).unwrap(), bytes);
    }

    #[test]
    fn test_badge_variant_is_synthesized() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("Job.png"), solid_png(32, 32, [255, 0, 0, 255])).unwrap();
        std::fs::write(tmp.path().join("IDCard.png"), solid_png(8, 8, [0, 0, 255, 255])).unwrap();
        let catalog = assemble_catalog(tmp.path(), &["Job.png".to_string()]);
        assert!(
            catalog
                .iter()
                .any(|e| e.filename == "./resources/Job_IDCard.png")
        );
    }

    #[test]
    fn test_compose_badge_geometry() {
        let base = solid_png(35, 35, [255, 0, 0, 255]);
        let badge = solid_png(10, 10, [0, 0, 255, 255]);
        let composed_png = compose_badge(&base, &badge).unwrap();
        let composed = image::load_from_memory(&composed_png).unwrap().to_rgba8();
        assert_eq!(composed.dimensions(), (35, 35));

        // side = 35 / 1.75 = 20, anchored bottom-right with no margin
        let corner = composed.get_pixel(34, 34);
        assert_eq!(corner.0, [0, 0, 255, 255]);
        // opposite corner untouched
        assert_eq!(composed.get_pixel(0, 0).0, [255, 0, 0, 255]);
        // just outside the 20px overlay region stays base-colored
        assert_eq!(composed.get_pixel(14, 14).0, [255, 0, 0, 255]);
    }
}
