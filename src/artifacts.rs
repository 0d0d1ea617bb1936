// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Durable per-prediction artifacts: the normalized leaf image and its PDF report

use image::{ImageFormat, RgbImage};
use std::fs::{self, File};
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::StorageConfig;
use crate::report::{self, ReportContent};
use crate::{LeafscanError, Result};

/// URL prefix the image directory is served under
pub const IMAGES_ROUTE: &str = "/images";
/// URL prefix the report directory is served under
pub const REPORTS_ROUTE: &str = "/reports";

/// Files written for one prediction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredArtifacts {
    pub id: Uuid,
    pub image_path: PathBuf,
    pub report_path: PathBuf,
    pub image_url: String,
    pub report_url: String,
    pub report_filename: String,
    /// BLAKE3 of the stored PNG
    pub image_hash: String,
}

/// Writes images and reports into their configured directories
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    images_dir: PathBuf,
    reports_dir: PathBuf,
}

impl ArtifactStore {
    /// Open the store, creating both directories if needed
    pub fn open(images_dir: impl Into<PathBuf>, reports_dir: impl Into<PathBuf>) -> Result<Self> {
        let images_dir = images_dir.into();
        let reports_dir = reports_dir.into();
        fs::create_dir_all(&images_dir)?;
        fs::create_dir_all(&reports_dir)?;
        Ok(Self { images_dir, reports_dir })
    }

    pub fn from_config(config: &StorageConfig) -> Result<Self> {
        Self::open(config.images_dir.clone(), config.reports_dir.clone())
    }

    pub fn images_dir(&self) -> &Path {
        &self.images_dir
    }

    pub fn reports_dir(&self) -> &Path {
        &self.reports_dir
    }

    /// Persist the image and its report under a fresh identifier.
    ///
    /// Either both files exist afterwards or neither does.
    pub fn persist(&self, image: &RgbImage, report: &ReportContent<'_>) -> Result<StoredArtifacts> {
        let id = Uuid::new_v4();
        let image_filename = format!("{}.png", id);
        let report_filename = format!("{}.pdf", id);
        let image_path = self.images_dir.join(&image_filename);
        let report_path = self.reports_dir.join(&report_filename);

        let mut png = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
            .map_err(|e| LeafscanError::Persistence(format!("Failed to encode image: {}", e)))?;
        let pdf = report::render(report)?;

        write_atomically(&image_path, &png)?;
        if let Err(e) = write_atomically(&report_path, &pdf) {
            remove_quietly(&image_path);
            return Err(e);
        }

        debug!("Stored artifacts {} ({} byte image, {} byte report)", id, png.len(), pdf.len());

        Ok(StoredArtifacts {
            id,
            image_path,
            report_path,
            image_url: format!("{}/{}", IMAGES_ROUTE, image_filename),
            report_url: format!("{}/{}", REPORTS_ROUTE, report_filename),
            report_filename,
            image_hash: blake3::hash(&png).to_hex().to_string(),
        })
    }

    /// Remove artifacts that will never be referenced by the ledger
    pub fn discard(&self, artifacts: &StoredArtifacts) {
        remove_quietly(&artifacts.image_path);
        remove_quietly(&artifacts.report_path);
    }

    /// Resolve a report file name to a path inside the report directory.
    ///
    /// Only bare `*.pdf` names are accepted, so nothing outside the
    /// directory can be addressed.
    pub fn report_path(&self, filename: &str) -> Option<PathBuf> {
        if !is_plain_report_name(filename) {
            return None;
        }
        Some(self.reports_dir.join(filename))
    }
}

fn is_plain_report_name(filename: &str) -> bool {
    let path = Path::new(filename);
    let mut components = path.components();
    let single_normal = matches!(
        (components.next(), components.next()),
        (Some(std::path::Component::Normal(name)), None) if name == filename
    );
    single_normal
        && !filename.starts_with('.')
        && !filename.contains(|c: char| c == '/' || c == '\\' || c.is_control())
        && filename.ends_with(".pdf")
}

/// Write to a hidden sibling, flush, then rename into place
fn write_atomically(path: &Path, bytes: &[u8]) -> Result<()> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| LeafscanError::Persistence(format!("Invalid artifact path {:?}", path)))?;
    let tmp_path = path.with_file_name(format!(".{}.tmp", file_name));

    let result = (|| -> std::io::Result<()> {
        let mut file = File::create(&tmp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        fs::rename(&tmp_path, path)
    })();

    result.map_err(|e| {
        remove_quietly(&tmp_path);
        LeafscanError::Persistence(format!("Failed to write {:?}: {}", path, e))
    })
}

fn remove_quietly(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Failed to remove {:?}: {}", path, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::{advisory_for, DiseaseLabel};
    use image::Rgb;

    fn sample_report(advisory: &crate::knowledge::DiseaseAdvisory) -> ReportContent<'_> {
        ReportContent {
            prediction: "Cedar Apple Rust",
            confidence: 0.91,
            advisory,
        }
    }

    #[test]
    fn test_persist_writes_both_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::open(dir.path().join("images"), dir.path().join("reports")).unwrap();
        let advisory = advisory_for(DiseaseLabel::CedarAppleRust);
        let image = RgbImage::from_pixel(8, 8, Rgb([0, 128, 0]));

        let stored = store.persist(&image, &sample_report(&advisory)).unwrap();

        assert!(fs::metadata(&stored.image_path).unwrap().len() > 0);
        assert!(fs::metadata(&stored.report_path).unwrap().len() > 0);
        assert_eq!(stored.image_url, format!("/images/{}.png", stored.id));
        assert_eq!(stored.report_url, format!("/reports/{}.pdf", stored.id));
        assert_eq!(stored.report_filename, format!("{}.pdf", stored.id));
        assert_eq!(stored.image_hash.len(), 64);

        let reloaded = image::open(&stored.image_path).unwrap().to_rgb8();
        assert_eq!(reloaded, image);
    }

    #[test]
    fn test_identifiers_are_unique() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::open(dir.path().join("i"), dir.path().join("r")).unwrap();
        let advisory = advisory_for(DiseaseLabel::Healthy);
        let image = RgbImage::new(4, 4);

        let a = store.persist(&image, &sample_report(&advisory)).unwrap();
        let b = store.persist(&image, &sample_report(&advisory)).unwrap();
        assert_ne!(a.id, b.id);
        assert_ne!(a.report_path, b.report_path);
    }

    #[test]
    fn test_no_temp_files_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::open(dir.path().join("i"), dir.path().join("r")).unwrap();
        let advisory = advisory_for(DiseaseLabel::Healthy);
        store.persist(&RgbImage::new(4, 4), &sample_report(&advisory)).unwrap();

        for entry in fs::read_dir(store.reports_dir()).unwrap() {
            let name = entry.unwrap().file_name();
            assert!(!name.to_string_lossy().starts_with('.'));
        }
    }

    #[test]
    fn test_discard_removes_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::open(dir.path().join("i"), dir.path().join("r")).unwrap();
        let advisory = advisory_for(DiseaseLabel::AppleScab);
        let stored = store.persist(&RgbImage::new(4, 4), &sample_report(&advisory)).unwrap();

        store.discard(&stored);
        assert!(!stored.image_path.exists());
        assert!(!stored.report_path.exists());
    }

    #[test]
    fn test_report_failure_removes_image() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::open(dir.path().join("i"), dir.path().join("r")).unwrap();
        // Replace the report directory with a plain file so writes into it fail
        fs::remove_dir(store.reports_dir()).unwrap();
        fs::write(store.reports_dir(), b"not a directory").unwrap();

        let advisory = advisory_for(DiseaseLabel::AppleScab);
        let err = store.persist(&RgbImage::new(4, 4), &sample_report(&advisory)).unwrap_err();
        assert!(matches!(err, LeafscanError::Persistence(_)));
        assert_eq!(fs::read_dir(store.images_dir()).unwrap().count(), 0);
    }

    #[test]
    fn test_report_path_rejects_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::open(dir.path().join("i"), dir.path().join("r")).unwrap();

        assert!(store.report_path("abc.pdf").is_some());
        assert!(store.report_path("../secret.pdf").is_none());
        assert!(store.report_path("/etc/passwd.pdf").is_none());
        assert!(store.report_path("sub/abc.pdf").is_none());
        assert!(store.report_path("..\\abc.pdf").is_none());
        assert!(store.report_path(".hidden.pdf").is_none());
        assert!(store.report_path("notes.txt").is_none());
        assert!(store.report_path("").is_none());
        assert!(store.report_path("a\0.pdf").is_none());
        assert!(store.report_path("a\n.pdf").is_none());
    }
}
