//! The operations the application needs: enrol, rename, recognise.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use image::DynamicImage;
use knownface_vision::{Detection, FaceExtractor};

use crate::config::{Config, MultiFacePolicy};
use crate::matcher::{Matcher, Recognition};
use crate::storage::{Gallery, GalleryStore};

const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    Added,
    NoFaceDetected,
    /// Several faces and the policy is [`MultiFacePolicy::Reject`].
    MultipleFaces(usize),
}

impl AddOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, AddOutcome::Added)
    }
}

#[derive(Debug, Default)]
pub struct ImportReport {
    pub added: Vec<String>,
    pub skipped: Vec<(PathBuf, AddOutcome)>,
    pub unreadable: Vec<PathBuf>,
}

pub struct FaceService<E> {
    extractor: E,
    store: GalleryStore,
    matcher: Matcher,
    multi_face: MultiFacePolicy,
}

impl<E: FaceExtractor> FaceService<E> {
    pub fn new(
        extractor: E,
        store: GalleryStore,
        matcher: Matcher,
        multi_face: MultiFacePolicy,
    ) -> Self {
        Self {
            extractor,
            store,
            matcher,
            multi_face,
        }
    }

    pub fn from_config(extractor: E, cfg: &Config) -> Self {
        Self::new(
            extractor,
            GalleryStore::new(&cfg.gallery_path),
            Matcher::new(cfg.threshold),
            cfg.multi_face,
        )
    }

    pub fn store(&self) -> &GalleryStore {
        &self.store
    }

    pub fn matcher(&self) -> &Matcher {
        &self.matcher
    }

    /// Enrol the face in `image` under `name`, replacing any previous entry.
    pub fn add_face(&mut self, name: &str, image: &DynamicImage) -> Result<AddOutcome> {
        let name = name.trim();
        if name.is_empty() {
            anyhow::bail!("name must not be empty");
        }

        let mut faces = self.extractor.extract(image).context("extracting faces")?;
        match (faces.len(), self.multi_face) {
            (0, _) => {
                log::warn!("no face detected, not adding {:?}", name);
                return Ok(AddOutcome::NoFaceDetected);
            }
            (1, _) => {}
            (n, MultiFacePolicy::First) => {
                log::warn!("{} faces in image, enrolling the first for {:?}", n, name);
            }
            (n, MultiFacePolicy::Reject) => {
                log::warn!("{} faces in image, refusing to enrol {:?}", n, name);
                return Ok(AddOutcome::MultipleFaces(n));
            }
        }

        let face = faces.swap_remove(0);
        self.store
            .add(name, face.embedding)
            .with_context(|| format!("saving face for {:?}", name))?;
        log::info!("added {:?} to {}", name, self.store.path().display());
        Ok(AddOutcome::Added)
    }

    pub fn rename_face(&self, old_name: &str, new_name: &str) -> Result<bool> {
        let new_name = new_name.trim();
        if new_name.is_empty() {
            anyhow::bail!("new name must not be empty");
        }
        let renamed = self
            .store
            .rename(old_name, new_name)
            .with_context(|| format!("renaming {:?} to {:?}", old_name, new_name))?;
        if renamed {
            log::info!("renamed {:?} to {:?}", old_name, new_name);
        } else {
            log::info!("no face named {:?}", old_name);
        }
        Ok(renamed)
    }

    /// Recognise the first face in `image` against the stored gallery.
    pub fn recognize(&mut self, image: &DynamicImage) -> Result<Recognition> {
        let gallery = self.store.load();
        if gallery.is_empty() {
            return Ok(Recognition::EmptyGallery);
        }
        let faces = self.extractor.extract(image).context("extracting faces")?;
        Ok(match faces.first() {
            Some(face) => self.matcher.recognize(&gallery, &face.embedding),
            None => Recognition::NoFaceDetected,
        })
    }

    /// Recognise every face in `image` against a caller-held gallery.
    pub fn recognize_all(
        &mut self,
        image: &DynamicImage,
        gallery: &Gallery,
    ) -> Result<Vec<(Detection, Recognition)>> {
        let faces = self.extractor.extract(image).context("extracting faces")?;
        Ok(faces
            .into_iter()
            .map(|face| {
                let recognition = self.matcher.recognize(gallery, &face.embedding);
                (face.detection, recognition)
            })
            .collect())
    }

    /// Enrol every jpg/jpeg/png in `dir` under its file stem.
    pub fn import_dir(&mut self, dir: &Path) -> Result<ImportReport> {
        let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)
            .with_context(|| format!("reading {}", dir.display()))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file() && has_image_extension(p))
            .collect();
        paths.sort();

        let mut report = ImportReport::default();
        for path in paths {
            let Some(name) = path.file_stem().map(|s| s.to_string_lossy().into_owned()) else {
                continue;
            };
            let img = match image::open(&path) {
                Ok(img) => img,
                Err(e) => {
                    log::warn!("cannot open {}: {}", path.display(), e);
                    report.unreadable.push(path);
                    continue;
                }
            };
            match self.add_face(&name, &img)? {
                AddOutcome::Added => report.added.push(name),
                other => report.skipped.push((path, other)),
            }
        }

        log::info!(
            "imported {} face(s), skipped {}, unreadable {}",
            report.added.len(),
            report.skipped.len(),
            report.unreadable.len()
        );
        Ok(report)
    }
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_extensions() {
        assert!(has_image_extension(Path::new("a/Alice.JPG")));
        assert!(has_image_extension(Path::new("bob.png")));
        assert!(!has_image_extension(Path::new("notes.txt")));
        assert!(!has_image_extension(Path::new("README")));
    }

    #[test]
    fn outcome_success() {
        assert!(AddOutcome::Added.is_success());
        assert!(!AddOutcome::NoFaceDetected.is_success());
        assert!(!AddOutcome::MultipleFaces(2).is_success());
    }
}
