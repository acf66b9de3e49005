use anyhow::{Context, Result};
use directories::ProjectDirs;
use knownface_vision::ModelPaths;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub static CONFIG_PATH: Lazy<PathBuf> = Lazy::new(|| {
    if let Some(path) = option_env!("KNOWNFACE_CONFIG_PATH") {
        return PathBuf::from(path);
    }
    ProjectDirs::from("", "", "knownface")
        .map(|dirs| dirs.config_dir().join("config.toml"))
        .unwrap_or_else(|| PathBuf::from("knownface.toml"))
});

/// What to do when an image offered for enrolment contains several faces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MultiFacePolicy {
    /// Enrol the first face in detector order.
    #[default]
    First,
    /// Refuse to enrol.
    Reject,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Largest Euclidean distance accepted as a match (exclusive).
    pub threshold: f32,
    pub gallery_path: PathBuf,
    pub camera: String,
    pub detector_model: PathBuf,
    pub recognizer_model: PathBuf,
    pub detection_score: f32,
    pub nms_threshold: f32,
    pub multi_face: MultiFacePolicy,
    /// Live mode runs recognition on every n-th frame.
    pub process_every: u32,
    /// Live mode reloads the gallery every n frames.
    pub refresh_every: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            threshold: 0.5,
            gallery_path: PathBuf::from("database/known_faces.bin"),
            camera: "/dev/video0".to_string(),
            detector_model: PathBuf::from("models/face_detection_yunet_2023mar.onnx"),
            recognizer_model: PathBuf::from("models/face_recognition_sface_2021dec.onnx"),
            detection_score: 0.6,
            nms_threshold: 0.3,
            multi_face: MultiFacePolicy::First,
            process_every: 3,
            refresh_every: 90,
        }
    }
}

impl Config {
    pub fn model_paths(&self) -> ModelPaths {
        ModelPaths {
            detector: self.detector_model.clone(),
            recognizer: self.recognizer_model.clone(),
        }
    }

    fn validate(&self) -> Result<()> {
        if !(self.threshold.is_finite() && self.threshold > 0.0) {
            anyhow::bail!("threshold must be a positive number, got {}", self.threshold);
        }
        if self.process_every == 0 || self.refresh_every == 0 {
            anyhow::bail!("process_every and refresh_every must be at least 1");
        }
        Ok(())
    }
}

pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = path.unwrap_or(&CONFIG_PATH);
    if !path.exists() {
        log::debug!("no config at {}, using defaults", path.display());
        return Ok(Config::default());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading config at {}", path.display()))?;
    let cfg: Config =
        toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

pub fn save_config(cfg: &Config, path: Option<&Path>) -> Result<()> {
    let path = path.unwrap_or(&CONFIG_PATH);
    let data = toml::to_string_pretty(cfg)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, data).with_context(|| format!("writing config {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = load_config(Some(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(cfg, Config::default());
        assert_eq!(cfg.threshold, 0.5);
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "threshold = 0.42\nmulti_face = \"reject\"\n").unwrap();

        let cfg = load_config(Some(&path)).unwrap();
        assert_eq!(cfg.threshold, 0.42);
        assert_eq!(cfg.multi_face, MultiFacePolicy::Reject);
        assert_eq!(cfg.camera, "/dev/video0");
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/config.toml");
        let cfg = Config {
            threshold: 0.6,
            refresh_every: 10,
            ..Config::default()
        };
        save_config(&cfg, Some(&path)).unwrap();
        assert_eq!(load_config(Some(&path)).unwrap(), cfg);
    }

    #[test]
    fn rejects_nonsense_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "threshold = -1.0\n").unwrap();
        assert!(load_config(Some(&path)).is_err());
    }
}
